// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! The engine: the two externally-driven entry points (`recv`, `send`) and the control tick
//! they share, tying together the path table, key ring, key exchange, and control codec.
//!
//! Single-threaded and cooperative, as `spec.md` §5 requires: every method here runs to
//! completion against `&mut self` before returning, and the only I/O is through the
//! `Transport` the engine was built with.

use std::net::{IpAddr, SocketAddr};

use crate::addr;
use crate::clock;
use crate::control;
use crate::crypto::aead;
use crate::crypto::KeyRing;
use crate::error::{Error, Result};
use crate::kex::KeyExchange;
use crate::path::{Path, PathTable};
use crate::secret::Secret;
use crate::select;
use crate::transport::Transport;
use crate::wire::{self, CtrlKind};

pub const PONG_TIMEOUT_MS: u64 = 100;
pub const KEYX_TIMEOUT_MS: u64 = 60 * 60 * 1000;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_TIME_TOLERANCE_MS: u64 = 10 * 60 * 1_000;
pub const MIN_MTU: u32 = 500;
pub const MAX_MTU: u32 = 1450;
pub const MAX_PACKET_SIZE: usize = 1500;

fn timed_out(now: u64, last: u64, timeout: u64) -> bool {
    last == 0 || (now > last && now - last >= timeout)
}

struct MtuState {
    local: u32,
    remote: u32,
    send_time: u64,
}

/// Bookkeeping that belongs to the whole engine rather than to any one path: when we last sent
/// or received anything under the active key-exchange round, and whether the last data frame
/// we tried to decrypt failed under every slot.
struct CryptoClock {
    send_time: u64,
    recv_time: u64,
}

pub struct Engine<T: Transport> {
    transport: T,
    paths: PathTable<T::Ancillary>,
    ring: KeyRing,
    kex: KeyExchange,
    mtu: MtuState,
    crypto_clock: CryptoClock,
    send_timeout: u64,
    time_tolerance: u64,
}

enum CtrlAction {
    Keyx,
    Mtux,
    Bakx,
    Ping,
}

impl<T: Transport> Engine<T> {
    pub fn new(transport: T, prefer_aes: bool, mtu: u32) -> Result<Self> {
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            return Err(Error::InvalidArgument);
        }
        Ok(Self {
            transport,
            paths: PathTable::new(),
            ring: KeyRing::new(prefer_aes),
            kex: KeyExchange::reinit(prefer_aes),
            mtu: MtuState { local: mtu, remote: 0, send_time: 0 },
            crypto_clock: CryptoClock { send_time: 0, recv_time: 0 },
            send_timeout: DEFAULT_SEND_TIMEOUT_MS,
            time_tolerance: DEFAULT_TIME_TOLERANCE_MS,
        })
    }

    pub fn set_key(&mut self, key: &[u8]) -> Result<()> {
        if key.len() != aead::KEY_SIZE {
            return Err(Error::InvalidArgument);
        }
        let mut k = [0u8; aead::KEY_SIZE];
        k.copy_from_slice(key);
        self.ring.set_key(&Secret(k));
        Ok(())
    }

    /// Copy the long-term key back out, mirroring `mud_get_key`.
    pub fn get_key(&self) -> [u8; aead::KEY_SIZE] {
        *self.ring.private_key_bytes()
    }

    pub fn set_send_timeout_msec(&mut self, msec: u64) {
        self.send_timeout = msec;
    }

    pub fn set_time_tolerance_sec(&mut self, sec: u64) {
        self.time_tolerance = sec * 1_000;
    }

    pub fn set_mtu(&mut self, mtu: u32) -> Result<()> {
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            return Err(Error::InvalidArgument);
        }
        self.mtu.local = mtu;
        Ok(())
    }

    pub fn get_mtu(&self) -> u32 {
        select::effective_mtu(self.mtu.local, self.mtu.remote)
    }

    /// The transport's underlying socket handle, for registering with an external event loop
    /// (`spec.md` §5's "shared resources" note). `None` for transports with no real socket.
    pub fn get_fd(&self) -> Option<i32> {
        self.transport.fd()
    }

    /// Register an actively-configured path to a peer (the client side of a path; paths
    /// learned from an inbound control packet are created automatically and are non-active).
    pub fn peer(&mut self, local: IpAddr, remote: SocketAddr, backup: bool) -> Result<()> {
        let ancillary = self.transport.build_ancillary(local)?;
        self.paths.push(Path::new(local, remote, true, backup, ancillary));
        Ok(())
    }

    fn find_or_create_path(&mut self, local: IpAddr, remote: SocketAddr, allow_create: bool) -> Result<Option<usize>> {
        if let Some(i) = self.paths.find_index(local, remote) {
            return Ok(Some(i));
        }
        if !allow_create {
            return Ok(None);
        }
        let ancillary = self.transport.build_ancillary(local)?;
        self.paths.push(Path::new(local, remote, false, false, ancillary));
        Ok(Some(self.paths.len() - 1))
    }

    // ---- control tick (spec.md §4.8) ----

    pub fn send_ctrl(&mut self) -> Result<()> {
        let now = clock::now_ms48();

        // Each path's decision re-checks the shared timers (crypto_clock, mtu) as it goes, so
        // the first path that sends a keyx/mtux this tick updates them immediately and every
        // later path in the same tick falls through to its next-priority action instead of
        // repeating it -- matching mud_send_ctrl's single in-loop pass over paths.
        for i in 0..self.paths.len() {
            let path = self.paths.get(i);
            let action = if !path.active {
                if self.ring.bad_key && timed_out(now, self.crypto_clock.send_time, self.send_timeout) {
                    Some(CtrlAction::Keyx)
                } else {
                    None
                }
            } else if timed_out(now, self.crypto_clock.send_time, self.send_timeout) && timed_out(now, self.crypto_clock.recv_time, KEYX_TIMEOUT_MS) {
                Some(CtrlAction::Keyx)
            } else if self.mtu.remote == 0 && timed_out(now, self.mtu.send_time, self.send_timeout) {
                Some(CtrlAction::Mtux)
            } else if path.bak.local && !path.bak.remote && timed_out(now, path.bak.send_time, self.send_timeout) {
                Some(CtrlAction::Bakx)
            } else if path.send_time == 0 {
                Some(CtrlAction::Ping)
            } else {
                None
            };

            match action {
                Some(CtrlAction::Keyx) => {
                    let was_active = self.paths.get(i).active;
                    self.send_ctrl_keyx(i, now)?;
                    self.crypto_clock.send_time = now;
                    if !was_active {
                        self.ring.bad_key = false;
                    }
                }
                Some(CtrlAction::Mtux) => {
                    self.send_ctrl_mtux(i, now)?;
                    self.mtu.send_time = now;
                }
                Some(CtrlAction::Bakx) => {
                    self.send_ctrl_bakx(i, now)?;
                    self.paths.get_mut(i).bak.send_time = now;
                }
                Some(CtrlAction::Ping) => self.send_ctrl_ping(i, now)?,
                None => {}
            }
        }
        Ok(())
    }

    fn send_ctrl_frame(&mut self, path_index: usize, frame: &[u8]) -> Result<()> {
        let path = self.paths.get_mut(path_index);
        path.set_traffic_class(0);
        let addr = path.addr;
        self.transport.send(addr, &path.ancillary, 0, frame)?;
        self.paths.get_mut(path_index).send_time = clock::now_ms48();
        Ok(())
    }

    fn send_ctrl_ping(&mut self, path_index: usize, now: u64) -> Result<()> {
        let frame = control::encode(now, &[], &self.ring.private.encrypt);
        self.send_ctrl_frame(path_index, &frame)
    }

    fn send_ctrl_pong(&mut self, path_index: usize, now: u64) -> Result<()> {
        let path = self.paths.get(path_index);
        let payload = control::pong::encode(&control::pong::Payload { sdt: path.sdt, rdt: path.rdt, rst: path.rst });
        let frame = control::encode(now, &payload, &self.ring.private.encrypt);
        self.send_ctrl_frame(path_index, &frame)
    }

    fn send_ctrl_keyx(&mut self, path_index: usize, now: u64) -> Result<()> {
        let payload = self.kex.encode_payload();
        let frame = control::encode(now, &payload, &self.ring.private.encrypt);
        self.send_ctrl_frame(path_index, &frame)
    }

    fn send_ctrl_mtux(&mut self, path_index: usize, now: u64) -> Result<()> {
        let payload = control::mtux::encode(self.mtu.local);
        let frame = control::encode(now, &payload, &self.ring.private.encrypt);
        self.send_ctrl_frame(path_index, &frame)
    }

    fn send_ctrl_bakx(&mut self, path_index: usize, now: u64) -> Result<()> {
        let local = self.paths.get(path_index).bak.local;
        let payload = control::bakx::encode(local);
        let frame = control::encode(now, &payload, &self.ring.private.encrypt);
        self.send_ctrl_frame(path_index, &frame)
    }

    // ---- receive entry point (spec.md §4.7) ----

    /// Receive and process one datagram. Returns the number of plaintext bytes written into
    /// `data`, or `Ok(0)` if the packet was a control message, was dropped, or nothing was
    /// available.
    pub fn recv(&mut self, data: &mut [u8]) -> Result<usize> {
        let mut packet = [0u8; MAX_PACKET_SIZE];
        let (packet_size, remote, local) = match self.transport.recv(&mut packet)? {
            Some(v) => v,
            None => return Ok(0),
        };
        let packet = &packet[..packet_size];

        if packet.len() <= wire::MIN_FRAME_SIZE {
            return Ok(0);
        }

        let now = clock::now_ms48();
        let header = wire::read48(packet);
        let is_ctrl = header == 0;
        let send_time = if is_ctrl {
            if packet.len() < wire::CTRL_HEADER_SIZE + wire::TAG_SIZE {
                return Ok(0);
            }
            control::send_time(packet)
        } else {
            header
        };

        if clock::abs_diff48(now, send_time) >= self.time_tolerance {
            return Ok(0);
        }

        if is_ctrl && !control::verify(packet, &self.ring.private.encrypt) {
            return Ok(0);
        }

        let remote = addr::normalize_sockaddr(remote);
        let local = addr::normalize(local);

        let path_index = match self.find_or_create_path(local, remote, is_ctrl)? {
            Some(i) => i,
            None => return Ok(0),
        };

        {
            let path = self.paths.get_mut(path_index);
            path.log_receive_timing(now, send_time);
        }

        {
            let path = self.paths.get(path_index);
            if !path.bak.local && path.recv_time > 0 && timed_out(now, path.pong_time, PONG_TIMEOUT_MS) {
                self.send_ctrl_pong(path_index, now)?;
                self.paths.get_mut(path_index).pong_time = now;
            }
        }

        self.paths.get_mut(path_index).recv_time = now;

        if is_ctrl {
            self.dispatch_ctrl(path_index, now, send_time, packet);
            return Ok(0);
        }

        let ciphertext_end = packet.len() - wire::TAG_SIZE;
        let mut tag = [0u8; wire::TAG_SIZE];
        tag.copy_from_slice(&packet[ciphertext_end..]);
        let ciphertext = &packet[wire::NONCE_SIZE..ciphertext_end];
        let nonce: [u8; 6] = packet[0..6].try_into().unwrap();

        match self.ring.decrypt(&nonce, ciphertext, &tag) {
            Some((plaintext, promoted)) => {
                if plaintext.len() > data.len() {
                    return Err(Error::InvalidArgument);
                }
                if promoted {
                    self.kex.reset();
                }
                data[..plaintext.len()].copy_from_slice(&plaintext);
                Ok(plaintext.len())
            }
            None => {
                self.ring.bad_key = true;
                Ok(0)
            }
        }
    }

    fn dispatch_ctrl(&mut self, path_index: usize, now: u64, send_time: u64, packet: &[u8]) {
        match CtrlKind::from_len(packet.len()) {
            Some(CtrlKind::Keyx) => {
                let payload = control::payload(packet);
                if self.kex.recv(&mut self.ring, payload) {
                    let _ = self.send_ctrl_keyx(path_index, now);
                }
                self.crypto_clock.recv_time = now;
            }
            Some(CtrlKind::Mtux) => {
                self.mtu.remote = control::mtux::decode(control::payload(packet));
                if !self.paths.get(path_index).active {
                    let _ = self.send_ctrl_mtux(path_index, now);
                }
            }
            Some(CtrlKind::Pong) => {
                let p = control::pong::decode(control::payload(packet));
                let path = self.paths.get_mut(path_index);
                path.r_sdt = p.sdt;
                path.r_rdt = p.rdt;
                path.r_rst = p.rst;
                path.r_dt = send_time as i64 - path.r_rst as i64;
                path.rtt = now - path.r_rst;
            }
            Some(CtrlKind::Bakx) => {
                let remote_flag = control::bakx::decode(control::payload(packet));
                let path = self.paths.get_mut(path_index);
                path.bak.local = true;
                path.bak.remote = remote_flag;
                if !self.paths.get(path_index).active {
                    let _ = self.send_ctrl_bakx(path_index, now);
                }
            }
            Some(CtrlKind::Ping) | None => {}
        }
    }

    // ---- egress selector (spec.md §4.9) ----

    pub fn send(&mut self, data: &[u8], tc: u8) -> Result<usize> {
        self.send_ctrl()?;

        if data.is_empty() {
            return Ok(0);
        }
        if data.len() as u32 > self.get_mtu() {
            return Err(Error::MessageTooBig);
        }

        let now = clock::now_ms48();
        let mut nonce48 = [0u8; 6];
        wire::write48(&mut nonce48, now);
        let mut frame = data.to_vec();
        self.ring.encrypt(&nonce48, &mut frame);
        let mut full = vec![0u8; wire::NONCE_SIZE];
        wire::write48(&mut full, now);
        full.extend_from_slice(&frame);

        let mut path_min: Option<(usize, u64)> = None;

        for i in 0..self.paths.len() {
            let path = self.paths.get(i);
            if path.bak.local {
                continue;
            }
            let limit = select::virtual_limit(path, now);

            if select::is_stale(path, now, self.send_timeout) {
                let addr = path.addr;
                let sent = self.transport.send(addr, &self.paths.get(i).ancillary, tc, &full).is_ok();
                self.paths.get_mut(i).limit = limit;
                let _ = sent;
                self.paths.get_mut(i).send_time = now;
                continue;
            }

            if path_min.map_or(true, |(_, min)| limit < min) {
                path_min = Some((i, limit));
            }
        }

        let (chosen, limit) = match path_min {
            Some(v) => v,
            None => match (0..self.paths.len()).find(|&i| self.paths.get(i).bak.local) {
                Some(i) => (i, 0),
                None => return Ok(0),
            },
        };

        let addr = self.paths.get(chosen).addr;
        match self.transport.send(addr, &self.paths.get(chosen).ancillary, tc, &full) {
            Ok(()) => {
                self.paths.get_mut(chosen).send_time = now;
                if path_min.is_some() {
                    self.paths.get_mut(chosen).limit = limit;
                }
                Ok(full.len())
            }
            Err(e) => Err(e),
        }
    }
}
