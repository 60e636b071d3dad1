// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! The path table: one entry per (local address, remote socket address) pair this engine has
//! either been told about (`peer()`, active) or learned from an inbound control packet
//! (non-active). See `spec.md` §4.3.

use std::net::{IpAddr, SocketAddr};

use crate::addr;
use crate::transport::Ancillary;

/// Backup-announcement state. Becoming backup is contagious between the two ends of a path:
/// receiving a bakx unconditionally marks the local side backup too (see `spec.md` §4.6).
#[derive(Default, Clone, Copy)]
pub struct Backup {
    pub local: bool,
    pub remote: bool,
    pub send_time: u64,
}

pub struct Path<A> {
    pub local_addr: IpAddr,
    pub addr: SocketAddr,
    pub active: bool,
    pub bak: Backup,

    pub recv_time: u64,
    pub send_time: u64,
    pub pong_time: u64,

    /// EWMA of local receive inter-arrival time.
    pub rdt: u64,
    /// EWMA of peer send inter-arrival time, as we observe it.
    pub sdt: u64,
    /// Peer's send-time of the most recent packet we received on this path.
    pub rst: u64,

    /// Peer-reported counterparts of `sdt`/`rdt`/`rst`, learned from its pong.
    pub r_sdt: u64,
    pub r_rdt: u64,
    pub r_rst: u64,
    pub r_dt: i64,
    pub rtt: u64,

    /// The egress selector's rolling deadline for this path.
    pub limit: u64,

    pub ancillary: A,
}

impl<A> Path<A> {
    pub fn new(local_addr: IpAddr, addr: SocketAddr, active: bool, backup: bool, ancillary: A) -> Self {
        Self {
            local_addr,
            addr,
            active,
            bak: Backup { local: backup, ..Default::default() },
            recv_time: 0,
            send_time: 0,
            pong_time: 0,
            rdt: 0,
            sdt: 0,
            rst: 0,
            r_sdt: 0,
            r_rdt: 0,
            r_rst: 0,
            r_dt: 0,
            rtt: 0,
            limit: 0,
            ancillary,
        }
    }

    /// Fold in a freshly received packet's timing: EWMA with new-sample weight 1/8 once warmed
    /// up, otherwise a straight initialization from the first observed delta.
    pub fn log_receive_timing(&mut self, now: u64, send_time: u64) {
        if self.rdt > 0 {
            self.rdt = ((now - self.recv_time) + 7 * self.rdt) / 8;
            self.sdt = ((send_time - self.rst) + 7 * self.sdt) / 8;
        } else if self.recv_time > 0 {
            self.rdt = now - self.recv_time;
            self.sdt = send_time - self.rst;
        }
        self.rst = send_time;
    }
}

/// Lookup key for a path: local address and remote socket address, both normalized so that an
/// IPv4-mapped-IPv6 peer and its direct-v4 counterpart collide.
#[derive(PartialEq, Eq, Clone, Copy)]
struct PathKey {
    local: IpAddr,
    remote: SocketAddr,
}

impl PathKey {
    fn new(local: IpAddr, remote: SocketAddr) -> Self {
        Self { local: addr::normalize(local), remote: addr::normalize_sockaddr(remote) }
    }
}

/// All paths known to one engine instance. Lookup is linear, matching the original's linked
/// list -- path counts are small (a handful at most) and creation is rare compared to lookup.
pub struct PathTable<A> {
    paths: Vec<Path<A>>,
}

impl<A> PathTable<A> {
    pub fn new() -> Self {
        Self { paths: Vec::new() }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path<A>> {
        self.paths.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Path<A>> {
        self.paths.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn find_mut(&mut self, local: IpAddr, remote: SocketAddr) -> Option<&mut Path<A>> {
        let key = PathKey::new(local, remote);
        self.paths.iter_mut().find(|p| PathKey::new(p.local_addr, p.addr) == key)
    }

    pub fn push(&mut self, path: Path<A>) -> &mut Path<A> {
        self.paths.push(path);
        self.paths.last_mut().unwrap()
    }

    pub fn get(&self, index: usize) -> &Path<A> {
        &self.paths[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Path<A> {
        &mut self.paths[index]
    }

    pub fn find_index(&self, local: IpAddr, remote: SocketAddr) -> Option<usize> {
        let key = PathKey::new(local, remote);
        self.paths.iter().position(|p| PathKey::new(p.local_addr, p.addr) == key)
    }
}

impl<A> Default for PathTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Ancillary> Path<A> {
    pub fn set_traffic_class(&mut self, tc: u8) {
        self.ancillary.set_traffic_class(tc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAncillary;
    impl Ancillary for NoopAncillary {
        fn set_traffic_class(&mut self, _tc: u8) {}
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }
    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn distinct_remote_same_local_are_different_paths() {
        let mut table: PathTable<NoopAncillary> = PathTable::new();
        table.push(Path::new(ip("10.0.0.1"), addr("10.0.0.2:5000"), true, false, NoopAncillary));
        table.push(Path::new(ip("10.0.0.1"), addr("10.0.0.3:5000"), true, false, NoopAncillary));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn v4_mapped_v6_and_direct_v4_are_the_same_path() {
        let mut table: PathTable<NoopAncillary> = PathTable::new();
        table.push(Path::new(ip("10.0.0.1"), addr("10.0.0.2:9"), true, false, NoopAncillary));
        assert!(table.find_mut(ip("10.0.0.1"), addr("[::ffff:10.0.0.2]:9")).is_some());
    }

    #[test]
    fn ewma_initializes_then_converges() {
        let mut p = Path::new(ip("10.0.0.1"), addr("10.0.0.2:9"), true, false, NoopAncillary);
        p.recv_time = 1000;
        p.rst = 1000;
        p.log_receive_timing(1010, 1010);
        assert_eq!(p.rdt, 10);
        assert_eq!(p.sdt, 10);

        let mut t = 1010u64;
        for _ in 0..40 {
            t += 10;
            p.recv_time = t - 10;
            p.log_receive_timing(t, t);
        }
        assert!((p.rdt as i64 - 10).abs() <= 1);
    }
}
