// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! An in-memory [`Transport`] for tests: datagrams are handed directly between two
//! [`LoopbackTransport`] instances sharing a pair of queues, instead of touching a real
//! socket. Modeled on the request/response queue harness `zssp.rs`'s test module builds
//! out of a `parking_lot::Mutex<LinkedList<Vec<u8>>>`.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::transport::{Ancillary, Transport};

#[derive(Default)]
pub struct NoopAncillary {
    tc: u8,
}

impl Ancillary for NoopAncillary {
    fn set_traffic_class(&mut self, tc: u8) {
        self.tc = tc;
    }
}

struct Datagram {
    from: SocketAddr,
    data: Vec<u8>,
}

/// One endpoint of a loopback pair. `self_addr` is the address this endpoint is reached at;
/// packets sent to `self_addr` land in `inbox`, and sends addressed elsewhere are dropped
/// unless `peer` points at another `LoopbackTransport`'s inbox for that address.
pub struct LoopbackTransport {
    pub self_addr: SocketAddr,
    inbox: Arc<Mutex<VecDeque<Datagram>>>,
    peers: Mutex<Vec<(SocketAddr, Arc<Mutex<VecDeque<Datagram>>>)>>,
}

impl LoopbackTransport {
    pub fn new(self_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self { self_addr, inbox: Arc::new(Mutex::new(VecDeque::new())), peers: Mutex::new(Vec::new()) })
    }

    /// Wire two endpoints so sends addressed to each other's `self_addr` are delivered.
    pub fn link(a: &Arc<Self>, b: &Arc<Self>) {
        a.peers.lock().push((b.self_addr, b.inbox.clone()));
        b.peers.lock().push((a.self_addr, a.inbox.clone()));
    }

    pub fn queued(&self) -> usize {
        self.inbox.lock().len()
    }
}

impl Transport for LoopbackTransport {
    type Ancillary = NoopAncillary;

    fn build_ancillary(&self, _local: IpAddr) -> Result<Self::Ancillary> {
        Ok(NoopAncillary::default())
    }

    fn send(&self, remote: SocketAddr, _ancillary: &Self::Ancillary, _tc: u8, data: &[u8]) -> Result<()> {
        let peers = self.peers.lock();
        if let Some((_, inbox)) = peers.iter().find(|(addr, _)| *addr == remote) {
            inbox.lock().push_back(Datagram { from: self.self_addr, data: data.to_vec() });
        }
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr, IpAddr)>> {
        match self.inbox.lock().pop_front() {
            Some(dgram) => {
                let n = dgram.data.len().min(buf.len());
                buf[..n].copy_from_slice(&dgram.data[..n]);
                Ok(Some((n, dgram.from, self.self_addr.ip())))
            }
            None => Ok(None),
        }
    }
}
