// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! The engine's I/O seam. The UDP socket itself is an external collaborator (see
//! `spec.md` §1): this trait captures only what the engine needs from it -- sending a
//! datagram with a per-path ancillary-data template and a caller-chosen traffic class, and
//! receiving one with its source and recovered local-destination address. A real
//! implementation backs this with `sendmsg`/`recvmsg` and kernel cmsg buffers (`unix::UdpTransport`);
//! tests back it with an in-memory loopback pair (`loopback::LoopbackTransport`).

use std::net::{IpAddr, SocketAddr};

use crate::error::Result;

/// A transport's per-path ancillary-data template: whatever the transport needs pinned to a
/// path to emit packets with the right source address and traffic class. Opaque to everything
/// above the transport layer.
pub trait Ancillary {
    /// Overwrite the per-send traffic-class cell in place.
    fn set_traffic_class(&mut self, tc: u8);
}

pub trait Transport {
    type Ancillary: Ancillary;

    /// Build the ancillary-data template for a path whose outbound packets should appear to
    /// originate from `local`.
    fn build_ancillary(&self, local: IpAddr) -> Result<Self::Ancillary>;

    /// Send one datagram to `remote` using `ancillary`'s pinned source address and `tc` as the
    /// traffic class / DSCP byte.
    fn send(&self, remote: SocketAddr, ancillary: &Self::Ancillary, tc: u8, data: &[u8]) -> Result<()>;

    /// Receive one datagram into `buf`, returning the number of bytes read, the remote
    /// address, and the local destination address recovered from the packet's ancillary data
    /// (pktinfo). Returns `Ok(None)` if nothing was usable (e.g. the local address could not
    /// be recovered) rather than an `Error`, matching the receive path's drop-and-continue
    /// policy.
    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr, IpAddr)>>;

    /// The underlying socket handle, for a caller that wants to register it with its own
    /// event loop instead of polling `recv`. Transports with no real socket (the loopback
    /// test double) return `None`.
    fn fd(&self) -> Option<i32> {
        None
    }
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    type Ancillary = T::Ancillary;

    fn build_ancillary(&self, local: IpAddr) -> Result<Self::Ancillary> {
        T::build_ancillary(self, local)
    }

    fn send(&self, remote: SocketAddr, ancillary: &Self::Ancillary, tc: u8, data: &[u8]) -> Result<()> {
        T::send(self, remote, ancillary, tc, data)
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr, IpAddr)>> {
        T::recv(self, buf)
    }

    fn fd(&self) -> Option<i32> {
        T::fd(self)
    }
}
