// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! Address handling. Parsing is limited to numeric literals (`std::net`'s own `FromStr` impls
//! already do exactly that); this module adds only the IPv4-mapped-IPv6 canonicalization the
//! path table depends on.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

/// Canonicalize an address so that `::ffff:a.b.c.d` and `a.b.c.d` compare and hash identically.
/// A path learned over a dual-stack v6 socket from an IPv4-mapped peer must be the same path
/// table entry as one reached directly over v4.
#[inline]
pub fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => ip,
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
    }
}

#[inline]
pub fn normalize_sockaddr(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(normalize(addr.ip()), addr.port())
}

/// True if `ip` is the IPv4-mapped form, i.e. would be rewritten by [`normalize`].
#[inline]
pub fn is_v4_mapped(ip: &Ipv6Addr) -> bool {
    ip.to_ipv4_mapped().is_some()
}
