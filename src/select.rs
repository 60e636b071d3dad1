// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! Pure decision functions for the egress path selector (`spec.md` §4.9). Kept free of any
//! I/O so the scheduling logic can be tested without a transport.

use crate::path::Path;

/// The rolling deadline a path would have if chosen for the next send. Paths that have been
/// quiet longer than their current `limit` reset to a half-RTT baseline; otherwise the
/// deadline slides forward by the unused remainder plus half the RTT.
pub fn virtual_limit<A>(path: &Path<A>, now: u64) -> u64 {
    let elapsed = now - path.send_time;
    if path.limit > elapsed {
        path.limit + path.rtt / 2 - elapsed
    } else {
        path.rtt / 2
    }
}

/// True if this (non-backup) path hasn't received anything within `send_timeout` and should
/// be probed immediately rather than entered into the min-limit comparison.
pub fn is_stale<A>(path: &Path<A>, now: u64, send_timeout: u64) -> bool {
    now - path.recv_time >= send_timeout
}

/// The effective MTU: the smaller of our configured MTU and the peer's last-advertised one,
/// or just our own if the peer hasn't told us theirs yet.
pub fn effective_mtu(local: u32, remote: u32) -> u32 {
    if remote == 0 {
        local
    } else {
        local.min(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, SocketAddr};

    fn path() -> Path<()> {
        Path::new("10.0.0.1".parse::<IpAddr>().unwrap(), "10.0.0.2:9".parse::<SocketAddr>().unwrap(), true, false, ())
    }

    #[test]
    fn virtual_limit_resets_to_half_rtt_after_quiet_period() {
        let mut p = path();
        p.rtt = 40;
        p.send_time = 0;
        p.limit = 5;
        assert_eq!(virtual_limit(&p, 100), 20);
    }

    #[test]
    fn virtual_limit_slides_forward_when_still_within_budget() {
        let mut p = path();
        p.rtt = 40;
        p.send_time = 100;
        p.limit = 50;
        assert_eq!(virtual_limit(&p, 110), 50 + 20 - 10);
    }

    #[test]
    fn effective_mtu_prefers_the_smaller_known_value() {
        assert_eq!(effective_mtu(1400, 0), 1400);
        assert_eq!(effective_mtu(1400, 1200), 1200);
        assert_eq!(effective_mtu(1200, 1400), 1200);
    }

    #[test]
    fn stale_detection_uses_send_timeout() {
        let mut p = path();
        p.recv_time = 0;
        assert!(is_stale(&p, 1000, 1000));
        p.recv_time = 500;
        assert!(!is_stale(&p, 1000, 1000));
    }
}
