// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! A 48-bit millisecond wall clock. Every timestamp exchanged on the wire -- nonces, send
//! times, receive times -- lives in this space. 48 bits of millisecond resolution wraps in
//! roughly 8900 years, so wraparound is not handled (see Design Notes).

use std::time::{SystemTime, UNIX_EPOCH};

pub const MASK_48: u64 = 0xffff_ffff_ffff;

/// Current wall-clock time truncated to 48 bits of milliseconds since the Unix epoch.
#[inline]
pub fn now_ms48() -> u64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    (d.as_millis() as u64) & MASK_48
}

/// Absolute difference between two 48-bit timestamps, accounting for neither ever truly
/// being allowed to wrap within the lifetime of one engine instance.
#[inline]
pub fn abs_diff48(a: u64, b: u64) -> u64 {
    if a >= b {
        a - b
    } else {
        b - a
    }
}
