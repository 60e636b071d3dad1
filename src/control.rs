// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! Encoding, authentication, and payload (de)serialization for the five control messages.
//! Message identity is carried entirely by total frame length (see [`wire::CtrlKind`]); this
//! module only ever builds or reads the payload bytes that sit between the header and the MAC.

use crate::crypto::aead::{self, Cipher};
use crate::wire::{self, CTRL_HEADER_SIZE, TAG_SIZE};

/// Build a full control frame: six zero bytes, `now` as a 48-bit send-time, `payload`, and a
/// MAC computed under `private` over everything preceding it.
pub fn encode(now: u64, payload: &[u8], private: &Cipher) -> Vec<u8> {
    let mut frame = vec![0u8; CTRL_HEADER_SIZE + payload.len() + TAG_SIZE];
    wire::write48(&mut frame[wire::NONCE_SIZE..], now);
    frame[CTRL_HEADER_SIZE..CTRL_HEADER_SIZE + payload.len()].copy_from_slice(payload);
    let ad_end = CTRL_HEADER_SIZE + payload.len();
    let tag = aead::mac_ctrl(private, &frame[..ad_end]);
    frame[ad_end..].copy_from_slice(&tag);
    frame
}

/// Verify a control frame's MAC under `private`. `frame` is the entire packet including MAC.
pub fn verify(frame: &[u8], private: &Cipher) -> bool {
    if frame.len() < CTRL_HEADER_SIZE + TAG_SIZE {
        return false;
    }
    let ad_end = frame.len() - TAG_SIZE;
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&frame[ad_end..]);
    aead::verify_ctrl(private, &frame[..ad_end], &tag)
}

/// The 48-bit send-time carried by every control frame, immediately after the six zero bytes.
pub fn send_time(frame: &[u8]) -> u64 {
    wire::read48(&frame[wire::NONCE_SIZE..CTRL_HEADER_SIZE])
}

pub fn payload(frame: &[u8]) -> &[u8] {
    &frame[CTRL_HEADER_SIZE..frame.len() - TAG_SIZE]
}

pub mod pong {
    pub struct Payload {
        pub sdt: u64,
        pub rdt: u64,
        pub rst: u64,
    }

    pub fn encode(p: &Payload) -> [u8; 18] {
        let mut out = [0u8; 18];
        crate::wire::write48(&mut out[0..6], p.sdt);
        crate::wire::write48(&mut out[6..12], p.rdt);
        crate::wire::write48(&mut out[12..18], p.rst);
        out
    }

    pub fn decode(payload: &[u8]) -> Payload {
        Payload { sdt: crate::wire::read48(&payload[0..6]), rdt: crate::wire::read48(&payload[6..12]), rst: crate::wire::read48(&payload[12..18]) }
    }
}

pub mod mtux {
    pub fn encode(mtu: u32) -> [u8; 6] {
        let mut out = [0u8; 6];
        crate::wire::write48(&mut out, mtu as u64);
        out
    }

    pub fn decode(payload: &[u8]) -> u32 {
        crate::wire::read48(&payload[0..6]) as u32
    }
}

pub mod bakx {
    pub fn encode(local: bool) -> [u8; 1] {
        [local as u8]
    }

    pub fn decode(payload: &[u8]) -> bool {
        payload[0] != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aead::{Cipher, CipherKind};
    use crate::secret::Secret;

    fn cipher() -> Cipher {
        Cipher::new(CipherKind::ChaCha20Poly1305, &Secret([5u8; aead::KEY_SIZE]))
    }

    #[test]
    fn ping_round_trips_and_verifies() {
        let c = cipher();
        let frame = encode(1_000, &[], &c);
        assert_eq!(frame.len(), wire::CTRL_SIZE_PING);
        assert!(verify(&frame, &c));
        assert_eq!(send_time(&frame), 1_000);
        assert_eq!(payload(&frame).len(), 0);
    }

    #[test]
    fn pong_payload_round_trips() {
        let p = pong::Payload { sdt: 11, rdt: 22, rst: 33 };
        let enc = pong::encode(&p);
        let dec = pong::decode(&enc);
        assert_eq!((dec.sdt, dec.rdt, dec.rst), (11, 22, 33));
    }

    #[test]
    fn tampered_frame_fails_verification() {
        let c = cipher();
        let mut frame = encode(5, &bakx::encode(true), &c);
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(!verify(&frame, &c));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let c1 = cipher();
        let c2 = Cipher::new(CipherKind::ChaCha20Poly1305, &Secret([6u8; aead::KEY_SIZE]));
        let frame = encode(5, &mtux::encode(1400), &c1);
        assert!(!verify(&frame, &c2));
    }
}
