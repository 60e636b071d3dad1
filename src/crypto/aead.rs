// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! AEAD dispatch between AES-256-GCM and ChaCha20-Poly1305.
//!
//! Both data frames and control frames are expressed as one AEAD call each, but control
//! frames always encrypt a zero-length plaintext under a fixed all-zero nonce -- the AEAD is
//! used purely as a MAC over the frame's header and payload, never to produce ciphertext.

use aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;

use crate::secret::Secret;
use crate::wire::TAG_SIZE;

pub const KEY_SIZE: usize = 32;
/// Nonce length both ciphers use here: a 6-byte header zero-padded to the cipher's 96-bit nonce.
pub const NONCE_SIZE: usize = 12;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CipherKind {
    Aes256Gcm,
    ChaCha20Poly1305,
}

pub enum Cipher {
    Aes256Gcm(Box<Aes256Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
}

impl Cipher {
    pub fn new(kind: CipherKind, key: &Secret<KEY_SIZE>) -> Self {
        match kind {
            CipherKind::Aes256Gcm => Self::Aes256Gcm(Box::new(Aes256Gcm::new(key.as_bytes().into()))),
            CipherKind::ChaCha20Poly1305 => Self::ChaCha20Poly1305(Box::new(ChaCha20Poly1305::new(key.as_bytes().into()))),
        }
    }

    pub fn kind(&self) -> CipherKind {
        match self {
            Self::Aes256Gcm(_) => CipherKind::Aes256Gcm,
            Self::ChaCha20Poly1305(_) => CipherKind::ChaCha20Poly1305,
        }
    }

    /// Encrypt `plaintext` in place inside `buf` (which must already hold `plaintext` at its
    /// front and have `TAG_SIZE` bytes of trailing room), returning the detached tag.
    fn seal(&self, nonce: &[u8; NONCE_SIZE], ad: &[u8], buf: &mut [u8]) -> [u8; TAG_SIZE] {
        let tag = match self {
            Self::Aes256Gcm(c) => c.encrypt_in_place_detached(nonce.into(), ad, buf),
            Self::ChaCha20Poly1305(c) => c.encrypt_in_place_detached(nonce.into(), ad, buf),
        }
        .expect("buffer large enough for AEAD seal");
        let mut out = [0u8; TAG_SIZE];
        out.copy_from_slice(tag.as_slice());
        out
    }

    fn open(&self, nonce: &[u8; NONCE_SIZE], ad: &[u8], buf: &mut [u8], tag: &[u8; TAG_SIZE]) -> bool {
        let tag = aead::generic_array::GenericArray::from_slice(tag);
        match self {
            Self::Aes256Gcm(c) => c.decrypt_in_place_detached(nonce.into(), ad, buf, tag).is_ok(),
            Self::ChaCha20Poly1305(c) => c.decrypt_in_place_detached(nonce.into(), ad, buf, tag).is_ok(),
        }
    }
}

fn data_nonce(nonce48: &[u8; 6]) -> [u8; NONCE_SIZE] {
    let mut n = [0u8; NONCE_SIZE];
    n[..6].copy_from_slice(nonce48);
    n
}

/// Encrypt a data-plane frame's payload in place. `buf` holds the plaintext on entry and must
/// have `TAG_SIZE` bytes of spare room at the end; on return it holds ciphertext||tag.
pub fn seal_data(cipher: &Cipher, nonce48: &[u8; 6], buf: &mut Vec<u8>) {
    let nonce = data_nonce(nonce48);
    let mut body = std::mem::take(buf);
    let tag = cipher.seal(&nonce, nonce48, &mut body);
    body.extend_from_slice(&tag);
    *buf = body;
}

/// Decrypt a data-plane frame's ciphertext (without its trailing tag) in place.
pub fn open_data(cipher: &Cipher, nonce48: &[u8; 6], ciphertext: &mut [u8], tag: &[u8; TAG_SIZE]) -> bool {
    let nonce = data_nonce(nonce48);
    cipher.open(&nonce, nonce48, ciphertext, tag)
}

/// Produce the MAC for a control packet: AEAD-seal an empty plaintext under an all-zero
/// nonce with `ad` (the packet's header and payload) as associated data.
pub fn mac_ctrl(cipher: &Cipher, ad: &[u8]) -> [u8; TAG_SIZE] {
    let nonce = [0u8; NONCE_SIZE];
    let mut empty: Vec<u8> = Vec::new();
    cipher.seal(&nonce, ad, &mut empty)
}

/// Verify a control packet's MAC.
pub fn verify_ctrl(cipher: &Cipher, ad: &[u8], tag: &[u8; TAG_SIZE]) -> bool {
    let nonce = [0u8; NONCE_SIZE];
    let mut empty: Vec<u8> = Vec::new();
    cipher.open(&nonce, ad, &mut empty, tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> Secret<KEY_SIZE> {
        Secret([b; KEY_SIZE])
    }

    #[test]
    fn data_round_trip_both_ciphers() {
        for kind in [CipherKind::Aes256Gcm, CipherKind::ChaCha20Poly1305] {
            let c = Cipher::new(kind, &key(7));
            let nonce: [u8; 6] = [1, 2, 3, 4, 5, 6];
            let mut buf = b"hello path".to_vec();
            seal_data(&c, &nonce, &mut buf);
            let tag_start = buf.len() - TAG_SIZE;
            let mut tag = [0u8; TAG_SIZE];
            tag.copy_from_slice(&buf[tag_start..]);
            let mut ciphertext = buf[..tag_start].to_vec();
            assert!(open_data(&c, &nonce, &mut ciphertext, &tag));
            assert_eq!(ciphertext, b"hello path");
        }
    }

    #[test]
    fn data_decrypt_rejects_wrong_key() {
        let c1 = Cipher::new(CipherKind::Aes256Gcm, &key(1));
        let c2 = Cipher::new(CipherKind::Aes256Gcm, &key(2));
        let nonce: [u8; 6] = [9, 9, 9, 9, 9, 9];
        let mut buf = b"data".to_vec();
        seal_data(&c1, &nonce, &mut buf);
        let tag_start = buf.len() - TAG_SIZE;
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&buf[tag_start..]);
        let mut ciphertext = buf[..tag_start].to_vec();
        assert!(!open_data(&c2, &nonce, &mut ciphertext, &tag));
    }

    #[test]
    fn ctrl_mac_round_trips_with_empty_plaintext() {
        let c = Cipher::new(CipherKind::ChaCha20Poly1305, &key(3));
        let ad = b"zeros+time+payload";
        let tag = mac_ctrl(&c, ad);
        assert!(verify_ctrl(&c, ad, &tag));
    }

    #[test]
    fn ctrl_mac_rejects_tampered_ad() {
        let c = Cipher::new(CipherKind::Aes256Gcm, &key(4));
        let tag = mac_ctrl(&c, b"original");
        assert!(!verify_ctrl(&c, b"tampered", &tag));
    }
}
