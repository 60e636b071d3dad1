// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! The four-slot data-plane key ring: `private` (long-term, authenticates control traffic),
//! `last`, `current`, and `next` (rotating data-plane keys).
//!
//! `current` and `next` start out zero-keyed under ChaCha20-Poly1305 -- the same bootstrap
//! state on both peers -- until the first key exchange populates `next` with a real ECDH
//! result and it is promoted into `current` on the first successful decrypt under it.

use crate::crypto::aead::{self, Cipher, CipherKind};
use crate::secret::Secret;
use crate::wire::TAG_SIZE;

pub struct KeySlot {
    pub encrypt: Cipher,
    pub decrypt: Cipher,
}

impl KeySlot {
    pub fn zero() -> Self {
        let z = Secret::<{ aead::KEY_SIZE }>::default();
        Self {
            encrypt: Cipher::new(CipherKind::ChaCha20Poly1305, &z),
            decrypt: Cipher::new(CipherKind::ChaCha20Poly1305, &z),
        }
    }

    pub fn same_key(kind: CipherKind, key: &Secret<{ aead::KEY_SIZE }>) -> Self {
        Self { encrypt: Cipher::new(kind, key), decrypt: Cipher::new(kind, key) }
    }
}

pub struct KeyRing {
    pub private: KeySlot,
    private_key: Secret<{ aead::KEY_SIZE }>,
    pub last: KeySlot,
    pub current: KeySlot,
    pub next: KeySlot,
    /// Prefer AES-256-GCM for newly negotiated keys when the local build supports it.
    pub prefer_aes: bool,
    /// True once a keyx has made `next` ready to take over from `current`.
    pub use_next: bool,
    /// Set when a data frame fails to decrypt under every slot; cleared once a fresh keyx
    /// is sent on the next control tick.
    pub bad_key: bool,
}

impl KeyRing {
    pub fn new(prefer_aes: bool) -> Self {
        Self {
            private: KeySlot::zero(),
            private_key: Secret::default(),
            last: KeySlot::zero(),
            current: KeySlot::zero(),
            next: KeySlot::zero(),
            prefer_aes,
            use_next: false,
            bad_key: false,
        }
    }

    pub fn set_key(&mut self, key: &Secret<{ aead::KEY_SIZE }>) {
        // Installs into every slot, mirroring mud_set_key: the data-plane slots start out
        // keyed the same as `private` until the first key exchange gives them their own
        // ECDH-derived keys, so a fresh PSK immediately invalidates whatever the peer is
        // still encrypting under its old one.
        self.private = KeySlot::same_key(CipherKind::ChaCha20Poly1305, key);
        self.last = KeySlot::same_key(CipherKind::ChaCha20Poly1305, key);
        self.current = KeySlot::same_key(CipherKind::ChaCha20Poly1305, key);
        self.next = KeySlot::same_key(CipherKind::ChaCha20Poly1305, key);
        self.private_key = key.clone();
    }

    /// The long-term PSK's raw bytes, used as the salt for deriving data-plane keys during
    /// key exchange (see `kex::KeyExchange::recv`).
    pub fn private_key_bytes(&self) -> &[u8; aead::KEY_SIZE] {
        self.private_key.as_bytes()
    }

    /// Encrypt a data frame's payload in place under `current` (or `next` once committed).
    pub fn encrypt(&self, nonce48: &[u8; 6], buf: &mut Vec<u8>) {
        let slot = if self.use_next { &self.next } else { &self.current };
        aead::seal_data(&slot.encrypt, nonce48, buf);
    }

    /// Try every slot in the fallback order mandated by the protocol: `current`, then
    /// `next` (promoting on success), then `last`, then `private`. Returns the recovered
    /// plaintext and whether this call just promoted `next` into `current` -- the caller
    /// needs that signal to re-initialize its ephemeral keypair on every such promotion,
    /// not just the first one after `use_next` was set.
    pub fn decrypt(&mut self, nonce48: &[u8; 6], ciphertext: &[u8], tag: &[u8; TAG_SIZE]) -> Option<(Vec<u8>, bool)> {
        let mut buf = ciphertext.to_vec();
        if aead::open_data(&self.current.decrypt, nonce48, &mut buf, tag) {
            return Some((buf, false));
        }

        let mut buf = ciphertext.to_vec();
        if aead::open_data(&self.next.decrypt, nonce48, &mut buf, tag) {
            self.last = std::mem::replace(&mut self.current, std::mem::replace(&mut self.next, KeySlot::zero()));
            self.use_next = false;
            return Some((buf, true));
        }

        let mut buf = ciphertext.to_vec();
        if aead::open_data(&self.last.decrypt, nonce48, &mut buf, tag) {
            return Some((buf, false));
        }

        let mut buf = ciphertext.to_vec();
        if aead::open_data(&self.private.decrypt, nonce48, &mut buf, tag) {
            return Some((buf, false));
        }

        None
    }
}
