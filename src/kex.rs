// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! Ephemeral X25519 key exchange, carried over the control channel's keyx message.
//!
//! Each side keeps one ephemeral scalar and publishes the corresponding point plus a 1-byte
//! AES capability flag (see [`wire::PUBLIC_KEY_BLOB_SIZE`]). Receiving a keyx derives a fresh
//! directional key pair for the ring's `next` slot and, if the peer hasn't yet echoed our
//! current public key back, re-sends our own.

use blake2::digest::{consts::U32, Mac};
use blake2::Blake2bMac;
use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::aead::{CipherKind, KEY_SIZE};
use crate::crypto::{KeyRing, KeySlot};
use crate::secret::Secret;
use crate::wire::PUBLIC_KEY_BLOB_SIZE;

type Blake2bMac256 = Blake2bMac<U32>;

/// The local and last-observed-peer public key blobs exchanged in a keyx message.
pub struct PublicState {
    pub send: [u8; PUBLIC_KEY_BLOB_SIZE],
    pub recv: [u8; PUBLIC_KEY_BLOB_SIZE],
}

pub struct KeyExchange {
    secret: StaticSecret,
    pub public: PublicState,
    aes_capable: bool,
}

fn public_blob(point: &PublicKey, aes_capable: bool) -> [u8; PUBLIC_KEY_BLOB_SIZE] {
    let mut blob = [0u8; PUBLIC_KEY_BLOB_SIZE];
    blob[..32].copy_from_slice(point.as_bytes());
    blob[32] = aes_capable as u8;
    blob
}

impl KeyExchange {
    /// Generate a fresh ephemeral scalar and clear any cached peer public key. Called both at
    /// startup and every time a data frame is recovered via `next` (see `KeyRing::decrypt`).
    pub fn reinit(aes_capable: bool) -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { public: PublicState { send: public_blob(&public, aes_capable), recv: [0u8; PUBLIC_KEY_BLOB_SIZE] }, secret, aes_capable }
    }

    pub fn reset(&mut self) {
        *self = Self::reinit(self.aes_capable);
    }

    /// Encode this side's keyx payload: our public.send followed by our public.recv.
    pub fn encode_payload(&self) -> [u8; PUBLIC_KEY_BLOB_SIZE * 2] {
        let mut out = [0u8; PUBLIC_KEY_BLOB_SIZE * 2];
        out[..PUBLIC_KEY_BLOB_SIZE].copy_from_slice(&self.public.send);
        out[PUBLIC_KEY_BLOB_SIZE..].copy_from_slice(&self.public.recv);
        out
    }

    /// Process an inbound keyx payload (peer_send || peer_recv), deriving the ring's `next`
    /// slot and reporting whether we must reply with our own keyx on this path.
    ///
    /// Returns `false` if the peer's send key is not a valid curve point (all-zero or
    /// otherwise degenerate), mirroring `crypto_scalarmult`'s failure return in the original.
    pub fn recv(&mut self, ring: &mut KeyRing, payload: &[u8]) -> bool {
        let mut peer_send = [0u8; PUBLIC_KEY_BLOB_SIZE];
        let mut peer_recv = [0u8; PUBLIC_KEY_BLOB_SIZE];
        peer_send.copy_from_slice(&payload[..PUBLIC_KEY_BLOB_SIZE]);
        peer_recv.copy_from_slice(&payload[PUBLIC_KEY_BLOB_SIZE..PUBLIC_KEY_BLOB_SIZE * 2]);

        let sync_send = peer_recv != self.public.send;

        self.public.recv = peer_send;
        ring.use_next = !sync_send;

        let mut peer_send_point = [0u8; 32];
        peer_send_point.copy_from_slice(&peer_send[..32]);
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer_send_point));
        if shared.as_bytes() == &[0u8; 32] {
            return sync_send;
        }

        let our_send = self.public.send;
        let encrypt_key = keyed_hash(ring.private_key_bytes(), shared.as_bytes(), &our_send, &peer_send);
        let decrypt_key = keyed_hash(ring.private_key_bytes(), shared.as_bytes(), &peer_send, &our_send);

        let aes = peer_send[32] == 1 && peer_recv[32] == 1;
        let kind = if aes { CipherKind::Aes256Gcm } else { CipherKind::ChaCha20Poly1305 };
        ring.next = KeySlot { encrypt: crate::crypto::aead::Cipher::new(kind, &encrypt_key), decrypt: crate::crypto::aead::Cipher::new(kind, &decrypt_key) };

        sync_send
    }
}

/// `H(salt, secret || a || b)`: BLAKE2b-256 keyed by the long-term PSK's encrypt key, hashing
/// the ECDH shared secret concatenated with the two public blobs in the order that makes our
/// encrypt-key derivation match the peer's decrypt-key derivation bit for bit.
fn keyed_hash(salt: &[u8; KEY_SIZE], shared_secret: &[u8; 32], a: &[u8; PUBLIC_KEY_BLOB_SIZE], b: &[u8; PUBLIC_KEY_BLOB_SIZE]) -> Secret<KEY_SIZE> {
    let mut mac = Blake2bMac256::new_from_slice(salt).expect("32-byte key is valid for Blake2bMac256");
    mac.update(shared_secret);
    mac.update(a);
    mac.update(b);
    let out = mac.finalize().into_bytes();
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&out);
    Secret(key)
}
