// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

pub mod aead;
pub mod keyring;

pub use keyring::{KeyRing, KeySlot};
