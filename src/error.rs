// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

/// Errors returned by the engine's public configuration and I/O entry points.
///
/// Conditions that the receive path recovers from on its own -- short packets, failed MACs,
/// stale timestamps, unrecognized source addresses, a key ring that has exhausted every slot --
/// are never represented here. Those are dropped silently and the engine keeps running; see
/// `crypto::keyring` and `engine::Engine::recv`.
pub enum Error {
    /// A supplied argument was invalid: an MTU outside the allowed range, an empty key, or a
    /// malformed numeric address literal.
    InvalidArgument,

    /// Allocation of a new path failed.
    OutOfMemory,

    /// The plaintext is larger than the path's negotiated MTU.
    MessageTooBig,

    /// The underlying transport reported an error.
    Io(std::io::Error),
}

impl From<std::io::Error> for Error {
    #[cold]
    #[inline(never)]
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("InvalidArgument"),
            Self::OutOfMemory => f.write_str("OutOfMemory"),
            Self::MessageTooBig => f.write_str("MessageTooBig"),
            Self::Io(e) => f.write_str(format!("Io({})", e).as_str()),
        }
    }
}

impl std::fmt::Debug for Error {
    #[inline(always)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
