//! Hex payload codec for the socket data path
//!
//! The modem moves socket payloads as ASCII hex: uppercase two-digit pairs
//! on the way out, any-case pairs read back inline on the way in.

mod hex;

pub use self::hex::{decode, decode_pair, encode_upper, hex_chunks, HexChunk, HexChunks};

/// Largest payload the modem accepts in a single send command
pub const MAX_CHUNK_SIZE: usize = 1358;

/// Codec errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// Invalid input format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Invalid character
    #[error("Invalid character at position {0}: {1:?}")]
    InvalidCharacter(usize, char),
}
