//! Inline receive frame parser
//!
//! The reply to `AT+NSORF` bypasses the response matcher and is read straight
//! off the stream:
//!
//! ```text
//! <id>,<ip>,<port>,<len>,<hex payload>\r\n
//! ```
//!
//! The payload has no terminator of its own; its size comes from the
//! notification that announced it. Parsing is a walk over a fixed token
//! layout, one byte at a time, each read bounded by a short timeout.

use crate::core::codec::decode_pair;
use crate::core::error::ModemError;
use crate::core::socket::SocketConfig;
use crate::core::transport::RawReader;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Longest header field accepted before the frame is considered garbage
pub const MAX_FIELD_LEN: usize = 64;

/// Single-byte source with a per-read timeout
#[async_trait]
pub trait ByteSource: Send {
    /// Next byte, or `None` if nothing arrived within `timeout`
    async fn next_byte(&mut self, timeout: Duration) -> Option<u8>;
}

/// [`ByteSource`] over a transport's raw reader
pub struct RawByteSource<'a> {
    reader: &'a dyn RawReader,
}

impl<'a> RawByteSource<'a> {
    /// Wrap a raw reader
    pub fn new(reader: &'a dyn RawReader) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl ByteSource for RawByteSource<'_> {
    async fn next_byte(&mut self, timeout: Duration) -> Option<u8> {
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte, timeout).await {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }
}

/// Buffered bytes; an empty queue behaves like a timed-out read
#[async_trait]
impl ByteSource for VecDeque<u8> {
    async fn next_byte(&mut self, _timeout: Duration) -> Option<u8> {
        self.pop_front()
    }
}

/// Per-byte read bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTimeouts {
    /// Bound for bytes of the first field (the modem may still be turning around)
    pub first_byte: Duration,
    /// Bound for every other byte
    pub byte: Duration,
}

impl Default for FrameTimeouts {
    fn default() -> Self {
        Self {
            first_byte: Duration::from_millis(20),
            byte: Duration::from_millis(10),
        }
    }
}

impl From<&SocketConfig> for FrameTimeouts {
    fn from(config: &SocketConfig) -> Self {
        Self {
            first_byte: Duration::from_millis(config.first_byte_timeout_ms),
            byte: Duration::from_millis(config.byte_timeout_ms),
        }
    }
}

/// Part of the frame being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameField {
    /// Echoed socket id
    SocketId,
    /// Remote address
    Address,
    /// Remote port
    Port,
    /// Repeated byte count
    Length,
    /// Hex payload
    Payload,
}

impl fmt::Display for FrameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SocketId => "socket id",
            Self::Address => "ip address",
            Self::Port => "port",
            Self::Length => "data length",
            Self::Payload => "data",
        };
        f.write_str(name)
    }
}

/// Frame parse errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// A byte read timed out
    #[error("Short read in {0}")]
    ShortRead(FrameField),

    /// A payload digit pair was not hex
    #[error("Invalid hex in payload byte {index}")]
    InvalidHex {
        /// Payload byte position
        index: usize,
    },

    /// A header field never reached its delimiter
    #[error("Field {0} exceeds {max} bytes", max = MAX_FIELD_LEN)]
    FieldTooLong(FrameField),

    /// The payload buffer could not be reserved
    #[error("Cannot allocate {0} byte receive buffer")]
    OutOfMemory(usize),
}

impl From<FrameError> for ModemError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::ShortRead(_) => ModemError::Timeout,
            FrameError::OutOfMemory(_) => ModemError::OutOfMemory,
            other => ModemError::ParseFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Token {
    Field(FrameField),
    HexBlock,
    Terminator,
}

const LAYOUT: [Token; 6] = [
    Token::Field(FrameField::SocketId),
    Token::Field(FrameField::Address),
    Token::Field(FrameField::Port),
    Token::Field(FrameField::Length),
    Token::HexBlock,
    Token::Terminator,
];

/// Parser over a [`ByteSource`]
pub struct FrameReader<'s, S: ByteSource> {
    source: &'s mut S,
    timeouts: FrameTimeouts,
}

impl<'s, S: ByteSource> FrameReader<'s, S> {
    /// Create a parser
    pub fn new(source: &'s mut S, timeouts: FrameTimeouts) -> Self {
        Self { source, timeouts }
    }

    /// Read one frame carrying `len` payload bytes
    ///
    /// Header fields are consumed and discarded. On success the stream is
    /// positioned after the line feed that ends the frame.
    pub async fn read_frame(&mut self, len: usize) -> Result<Bytes, FrameError> {
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(len)
            .map_err(|_| FrameError::OutOfMemory(len))?;

        for (index, token) in LAYOUT.iter().enumerate() {
            match *token {
                Token::Field(field) => {
                    let timeout = if index == 0 {
                        self.timeouts.first_byte
                    } else {
                        self.timeouts.byte
                    };
                    self.skip_field(field, timeout).await?;
                }
                Token::HexBlock => {
                    for index in 0..len {
                        let hi = self.payload_byte().await?;
                        let lo = self.payload_byte().await?;
                        let byte =
                            decode_pair(hi, lo).map_err(|_| FrameError::InvalidHex { index })?;
                        payload.push(byte);
                    }
                }
                Token::Terminator => {
                    self.drain_line().await;
                }
            }
        }

        Ok(Bytes::from(payload))
    }

    /// Discard bytes through the next line feed
    ///
    /// Returns `false` if the stream went quiet first.
    pub async fn drain_line(&mut self) -> bool {
        while let Some(byte) = self.source.next_byte(self.timeouts.byte).await {
            if byte == b'\n' {
                return true;
            }
        }
        false
    }

    async fn skip_field(&mut self, field: FrameField, timeout: Duration) -> Result<(), FrameError> {
        let mut consumed = 0usize;
        loop {
            match self.source.next_byte(timeout).await {
                Some(b',') => return Ok(()),
                Some(_) => {
                    consumed += 1;
                    if consumed > MAX_FIELD_LEN {
                        return Err(FrameError::FieldTooLong(field));
                    }
                }
                None => return Err(FrameError::ShortRead(field)),
            }
        }
    }

    async fn payload_byte(&mut self) -> Result<u8, FrameError> {
        self.source
            .next_byte(self.timeouts.byte)
            .await
            .ok_or(FrameError::ShortRead(FrameField::Payload))
    }
}

/// Discard raw input in small reads until a read comes back short
pub async fn drain_until_idle(reader: &dyn RawReader, timeout: Duration) -> usize {
    const DRAIN_CHUNK: usize = 20;

    let mut drained = 0;
    let mut buf = [0u8; DRAIN_CHUNK];
    loop {
        match reader.read(&mut buf, timeout).await {
            Ok(n) => {
                drained += n;
                if n < DRAIN_CHUNK {
                    return drained;
                }
            }
            Err(_) => return drained,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(text: &str) -> VecDeque<u8> {
        text.bytes().collect()
    }

    async fn parse(text: &str, len: usize) -> (Result<Bytes, FrameError>, VecDeque<u8>) {
        let mut src = source(text);
        let result = FrameReader::new(&mut src, FrameTimeouts::default())
            .read_frame(len)
            .await;
        (result, src)
    }

    #[tokio::test]
    async fn test_read_frame() {
        let (result, rest) = parse("1,93.184.216.34,5683,4,DEADbeef\r\nOK\r\n", 4).await;
        assert_eq!(result.unwrap(), Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]));
        assert_eq!(rest, source("OK\r\n"));
    }

    #[tokio::test]
    async fn test_short_read_in_each_field() {
        let cases = [
            ("1", FrameField::SocketId),
            ("1,10.0.0.1", FrameField::Address),
            ("1,10.0.0.1,80", FrameField::Port),
            ("1,10.0.0.1,80,2", FrameField::Length),
            ("1,10.0.0.1,80,2,AB", FrameField::Payload),
            ("1,10.0.0.1,80,2,ABC", FrameField::Payload),
        ];
        for (text, field) in cases {
            let (result, _) = parse(text, 2).await;
            assert_eq!(result, Err(FrameError::ShortRead(field)), "input {text:?}");
        }
    }

    #[tokio::test]
    async fn test_missing_terminator_is_tolerated() {
        let (result, rest) = parse("0,10.0.0.1,80,1,7F", 1).await;
        assert_eq!(result.unwrap(), Bytes::from_static(&[0x7F]));
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_hex() {
        let mut src = source("0,10.0.0.1,80,2,01ZZ\r\nNEXT");
        let mut reader = FrameReader::new(&mut src, FrameTimeouts::default());
        assert_eq!(reader.read_frame(2).await, Err(FrameError::InvalidHex { index: 1 }));
        assert!(reader.drain_line().await);
        assert_eq!(src, source("NEXT"));
    }

    #[tokio::test]
    async fn test_runaway_field() {
        let text = "9".repeat(MAX_FIELD_LEN + 5);
        let (result, _) = parse(&text, 1).await;
        assert_eq!(result, Err(FrameError::FieldTooLong(FrameField::SocketId)));
        assert_eq!(
            FrameError::FieldTooLong(FrameField::SocketId).to_string(),
            "Field socket id exceeds 64 bytes"
        );
    }

    #[tokio::test]
    async fn test_unreservable_buffer() {
        let (result, rest) = parse("0,10.0.0.1,80,1,00\r\n", usize::MAX).await;
        assert_eq!(result, Err(FrameError::OutOfMemory(usize::MAX)));
        assert_eq!(rest.len(), "0,10.0.0.1,80,1,00\r\n".len());
    }

    #[test]
    fn test_error_mapping() {
        assert!(ModemError::from(FrameError::ShortRead(FrameField::Port)).is_timeout());
        assert!(matches!(
            ModemError::from(FrameError::OutOfMemory(8)),
            ModemError::OutOfMemory
        ));
        assert!(matches!(
            ModemError::from(FrameError::InvalidHex { index: 0 }),
            ModemError::ParseFailed(_)
        ));
    }
}
