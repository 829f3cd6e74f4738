//! Hex encoding, decoding and send chunking

use super::CodecError;
use bytes::Bytes;

/// Encode bytes as uppercase hex, two digits per byte
pub fn encode_upper(data: &[u8]) -> String {
    ::hex::encode_upper(data)
}

/// Decode a hex string (either case, no separators)
pub fn decode(text: &str) -> Result<Bytes, CodecError> {
    ::hex::decode(text).map(Bytes::from).map_err(map_hex_error)
}

/// Decode one digit pair as it arrives off the wire
pub fn decode_pair(hi: u8, lo: u8) -> Result<u8, CodecError> {
    let mut out = [0u8; 1];
    ::hex::decode_to_slice([hi, lo], &mut out).map_err(map_hex_error)?;
    Ok(out[0])
}

fn map_hex_error(err: ::hex::FromHexError) -> CodecError {
    match err {
        ::hex::FromHexError::InvalidHexCharacter { c, index } => {
            CodecError::InvalidCharacter(index, c)
        }
        ::hex::FromHexError::OddLength => {
            CodecError::InvalidFormat("Hex string must have even number of digits".to_string())
        }
        other => CodecError::InvalidFormat(other.to_string()),
    }
}

/// One encoded piece of a send payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexChunk {
    /// Offset of the chunk in the original payload
    pub offset: usize,
    /// Raw byte count carried by this chunk
    pub len: usize,
    /// Uppercase hex of the chunk
    pub hex: String,
}

/// Iterator over encoded chunks of a payload
pub struct HexChunks<'a> {
    data: &'a [u8],
    max: usize,
    offset: usize,
}

impl Iterator for HexChunks<'_> {
    type Item = HexChunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let end = (self.offset + self.max).min(self.data.len());
        let chunk = HexChunk {
            offset: self.offset,
            len: end - self.offset,
            hex: encode_upper(&self.data[self.offset..end]),
        };
        self.offset = end;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.data.len() - self.offset).div_ceil(self.max);
        (remaining, Some(remaining))
    }
}

/// Split `data` into chunks of at most `max` bytes, each hex encoded
pub fn hex_chunks(data: &[u8], max: usize) -> HexChunks<'_> {
    HexChunks {
        data,
        max: max.max(1),
        offset: 0,
    }
}
