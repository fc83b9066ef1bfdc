//! Canvas payload compression and decompression handling.

use std::borrow::Cow;
use std::io::{Read, Write};

use flate2::{read::DeflateDecoder, write::ZlibEncoder, Compression};
use tracing::{instrument, warn};

use crate::error::{Error, Result};
use crate::keys::KeyStream;

/// Little-endian first two bytes of the zlib streams the game writes
pub const ZLIB_HEADERS: [u16; 4] = [0x9C78, 0xDA78, 0x0178, 0x5E78];

/// Identifies how a canvas payload is stored
///
/// Most archives store a plain zlib stream. Canvases inside `List.wz` listed images are split into
/// length-prefixed blocks whose bytes are XORed with the key stream, restarting at key byte 0 for
/// every block.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CompressionScheme {
    /// A single zlib stream
    #[default]
    Zlib,

    /// `(i32 length, encrypted bytes)` blocks that concatenate to a zlib stream
    ListWz,
}

impl CompressionScheme {
    /// Identify the scheme from the first bytes of a payload
    pub fn detect(data: &[u8]) -> Self {
        if is_zlib_header(data) {
            CompressionScheme::Zlib
        } else {
            CompressionScheme::ListWz
        }
    }
}

/// Whether `data` starts with a known zlib header
pub fn is_zlib_header(data: &[u8]) -> bool {
    data.len() >= 2 && ZLIB_HEADERS.contains(&u16::from_le_bytes([data[0], data[1]]))
}

/// Split a `List.wz` payload into its blocks
fn blocks(data: &[u8]) -> Result<Vec<&[u8]>> {
    let mut blocks = Vec::new();
    let mut position = 0usize;

    while position < data.len() {
        let header = data
            .get(position..position + 4)
            .ok_or_else(|| Error::WrongKeyOrCorrupt("truncated block header".into()))?;
        let len = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        position += 4;

        if len < 0 || len as usize > data.len() - position {
            return Err(Error::WrongKeyOrCorrupt(format!(
                "block length {len} at {:#X}",
                position - 4
            )));
        }

        blocks.push(&data[position..position + len as usize]);
        position += len as usize;
    }

    Ok(blocks)
}

/// Inflate a canvas payload to exactly `expected_len` bytes
///
/// Short output is padded with zeroes and long output is truncated. A stream that breaks off half
/// way keeps what was inflated so far.
#[instrument(skip(data, key), err)]
pub fn decompress(data: &[u8], key: &KeyStream, expected_len: usize) -> Result<Vec<u8>> {
    let stream = match CompressionScheme::detect(data) {
        CompressionScheme::Zlib => Cow::Borrowed(data),
        CompressionScheme::ListWz => Cow::Owned(
            blocks(data)?
                .into_iter()
                .flat_map(|block| {
                    let mut block = block.to_vec();
                    key.xor(&mut block);
                    block
                })
                .collect(),
        ),
    };

    if stream.len() < 2 {
        return Err(Error::WrongKeyOrCorrupt("canvas payload too short".into()));
    }

    let mut out = Vec::with_capacity(expected_len);
    let mut decoder = DeflateDecoder::new(&stream[2..]).take(expected_len as u64);
    if let Err(e) = decoder.read_to_end(&mut out) {
        if out.is_empty() {
            return Err(Error::WrongKeyOrCorrupt(format!("inflate failed: {e}")));
        }
        warn!(inflated = out.len(), expected_len, "canvas payload ended early: {e}");
    }

    out.resize(expected_len, 0);
    Ok(out)
}

/// Deflate raw pixel data into a payload using `scheme`
#[instrument(skip(raw, key), fields(len = raw.len()), err)]
pub fn compress(raw: &[u8], scheme: CompressionScheme, key: &KeyStream) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    let stream = encoder.finish()?;

    Ok(match scheme {
        CompressionScheme::Zlib => stream,
        CompressionScheme::ListWz => {
            let mut out = Vec::with_capacity(stream.len() + 8);
            for block in [&stream[..2], &stream[2..]] {
                let mut block = block.to_vec();
                key.xor(&mut block);
                out.extend_from_slice(&(block.len() as i32).to_le_bytes());
                out.extend_from_slice(&block);
            }
            out
        }
    })
}

/// Re-encrypt a `List.wz` payload for another key without inflating it.
///
/// Plain zlib payloads are returned unchanged.
#[instrument(skip(data, old, new), err)]
pub fn rekey(data: &[u8], old: &KeyStream, new: &KeyStream) -> Result<Vec<u8>> {
    if CompressionScheme::detect(data) == CompressionScheme::Zlib {
        return Ok(data.to_vec());
    }

    let mut out = Vec::with_capacity(data.len());
    for block in blocks(data)? {
        let old = old.prefix(block.len());
        let new = new.prefix(block.len());

        out.extend_from_slice(&(block.len() as i32).to_le_bytes());
        out.extend(
            block
                .iter()
                .zip(old.iter().zip(new.iter()))
                .map(|(b, (o, n))| b ^ o ^ n),
        );
    }

    Ok(out)
}
