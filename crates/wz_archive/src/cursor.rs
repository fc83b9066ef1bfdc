//! Shared archive handle and the primitive reader used by every decoder.

use std::fmt::{self, Debug};
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{instrument, trace};

use crate::error::{Error, Result};
use crate::keys::KeyStream;

/// Constant mixed into every encrypted offset
pub const OFFSET_CONSTANT: u32 = 0x581C_3F6D;

/// Anything an archive can be read from
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// The one open handle every lazily parsed node of an archive reads through.
///
/// All access goes through a mutex: acquire, remember the position, seek, read, restore, release.
/// Closing the cursor drops the handle; reads issued afterwards fail with
/// [`Error::LifetimeViolation`].
pub struct ArchiveCursor {
    source: Mutex<Option<Box<dyn ReadSeek>>>,
    len: u64,
}

impl Debug for ArchiveCursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ArchiveCursor(len: {}, open: {})", self.len, self.is_open())
    }
}

impl ArchiveCursor {
    /// Wrap a byte source
    pub fn new<R: Read + Seek + Send + 'static>(mut source: R) -> Result<Self> {
        let len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        Ok(Self {
            source: Mutex::new(Some(Box::new(source))),
            len,
        })
    }

    /// A cursor without a source, for archives built in memory
    pub fn detached() -> Self {
        Self {
            source: Mutex::new(None),
            len: 0,
        }
    }

    /// Length of the underlying source in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the source is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the source is still available
    pub fn is_open(&self) -> bool {
        self.source.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Drop the underlying handle
    pub fn close(&self) {
        if let Ok(mut source) = self.source.lock() {
            source.take();
        }
    }

    /// Copy `len` bytes starting at `offset`
    #[instrument(skip(self), err)]
    pub fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        if offset.checked_add(len).map_or(true, |end| end > self.len) {
            return Err(Error::WrongKeyOrCorrupt(format!(
                "range {offset:#X}+{len} exceeds archive length {}",
                self.len
            )));
        }

        self.with_reader_at(offset, |source| {
            let mut buffer = vec![0u8; len as usize];
            source.read_exact(&mut buffer)?;
            Ok(buffer)
        })
    }

    /// Run `f` with the source positioned at `offset`. The previous position is restored afterwards.
    pub fn with_reader_at<T>(
        &self,
        offset: u64,
        f: impl FnOnce(&mut dyn ReadSeek) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.source.lock()?;
        let source = guard
            .as_mut()
            .ok_or_else(|| Error::LifetimeViolation(format!("bytes at {offset:#X}")))?;

        let previous = source.stream_position()?;
        source.seek(SeekFrom::Start(offset))?;
        trace!(offset, "cursor acquired");
        let result = f(source.as_mut());
        source.seek(SeekFrom::Start(previous))?;
        result
    }
}

/// Encryption applied to offsets in the directory table
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OffsetCodec {
    /// Where the data section of the archive starts
    pub data_start: u32,

    /// Hash of the game patch version
    pub hash: u32,
}

impl OffsetCodec {
    fn mask(&self, position: u32) -> u32 {
        let mut offset = position.wrapping_sub(self.data_start) ^ 0xFFFF_FFFF;
        offset = offset.wrapping_mul(self.hash);
        offset = offset.wrapping_sub(OFFSET_CONSTANT);
        offset.rotate_left(offset & 0x1F)
    }

    /// Recover the offset stored at `position`
    pub fn decode(&self, position: u32, stored: u32) -> u32 {
        (self.mask(position) ^ stored).wrapping_add(self.data_start.wrapping_mul(2))
    }

    /// Value to store at `position` so that it decodes to `value`
    pub fn encode(&self, position: u32, value: u32) -> u32 {
        self.mask(position) ^ value.wrapping_sub(self.data_start.wrapping_mul(2))
    }
}

/// Primitive reader over an archive or an image buffer
pub struct WzReader<R> {
    inner: R,
    len: u64,
    key: Arc<KeyStream>,
    offsets: Option<OffsetCodec>,
}

impl<R: Read + Seek> WzReader<R> {
    /// Wrap `inner`, remembering its total length for bounds checks
    pub fn new(mut inner: R, key: Arc<KeyStream>) -> Result<Self> {
        let current = inner.stream_position()?;
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(current))?;
        Ok(Self {
            inner,
            len,
            key,
            offsets: None,
        })
    }

    /// Enable [`WzReader::read_offset`]
    pub fn with_offsets(mut self, offsets: OffsetCodec) -> Self {
        self.set_offsets(offsets);
        self
    }

    pub fn set_offsets(&mut self, offsets: OffsetCodec) {
        self.offsets = Some(offsets);
    }

    /// Decrypt strings read from now on with `key`
    pub fn set_key(&mut self, key: Arc<KeyStream>) {
        self.key = key;
    }

    /// The key stream strings are decrypted with
    pub fn key(&self) -> &Arc<KeyStream> {
        &self.key
    }

    /// Total length of the underlying stream
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the underlying stream is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Unwrap the inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn skip(&mut self, count: i64) -> Result<()> {
        self.inner.seek(SeekFrom::Current(count))?;
        Ok(())
    }

    /// Bytes left before the end of the stream
    pub fn remaining(&mut self) -> Result<u64> {
        Ok(self.len.saturating_sub(self.position()?))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8()?)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.inner.read_i8()?)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.inner.read_u16::<LittleEndian>()?)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.inner.read_i16::<LittleEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.inner.read_u32::<LittleEndian>()?)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.inner.read_i32::<LittleEndian>()?)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.inner.read_i64::<LittleEndian>()?)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(self.inner.read_f32::<LittleEndian>()?)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(self.inner.read_f64::<LittleEndian>()?)
    }

    /// Check that `len` more bytes exist, returning it as a `usize`
    pub fn check_length(&mut self, len: i64, what: &str) -> Result<usize> {
        let remaining = self.remaining()?;
        if len < 0 || len as u64 > remaining {
            return Err(Error::WrongKeyOrCorrupt(format!(
                "{what} length {len} with {remaining} bytes remaining"
            )));
        }
        Ok(len as usize)
    }

    /// Read exactly `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let len = self.check_length(len as i64, "block")?;
        let mut buffer = vec![0u8; len];
        self.inner.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// An `i8`, or an `i32` when the byte is `-128`
    pub fn read_compressed_int(&mut self) -> Result<i32> {
        match self.read_i8()? {
            i8::MIN => self.read_i32(),
            small => Ok(small as i32),
        }
    }

    /// An `i8`, or an `i64` when the byte is `-128`
    pub fn read_compressed_long(&mut self) -> Result<i64> {
        match self.read_i8()? {
            i8::MIN => self.read_i64(),
            small => Ok(small as i64),
        }
    }

    /// A compressed int that must be a valid length for the rest of the stream
    pub fn read_length(&mut self, what: &str) -> Result<usize> {
        let len = self.read_compressed_int()?;
        self.check_length(len as i64, what)
    }

    /// A compressed length followed by that many bytes
    pub fn read_blob(&mut self) -> Result<Vec<u8>> {
        let len = self.read_length("blob")?;
        self.read_bytes(len)
    }

    /// `len` bytes XORed with the key stream from its first byte
    pub fn read_decrypted(&mut self, len: usize, key: &KeyStream) -> Result<Vec<u8>> {
        let mut bytes = self.read_bytes(len)?;
        key.xor(&mut bytes);
        Ok(bytes)
    }

    /// An encrypted string
    ///
    /// A negative length byte marks single byte characters, a positive one UTF-16 code units.
    pub fn read_string(&mut self) -> Result<String> {
        let small = self.read_i8()?;
        match small {
            0 => Ok(String::new()),
            s if s > 0 => {
                let len = match s {
                    i8::MAX => self.read_i32()? as i64,
                    s => s as i64,
                };
                let len = self.check_length(len.saturating_mul(2), "string")? / 2;
                let raw = self.read_bytes(len * 2)?;
                decode_wide(&raw, &self.key)
            }
            s => {
                let len = match s {
                    i8::MIN => self.read_i32()? as i64,
                    s => -(s as i64),
                };
                let len = self.check_length(len, "string")?;
                let raw = self.read_bytes(len)?;
                decode_narrow(&raw, &self.key)
            }
        }
    }

    /// An encrypted string stored at `offset`; the position is restored afterwards
    pub fn read_string_at(&mut self, offset: u64) -> Result<String> {
        let current = self.position()?;
        if offset >= self.len {
            return Err(Error::WrongKeyOrCorrupt(format!(
                "string offset {offset:#X} past end of stream"
            )));
        }
        self.seek(offset)?;
        let value = self.read_string();
        self.seek(current)?;
        value
    }

    /// A string that is either inline (`0x00`, `0x73`) or a reference relative to `base` (`0x01`, `0x1B`)
    pub fn read_string_block(&mut self, base: u64) -> Result<String> {
        match self.read_u8()? {
            0x00 | 0x73 => self.read_string(),
            0x01 | 0x1B => {
                let offset = self.read_i32()?;
                self.read_string_at(base.wrapping_add_signed(offset as i64))
            }
            tag => Err(Error::WrongKeyOrCorrupt(format!(
                "string block tag {tag:#04X}"
            ))),
        }
    }

    /// An encrypted directory offset
    pub fn read_offset(&mut self) -> Result<u32> {
        let offsets = self.offsets.ok_or_else(|| {
            Error::CustomError("offsets read without a version hash".into())
        })?;
        let position = self.position()? as u32;
        let stored = self.read_u32()?;
        Ok(offsets.decode(position, stored))
    }
}

fn is_plausible(c: u32) -> bool {
    c >= 0x20 || c == 0x09 || c == 0x0A || c == 0x0D
}

/// Refuse strings the decoders would reject on the way back in
pub(crate) fn check_storable(value: &str) -> Result<()> {
    match value.chars().find(|c| !is_plausible(*c as u32)) {
        Some(c) => Err(Error::InvalidOperation(format!(
            "control character {:#06X} cannot be stored in {value:?}",
            c as u32
        ))),
        None => Ok(()),
    }
}

/// Decrypt a single byte string. Bytes above `0x7F` or stray control characters mean the key was wrong.
pub(crate) fn decode_narrow(raw: &[u8], key: &KeyStream) -> Result<String> {
    key.with_bytes(raw.len(), |k| {
        let mut mask = 0xAAu8;
        let mut out = String::with_capacity(raw.len());
        for (i, b) in raw.iter().enumerate() {
            let c = b ^ mask ^ k[i];
            mask = mask.wrapping_add(1);
            if c > 0x7F || !is_plausible(c as u32) {
                return Err(Error::WrongKeyOrCorrupt(format!(
                    "undecodable byte {c:#04X} in string"
                )));
            }
            out.push(c as char);
        }
        Ok(out)
    })
}

/// Decrypt a UTF-16 string. Lone surrogates or stray control characters mean the key was wrong.
pub(crate) fn decode_wide(raw: &[u8], key: &KeyStream) -> Result<String> {
    let units = key.with_bytes(raw.len(), |k| {
        let mut mask = 0xAAAAu16;
        raw.chunks_exact(2)
            .enumerate()
            .map(|(i, pair)| {
                let unit = u16::from_le_bytes([pair[0], pair[1]]);
                let key = u16::from_le_bytes([k[2 * i], k[2 * i + 1]]);
                let c = unit ^ mask ^ key;
                mask = mask.wrapping_add(1);
                c
            })
            .collect::<Vec<_>>()
    });

    if let Some(c) = units.iter().find(|c| !is_plausible(**c as u32)) {
        return Err(Error::WrongKeyOrCorrupt(format!(
            "undecodable unit {c:#06X} in string"
        )));
    }
    String::from_utf16(&units)
        .map_err(|_| Error::WrongKeyOrCorrupt("unpaired surrogate in string".into()))
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::{ArchiveCursor, OffsetCodec, WzReader};
    use crate::error::{Error, Result};
    use crate::keys::{KeyProfile, KeyStream};

    fn reader(bytes: Vec<u8>) -> Result<WzReader<Cursor<Vec<u8>>>> {
        WzReader::new(Cursor::new(bytes), Arc::new(KeyStream::new(KeyProfile::None)))
    }

    #[test]
    fn compressed_ints() -> Result<()> {
        #[rustfmt::skip]
        let mut r = reader(vec![
            0x05,
            0xFB,
            0x80, 0x00, 0x01, 0x00, 0x00,
            0x80, 0x80, 0xFF, 0xFF, 0xFF,
        ])?;

        assert_eq!(r.read_compressed_int()?, 5);
        assert_eq!(r.read_compressed_int()?, -5);
        assert_eq!(r.read_compressed_int()?, 256);
        assert_eq!(r.read_compressed_int()?, -128);
        Ok(())
    }

    #[test]
    fn unencrypted_ascii_string() -> Result<()> {
        // "Hi" with the 0xAA, 0xAB mask and a zero key
        let mut r = reader(vec![0xFE, b'H' ^ 0xAA, b'i' ^ 0xAB])?;
        assert_eq!(r.read_string()?, "Hi");
        Ok(())
    }

    #[test]
    fn unencrypted_wide_string() -> Result<()> {
        let unit = 0x00E9u16 ^ 0xAAAA;
        let mut r = reader(vec![0x01, unit.to_le_bytes()[0], unit.to_le_bytes()[1]])?;
        assert_eq!(r.read_string()?, "é");
        Ok(())
    }

    #[test]
    fn encrypted_string_with_wrong_key_is_rejected() -> Result<()> {
        // "Map" encrypted with the GMS stream, read back with the unencrypted profile
        let gms = KeyStream::new(KeyProfile::Gms);
        let mut bytes = vec![0xFD];
        bytes.extend(
            b"Map"
                .iter()
                .enumerate()
                .map(|(i, c)| c ^ (0xAA + i as u8) ^ gms.at(i)),
        );

        let mut r = reader(bytes.clone())?;
        assert!(matches!(r.read_string(), Err(Error::WrongKeyOrCorrupt(_))));

        let mut r = WzReader::new(Cursor::new(bytes), Arc::new(gms))?;
        assert_eq!(r.read_string()?, "Map");
        Ok(())
    }

    #[test]
    fn oversized_length_is_rejected() -> Result<()> {
        let mut r = reader(vec![0x80, 0x00, 0x00, 0x00, 0x10, 0x00])?;
        assert!(matches!(r.read_blob(), Err(Error::WrongKeyOrCorrupt(_))));

        let mut r = reader(vec![0xFB, 0x00])?;
        assert!(matches!(r.read_length("entries"), Err(Error::WrongKeyOrCorrupt(_))));
        Ok(())
    }

    #[test]
    fn string_block_reference() -> Result<()> {
        #[rustfmt::skip]
        let mut r = reader(vec![
            0xFE, b'H' ^ 0xAA, b'i' ^ 0xAB,
            0x1B, 0x00, 0x00, 0x00, 0x00,
        ])?;
        r.seek(3)?;
        assert_eq!(r.read_string_block(0)?, "Hi");
        assert_eq!(r.position()?, 8);
        Ok(())
    }

    #[test]
    fn offsets_are_invertible() {
        let codec = OffsetCodec {
            data_start: 60,
            hash: 0xD372,
        };
        for (position, value) in [(62u32, 100u32), (1000, 123_456), (77, 60)] {
            let stored = codec.encode(position, value);
            assert_eq!(codec.decode(position, stored), value);
        }
    }

    #[test]
    fn closed_cursor_is_a_lifetime_violation() -> Result<()> {
        let cursor = ArchiveCursor::new(Cursor::new(vec![1u8, 2, 3, 4]))?;
        assert_eq!(cursor.read_range(1, 2)?, vec![2, 3]);

        cursor.close();
        assert!(!cursor.is_open());
        assert!(matches!(
            cursor.read_range(0, 1),
            Err(Error::LifetimeViolation(_))
        ));
        Ok(())
    }
}
