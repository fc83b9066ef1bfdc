//! Primitive writer, the inverse of [`crate::cursor::WzReader`].

use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use indexmap::IndexMap;

use crate::cursor::{check_storable, OffsetCodec};
use crate::error::{Error, Result};
use crate::keys::KeyStream;

/// Tag written before a directory name that was already written once
const OBJECT_REFERENCE: u8 = 0x02;

pub struct WzWriter<W> {
    inner: W,
    key: Arc<KeyStream>,
    offsets: Option<OffsetCodec>,

    /// Absolute position of the first byte written to `inner`
    base: u64,

    /// String values already written in the current image, by offset relative to the image
    strings: IndexMap<String, u32>,

    /// Directory names already written, by offset relative to the data start
    objects: IndexMap<(u8, String), u32>,
}

impl<W: Write + Seek> WzWriter<W> {
    pub fn new(inner: W, key: Arc<KeyStream>) -> Self {
        Self {
            inner,
            key,
            offsets: None,
            base: 0,
            strings: IndexMap::new(),
            objects: IndexMap::new(),
        }
    }

    /// Enable [`WzWriter::write_offset`] and the directory name cache
    pub fn with_offsets(mut self, offsets: OffsetCodec) -> Self {
        self.offsets = Some(offsets);
        self
    }

    /// Treat the first byte written to the inner stream as sitting at `base` in the final file
    pub fn with_base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Absolute position of the next byte
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.base + self.inner.stream_position()?)
    }

    /// Forget the string values of the previous image
    pub fn clear_strings(&mut self) {
        self.strings.clear();
    }

    /// Overwrite four bytes written earlier at absolute `position`
    pub fn patch_u32(&mut self, position: u64, value: u32) -> Result<()> {
        let end = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(position - self.base))?;
        self.write_u32(value)?;
        self.inner.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        Ok(self.inner.write_u8(value)?)
    }

    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        Ok(self.inner.write_i8(value)?)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        Ok(self.inner.write_u16::<LittleEndian>(value)?)
    }

    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        Ok(self.inner.write_i16::<LittleEndian>(value)?)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        Ok(self.inner.write_u32::<LittleEndian>(value)?)
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        Ok(self.inner.write_i32::<LittleEndian>(value)?)
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        Ok(self.inner.write_u64::<LittleEndian>(value)?)
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        Ok(self.inner.write_i64::<LittleEndian>(value)?)
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        Ok(self.inner.write_f32::<LittleEndian>(value)?)
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        Ok(self.inner.write_f64::<LittleEndian>(value)?)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        Ok(self.inner.write_all(bytes)?)
    }

    /// Bytes XORed with `key` from its first byte
    pub fn write_encrypted(&mut self, bytes: &[u8], key: &KeyStream) -> Result<()> {
        let mut bytes = bytes.to_vec();
        key.xor(&mut bytes);
        self.write_bytes(&bytes)
    }

    pub fn write_compressed_int(&mut self, value: i32) -> Result<()> {
        if (-127..=127).contains(&value) {
            self.write_i8(value as i8)
        } else {
            self.write_i8(i8::MIN)?;
            self.write_i32(value)
        }
    }

    pub fn write_compressed_long(&mut self, value: i64) -> Result<()> {
        if (-127..=127).contains(&value) {
            self.write_i8(value as i8)
        } else {
            self.write_i8(i8::MIN)?;
            self.write_i64(value)
        }
    }

    /// A compressed length followed by the bytes
    pub fn write_blob(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_compressed_int(length(bytes.len())?)?;
        self.write_bytes(bytes)
    }

    /// An encrypted string, single byte when every character fits in seven bits
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        if value.is_empty() {
            return self.write_u8(0);
        }
        check_storable(value)?;

        if value.chars().any(|c| c as u32 > 0x7F) {
            let units = value.encode_utf16().collect::<Vec<_>>();
            let len = length(units.len())?;
            if len >= i8::MAX as i32 {
                self.write_i8(i8::MAX)?;
                self.write_i32(len)?;
            } else {
                self.write_i8(len as i8)?;
            }

            let encoded = self.key.with_bytes(units.len() * 2, |k| {
                let mut mask = 0xAAAAu16;
                let mut out = Vec::with_capacity(units.len() * 2);
                for (i, unit) in units.iter().enumerate() {
                    let key = u16::from_le_bytes([k[2 * i], k[2 * i + 1]]);
                    out.extend_from_slice(&(unit ^ mask ^ key).to_le_bytes());
                    mask = mask.wrapping_add(1);
                }
                out
            });
            self.write_bytes(&encoded)
        } else {
            let len = length(value.len())?;
            if len > i8::MAX as i32 {
                self.write_i8(i8::MIN)?;
                self.write_i32(len)?;
            } else {
                self.write_i8(-len as i8)?;
            }

            let encoded = self.key.with_bytes(value.len(), |k| {
                let mut mask = 0xAAu8;
                value
                    .bytes()
                    .enumerate()
                    .map(|(i, c)| {
                        let b = c ^ mask ^ k[i];
                        mask = mask.wrapping_add(1);
                        b
                    })
                    .collect::<Vec<_>>()
            });
            self.write_bytes(&encoded)
        }
    }

    /// A string inside an image.
    ///
    /// Strings longer than four characters are written once per image; later occurrences become
    /// `reference_tag` followed by the offset of the first copy.
    pub fn write_string_value(&mut self, value: &str, inline_tag: u8, reference_tag: u8) -> Result<()> {
        if value.len() > 4 {
            if let Some(offset) = self.strings.get(value).copied() {
                self.write_u8(reference_tag)?;
                return self.write_u32(offset);
            }
        }

        self.write_u8(inline_tag)?;
        let offset = self.position()? as u32;
        if value.len() > 4 {
            self.strings.insert(value.to_string(), offset);
        }
        self.write_string(value)
    }

    /// A directory entry tag and name, deduplicated across the whole directory table
    pub fn write_object_name(&mut self, kind: u8, name: &str) -> Result<()> {
        let data_start = self.offsets.map(|o| o.data_start as u64).unwrap_or(0);
        let key = (kind, name.to_string());

        if name.len() > 4 {
            if let Some(offset) = self.objects.get(&key).copied() {
                self.write_u8(OBJECT_REFERENCE)?;
                return self.write_u32(offset);
            }
        }

        let offset = self.position()?.saturating_sub(data_start) as u32;
        self.write_u8(kind)?;
        if name.len() > 4 {
            self.objects.insert(key, offset);
        }
        self.write_string(name)
    }

    /// An encrypted directory offset
    pub fn write_offset(&mut self, value: u32) -> Result<()> {
        let offsets = self.offsets.ok_or_else(|| {
            Error::CustomError("offsets written without a version hash".into())
        })?;
        let position = self.position()? as u32;
        self.write_u32(offsets.encode(position, value))
    }
}

fn length(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::InvalidOperation(format!("length {len} does not fit")))
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::sync::Arc;

    use pretty_assertions::{assert_eq, assert_str_eq};

    use super::WzWriter;
    use crate::cursor::{OffsetCodec, WzReader};
    use crate::error::{Error, Result};
    use crate::keys::{KeyProfile, KeyStream};

    fn writer(profile: KeyProfile) -> WzWriter<Cursor<Vec<u8>>> {
        WzWriter::new(Cursor::new(Vec::new()), Arc::new(KeyStream::new(profile)))
    }

    #[test]
    fn compressed_int_boundaries() -> Result<()> {
        let mut w = writer(KeyProfile::None);
        for value in [127, -127, 128, -128] {
            w.write_compressed_int(value)?;
        }

        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            0x7F,
            0x81,
            0x80, 0x80, 0x00, 0x00, 0x00,
            0x80, 0x80, 0xFF, 0xFF, 0xFF,
        ];
        assert_str_eq!(
            format!("{:02X?}", w.into_inner().into_inner()),
            format!("{:02X?}", expected)
        );
        Ok(())
    }

    #[test]
    fn long_ascii_string_uses_extended_length() -> Result<()> {
        let value = "a".repeat(128);
        let mut w = writer(KeyProfile::Gms);
        w.write_string(&value)?;
        let bytes = w.into_inner().into_inner();

        assert_eq!(&bytes[..5], &[0x80, 0x80, 0x00, 0x00, 0x00]);

        let mut r = WzReader::new(Cursor::new(bytes), Arc::new(KeyStream::new(KeyProfile::Gms)))?;
        assert_eq!(r.read_string()?, value);
        Ok(())
    }

    #[test]
    fn wide_string_reads_back() -> Result<()> {
        let value = "몬스터 ☆ 127";
        let mut w = writer(KeyProfile::Ems);
        w.write_string(value)?;
        let bytes = w.into_inner().into_inner();
        assert_eq!(bytes[0], value.encode_utf16().count() as u8);

        let mut r = WzReader::new(Cursor::new(bytes), Arc::new(KeyStream::new(KeyProfile::Ems)))?;
        assert_eq!(r.read_string()?, value);
        Ok(())
    }

    #[test]
    fn control_characters_are_refused() -> Result<()> {
        for value in ["line1\u{1}line2", "몬스터\u{0}"] {
            let mut w = writer(KeyProfile::Gms);
            assert!(matches!(
                w.write_string(value),
                Err(Error::InvalidOperation(_))
            ));
        }

        let value = "a\tb\r\nc";
        let mut w = writer(KeyProfile::Gms);
        w.write_string(value)?;
        let bytes = w.into_inner().into_inner();
        let mut r = WzReader::new(Cursor::new(bytes), Arc::new(KeyStream::new(KeyProfile::Gms)))?;
        assert_eq!(r.read_string()?, value);
        Ok(())
    }

    #[test]
    fn repeated_string_values_are_references() -> Result<()> {
        let mut w = writer(KeyProfile::None);
        w.write_string_value("origin", 0x00, 0x01)?;
        w.write_string_value("origin", 0x00, 0x01)?;
        w.write_string_value("x", 0x00, 0x01)?;
        w.write_string_value("x", 0x00, 0x01)?;
        let bytes = w.into_inner().into_inner();

        // tag + 7 byte string, reference, then "x" twice inline
        assert_eq!(bytes.len(), 8 + 5 + 3 + 3);
        assert_eq!(&bytes[8..13], &[0x01, 0x01, 0x00, 0x00, 0x00]);

        let mut r = WzReader::new(Cursor::new(bytes), Arc::new(KeyStream::new(KeyProfile::None)))?;
        assert_eq!(r.read_string_block(0)?, "origin");
        assert_eq!(r.read_string_block(0)?, "origin");
        assert_eq!(r.read_string_block(0)?, "x");
        Ok(())
    }

    #[test]
    fn offsets_read_back() -> Result<()> {
        let codec = OffsetCodec {
            data_start: 60,
            hash: 1234,
        };
        let mut w = writer(KeyProfile::None).with_offsets(codec).with_base(60);
        w.write_u16(0)?;
        w.write_offset(4096)?;
        let bytes = w.into_inner().into_inner();

        let mut padded = vec![0u8; 60];
        padded.extend(bytes);
        let mut r = WzReader::new(Cursor::new(padded), Arc::new(KeyStream::new(KeyProfile::None)))?
            .with_offsets(codec);
        r.seek(62)?;
        assert_eq!(r.read_offset()?, 4096);
        Ok(())
    }
}
