//! Base types for structure of WZ files.

use binrw::{BinRead, BinWrite, NullString};

/// Copyright string written by the official packer
pub const DEFAULT_COPYRIGHT: &str = "Package file v1.0 Copyright 2002 Wizet, ZMS";

/// First byte of a property image with an inline type name
pub const IMAGE_HEADER: u8 = 0x73;

/// First byte of a property image whose type name is a reference
pub const IMAGE_HEADER_REFERENCE: u8 = 0x1B;

/// First byte of an image holding a single Lua script
pub const LUA_HEADER: u8 = 0x01;

/// Entry counts above this are treated as a decryption failure
pub const MAX_ENTRIES: i32 = 100_000;

/// WZ file header
///
/// Every archive starts with "PKG1". The copyright string is null terminated and the data section
/// starts at `data_start`, usually right after it.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq)]
#[brw(magic = b"PKG1", little)]
pub struct FileHeader {
    /// Length of the file after the data start
    pub size: u64,

    /// Offset of the data section from the start of the file
    pub data_start: u32,

    /// Free form copyright notice
    pub copyright: NullString,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::with_copyright(DEFAULT_COPYRIGHT)
    }
}

impl FileHeader {
    /// A header whose data section starts right after `copyright`
    pub fn with_copyright(copyright: &str) -> Self {
        Self {
            size: 0,
            data_start: 4 + 8 + 4 + copyright.len() as u32 + 1,
            copyright: NullString::from(copyright),
        }
    }
}

/// Kind byte of a directory table entry
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Skipped by readers, carries no name
    Unknown = 1,

    /// Name stored elsewhere in the table
    Reference = 2,

    /// A directory
    Directory = 3,

    /// An image
    Image = 4,
}

impl TryFrom<u8> for EntryKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EntryKind::Unknown),
            2 => Ok(EntryKind::Reference),
            3 => Ok(EntryKind::Directory),
            4 => Ok(EntryKind::Image),
            other => Err(other),
        }
    }
}

/// Hash of a game patch version, mixed into directory offsets
pub fn version_hash(patch_version: u16) -> u32 {
    patch_version
        .to_string()
        .bytes()
        .fold(0u32, |hash, digit| {
            hash.wrapping_mul(32)
                .wrapping_add(digit as u32)
                .wrapping_add(1)
        })
}

/// Value stored in the header for a version hash
pub fn encrypt_version(hash: u32) -> u16 {
    let [a, b, c, d] = hash.to_le_bytes();
    !(a ^ b ^ c ^ d) as u16
}

/// Fixed part of an embedded sound, following its two lengths
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct SoundHeader {
    pub count: u8,
    pub sound_guid: [u8; 16],
    pub format_guid: [u8; 16],
    pub reserved: u8,
    pub mask: u8,

    /// DirectShow media type, all zero when the sound carries no format descriptor
    pub media_type: [u8; 16],
}

impl SoundHeader {
    /// Media type of sounds imported by the official tools
    pub const MEDIA_TYPE: [u8; 16] = [
        0x81, 0x9F, 0x58, 0x05, 0x56, 0xC3, 0xCE, 0x11, 0xBF, 0x01, 0x00, 0xAA, 0x00, 0x55, 0x59,
        0x5A,
    ];

    pub const SOUND_GUID: [u8; 16] = [
        0x83, 0xEB, 0x36, 0xE4, 0x4F, 0x52, 0xCE, 0x11, 0x9F, 0x53, 0x00, 0x20, 0xAF, 0x0B, 0xA7,
        0x70,
    ];

    pub const FORMAT_GUID: [u8; 16] = [
        0x8B, 0xEB, 0x36, 0xE4, 0x4F, 0x52, 0xCE, 0x11, 0x9F, 0x53, 0x00, 0x20, 0xAF, 0x0B, 0xA7,
        0x70,
    ];

    /// Whether a format descriptor follows the header
    pub fn has_format(&self) -> bool {
        self.media_type != [0; 16]
    }

    /// Whether a length-prefixed block sits between the header and the format descriptor.
    /// Only media types other than [`Self::MEDIA_TYPE`] carry one.
    pub fn has_media_block(&self) -> bool {
        self.has_format() && self.media_type != Self::MEDIA_TYPE
    }
}

impl Default for SoundHeader {
    fn default() -> Self {
        Self {
            count: 2,
            sound_guid: Self::SOUND_GUID,
            format_guid: Self::FORMAT_GUID,
            reserved: 0,
            mask: 1,
            media_type: Self::MEDIA_TYPE,
        }
    }
}

/// The common prefix of every audio format descriptor (`WAVEFORMATEX`)
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct WaveFormat {
    /// `1` for PCM, `0x55` for MPEG layer 3
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,

    /// Bytes of format specific data after this structure
    pub extra_size: u16,
}

impl WaveFormat {
    pub const SIZE: usize = 18;
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::{BinRead, BinWrite};
    use pretty_assertions::{assert_eq, assert_str_eq};

    use super::{encrypt_version, version_hash, FileHeader, WaveFormat};
    use crate::error::Result;

    #[test]
    fn default_header_ends_at_data_start() -> Result<()> {
        let header = FileHeader::default();
        assert_eq!(header.data_start, 60);

        let mut actual = Vec::new();
        header.write(&mut Cursor::new(&mut actual))?;
        assert_eq!(actual.len(), 60);
        assert_eq!(&actual[..4], b"PKG1");

        Ok(())
    }

    #[test]
    fn read_header() -> Result<()> {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x50, 0x4B, 0x47, 0x31,
            0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x13, 0x00, 0x00, 0x00,
            0x41, 0x42, 0x00,
        ]);

        let header = FileHeader::read(&mut input)?;
        assert_eq!(header.size, 16);
        assert_eq!(header.data_start, 19);
        assert_str_eq!(header.copyright.to_string(), "AB");
        assert_eq!(header.data_start, FileHeader::with_copyright("AB").data_start);

        Ok(())
    }

    #[test]
    fn version_hashes() {
        assert_eq!(version_hash(83), 1876);
        assert_eq!(encrypt_version(version_hash(83)), 0xAC);
        assert_eq!(version_hash(1), 50);
    }

    #[test]
    fn read_wave_format() -> Result<()> {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x55, 0x00, 0x02, 0x00,
            0x44, 0xAC, 0x00, 0x00,
            0x10, 0x3E, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x0C, 0x00,
        ]);

        let format = WaveFormat::read(&mut input)?;
        assert_eq!(format.format_tag, 0x55);
        assert_eq!(format.channels, 2);
        assert_eq!(format.samples_per_sec, 44100);
        assert_eq!(format.extra_size, 12);

        Ok(())
    }
}
