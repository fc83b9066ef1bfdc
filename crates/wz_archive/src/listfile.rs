//! `List.wz`, the plain list of image paths older clients ship next to their archives.
//!
//! The file is a sequence of entries:
//!
//! | Field      | Encoding                                                          |
//! |------------|-------------------------------------------------------------------|
//! | length     | `i32`, number of UTF-16 units                                     |
//! | units      | `u16` each, XORed with bytes `2i` and `2i + 1` of the key stream  |
//! | terminator | `u16`, an encrypted zero                                          |
//!
//! The client stores the last entry with a trailing `/` in place of the final `g` of `.img`.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::keys::{KeyProfile, KeyStream};

fn xor_units(units: &mut [u16], key: &KeyStream) {
    key.with_bytes(units.len() * 2, |k| {
        for (i, unit) in units.iter_mut().enumerate() {
            *unit ^= u16::from_le_bytes([k[2 * i], k[2 * i + 1]]);
        }
    })
}

fn replace_last_char(entries: &mut [String], replacement: char) {
    if let Some(last) = entries.last_mut() {
        if last.pop().is_some() {
            last.push(replacement);
        }
    }
}

/// Read every entry of a list file
pub fn read_list(mut reader: impl Read, profile: KeyProfile) -> Result<Vec<String>> {
    let key = KeyStream::new(profile);
    let mut entries = Vec::new();

    loop {
        let len = match reader.read_i32::<LittleEndian>() {
            Ok(len) => len,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if len < 0 {
            return Err(Error::WrongKeyOrCorrupt(format!(
                "negative list entry length {len}"
            )));
        }

        let mut units = vec![0u16; len as usize];
        reader.read_u16_into::<LittleEndian>(&mut units)?;
        let _terminator = reader.read_u16::<LittleEndian>()?;
        xor_units(&mut units, &key);

        let entry = String::from_utf16(&units)
            .map_err(|e| Error::WrongKeyOrCorrupt(format!("list entry {}: {e}", entries.len())))?;
        entries.push(entry);
    }

    replace_last_char(&mut entries, 'g');
    debug!(entries = entries.len(), "read list");
    Ok(entries)
}

/// Write `entries` in list file format
pub fn write_list(mut writer: impl Write, profile: KeyProfile, entries: &[String]) -> Result<()> {
    let key = KeyStream::new(profile);
    let mut entries = entries.to_vec();
    replace_last_char(&mut entries, '/');

    for entry in &entries {
        let mut units = entry.encode_utf16().chain([0]).collect::<Vec<_>>();
        writer.write_i32::<LittleEndian>(units.len() as i32 - 1)?;
        xor_units(&mut units, &key);
        for unit in units {
            writer.write_u16::<LittleEndian>(unit)?;
        }
    }

    writer.flush()?;
    Ok(())
}

#[instrument(skip(path), fields(path = %path.as_ref().display()), err)]
pub fn read_list_file(path: impl AsRef<Path>, profile: KeyProfile) -> Result<Vec<String>> {
    read_list(BufReader::new(File::open(path)?), profile)
}

#[instrument(skip(path, entries), fields(path = %path.as_ref().display()), err)]
pub fn write_list_file(
    path: impl AsRef<Path>,
    profile: KeyProfile,
    entries: &[String],
) -> Result<()> {
    write_list(BufWriter::new(File::create(path)?), profile, entries)
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::{read_list, write_list};
    use crate::error::{Error, Result};
    use crate::keys::KeyProfile;

    #[test]
    fn unencrypted_entry_layout() -> Result<()> {
        let mut out = Vec::new();
        write_list(&mut out, KeyProfile::None, &["a.img".to_string()])?;

        #[rustfmt::skip]
        let expected = vec![
            0x05, 0x00, 0x00, 0x00,
            b'a', 0x00, b'.', 0x00, b'i', 0x00, b'm', 0x00, b'/', 0x00,
            0x00, 0x00,
        ];
        assert_eq!(out, expected);
        Ok(())
    }

    #[test]
    fn last_entry_suffix_is_restored() -> Result<()> {
        let entries = vec![
            "Mob/0100100.img".to_string(),
            "Map/Back/grassySoil.img".to_string(),
        ];
        let mut out = Vec::new();
        write_list(&mut out, KeyProfile::Gms, &entries)?;

        assert_eq!(read_list(Cursor::new(out), KeyProfile::Gms)?, entries);
        Ok(())
    }

    #[test]
    fn truncated_entry_is_an_error() {
        let input = vec![0x09, 0x00, 0x00, 0x00, b'a', 0x00];
        assert!(matches!(
            read_list(Cursor::new(input), KeyProfile::None),
            Err(Error::IOError(_))
        ));
    }

    #[test]
    fn empty_file_has_no_entries() -> Result<()> {
        assert!(read_list(Cursor::new(Vec::new()), KeyProfile::Ems)?.is_empty());
        Ok(())
    }
}
