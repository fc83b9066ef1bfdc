//! Opening archives: header, layout and key detection, and the directory table.

use std::fmt::{self, Debug};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::{Arc, RwLock};

use binrw::BinRead;
use bon::Builder;
use tracing::{debug, info, instrument, trace};

use crate::cursor::{ArchiveCursor, OffsetCodec, ReadSeek, WzReader};
use crate::error::{Error, Result};
use crate::image;
use crate::keys::{KeyProfile, KeyStream};
use crate::tree::{Arena, Body, ImageSlot, NodeId};
use crate::types::{
    encrypt_version, version_hash, EntryKind, FileHeader, IMAGE_HEADER, IMAGE_HEADER_REFERENCE,
    LUA_HEADER, MAX_ENTRIES,
};

/// Patch version assumed for archives built in memory
pub const DEFAULT_PATCH_VERSION: u16 = 83;

/// Patch versions tried first on archives without a version field
pub const PATCH_VERSIONS_64BIT: std::ops::Range<u16> = 770..780;

/// Highest patch version tried when it is not known
pub const MAX_PATCH_VERSION: u16 = 1000;

/// Directories nested deeper than this are treated as a decryption failure
const MAX_DEPTH: usize = 64;

/// How the key profile of an archive is chosen
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum KeySelector {
    /// Use this profile only
    Profile(KeyProfile),

    /// Try every known profile and keep the one whose directory names look most plausible
    #[default]
    AutoDetect,

    /// Try every known profile and keep the one that parses the most images
    BruteForce,
}

impl KeySelector {
    /// Parse a command line value. `auto` and `brute` select detection, anything else a profile.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" | "detect" => KeySelector::AutoDetect,
            "brute" | "bruteforce" => KeySelector::BruteForce,
            other => KeySelector::Profile(KeyProfile::from_name(other)),
        }
    }
}

/// Options for opening an archive
#[derive(Debug, Clone, Copy, Builder)]
pub struct OpenOptions {
    /// How to pick the key profile
    #[builder(default)]
    pub key: KeySelector,

    /// Game patch version. Probed when missing.
    pub patch_version: Option<u16>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Version information of an opened archive
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub patch_version: u16,
    pub hash: u32,

    /// Encrypted version stored after the header, `None` for 64-bit client archives
    pub header: Option<u16>,
}

impl VersionInfo {
    pub fn new(patch_version: u16, is_64bit: bool) -> Self {
        let hash = version_hash(patch_version);
        Self {
            patch_version,
            hash,
            header: (!is_64bit).then(|| encrypt_version(hash)),
        }
    }

    pub fn is_64bit(&self) -> bool {
        self.header.is_none()
    }
}

/// An opened or in-memory WZ archive.
///
/// The directory skeleton is read when the archive is opened. Images keep only their byte range
/// until one of their children is requested, and canvases keep their compressed payload until a
/// bitmap is requested. All of that reads through the single shared [`ArchiveCursor`], so the
/// archive can be shared between threads.
///
/// ```no_run
/// use wz_archive::{OpenOptions, WzArchive};
///
/// fn print_speed() -> wz_archive::error::Result<()> {
///     let archive = WzArchive::open("Mob.wz", OpenOptions::default())?;
///     let speed = archive.get("100100.img/info/speed")?;
///     println!("{}", archive.leaf(speed)?);
///     Ok(())
/// }
/// ```
pub struct WzArchive {
    pub(crate) name: String,
    pub(crate) cursor: Arc<ArchiveCursor>,
    pub(crate) nodes: RwLock<Arena>,
    pub(crate) key: Arc<KeyStream>,
    pub(crate) header: FileHeader,
    pub(crate) version: VersionInfo,
}

impl Debug for WzArchive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "WzArchive({}, {}, v{})",
            self.name,
            self.key.profile(),
            self.version.patch_version
        )
    }
}

#[derive(Debug)]
struct DirEntry {
    name: String,
    kind: EntryKind,
    size: i32,
    checksum: i32,
    offset: u32,
    children: Vec<DirEntry>,
}

/// A key profile and patch version that decode the directory table
struct Candidate {
    key: Arc<KeyStream>,
    version: VersionInfo,
    entries: Vec<DirEntry>,
}

impl WzArchive {
    /// An empty archive that exists only in memory
    pub fn new(name: &str) -> Self {
        Self::with_profile(name, KeyProfile::None)
    }

    /// An empty in-memory archive whose strings will be encrypted for `profile`
    pub fn with_profile(name: &str, profile: KeyProfile) -> Self {
        Self {
            name: name.to_string(),
            cursor: Arc::new(ArchiveCursor::detached()),
            nodes: RwLock::new(Arena::new(name)),
            key: Arc::new(KeyStream::new(profile)),
            header: FileHeader::default(),
            version: VersionInfo::new(DEFAULT_PATCH_VERSION, false),
        }
    }

    /// Open the archive at `path`
    #[instrument(skip(path), fields(path = %path.as_ref().display()), err)]
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = BufReader::new(File::open(path)?);
        Self::from_reader(&name, file, options)
    }

    /// Open an archive from any seekable source. `name` becomes the name of the root node.
    #[instrument(skip(reader), err)]
    pub fn from_reader<R: Read + Seek + Send + 'static>(
        name: &str,
        mut reader: R,
        options: OpenOptions,
    ) -> Result<Self> {
        let header = FileHeader::read(&mut reader).map_err(|e| match e {
            binrw::Error::BadMagic { .. } => Error::InvalidArchive,
            e => Error::from(e),
        })?;
        let cursor = Arc::new(ArchiveCursor::new(reader)?);

        let candidate = cursor.with_reader_at(header.data_start as u64, |source| {
            detect(source, &header, &options)
        })?;
        info!(
            profile = %candidate.key.profile(),
            patch_version = candidate.version.patch_version,
            is_64bit = candidate.version.is_64bit(),
            "opened {name}"
        );

        let mut arena = Arena::new(name);
        graft(&mut arena, Arena::ROOT, candidate.entries)?;

        Ok(Self {
            name: name.to_string(),
            cursor,
            nodes: RwLock::new(arena),
            key: candidate.key,
            header,
            version: candidate.version,
        })
    }

    /// Name of the archive, also the name of its root node
    pub fn archive_name(&self) -> &str {
        &self.name
    }

    pub fn key_profile(&self) -> KeyProfile {
        self.key.profile()
    }

    /// The key stream strings and `List.wz` canvases are encrypted with
    pub fn key(&self) -> &Arc<KeyStream> {
        &self.key
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn version(&self) -> VersionInfo {
        self.version
    }

    /// Drop the underlying source. Unparsed images and undecoded canvases stay readable only if
    /// they were parsed or cached before.
    pub fn close(&self) {
        self.cursor.close();
    }

    pub fn is_open(&self) -> bool {
        self.cursor.is_open()
    }
}

fn graft(arena: &mut Arena, parent: NodeId, entries: Vec<DirEntry>) -> Result<()> {
    for entry in entries {
        match entry.kind {
            EntryKind::Image => {
                let slot = ImageSlot::unparsed(entry.offset as u64, entry.size as u32, entry.checksum);
                arena.push(parent, entry.name, Body::Image(slot))?;
            }
            _ => {
                let id = arena.push(parent, entry.name, Body::Directory)?;
                graft(arena, id, entry.children)?;
            }
        }
    }
    Ok(())
}

/// Whether the data section starts without an encrypted version
fn is_64bit(r: &mut WzReader<&mut dyn ReadSeek>, header: &FileHeader) -> Result<bool> {
    let start = header.data_start as u64;
    if header.size < 2 {
        return Ok(true);
    }

    r.seek(start)?;
    let version = r.read_u16()?;
    let result = match version {
        v if v > 0xFF => true,
        0x80 if header.size >= 5 => {
            r.seek(start)?;
            let count = r.read_i32()?;
            count > 0 && count & 0xFF == 0 && count <= 0xFFFF
        }
        _ => false,
    };

    r.seek(start)?;
    Ok(result)
}

fn detect(source: &mut dyn ReadSeek, header: &FileHeader, options: &OpenOptions) -> Result<Candidate> {
    let profiles = match options.key {
        KeySelector::Profile(profile) => vec![profile],
        _ => KeyProfile::KNOWN.to_vec(),
    };

    let mut r = WzReader::new(source, Arc::new(KeyStream::new(KeyProfile::None)))?;
    let layout_64bit = is_64bit(&mut r, header)?;
    let stored_version = match layout_64bit {
        true => None,
        false => {
            r.seek(header.data_start as u64)?;
            Some(r.read_u16()?)
        }
    };

    let versions: Vec<u16> = match options.patch_version {
        Some(version) => vec![version],
        None if layout_64bit => PATCH_VERSIONS_64BIT.chain(0..MAX_PATCH_VERSION).collect(),
        None => (0..MAX_PATCH_VERSION).collect(),
    };
    let versions = versions
        .into_iter()
        .map(|v| VersionInfo::new(v, layout_64bit))
        .filter(|v| stored_version.map_or(true, |stored| v.header == Some(stored)))
        .collect::<Vec<_>>();

    let mut best: Option<(usize, Candidate)> = None;
    let mut last_error = None;
    for profile in profiles {
        let key = Arc::new(KeyStream::new(profile));
        r.set_key(key.clone());

        let candidate = match probe(&mut r, header, &key, &versions) {
            Ok(candidate) => candidate,
            Err(e @ Error::Poisoned) => return Err(e),
            Err(e) => {
                debug!(%profile, "rejected: {e}");
                last_error = Some(e);
                continue;
            }
        };

        let score = match options.key {
            KeySelector::BruteForce => parsed_images(&mut r, &key, &candidate.entries)?,
            _ => plausibility(&candidate.entries),
        };
        debug!(%profile, score, patch_version = candidate.version.patch_version, "candidate");
        if best.as_ref().map_or(true, |(best, _)| score > *best) {
            best = Some((score, candidate));
        }
    }

    best.map(|(_, candidate)| candidate).ok_or_else(|| {
        Error::WrongKeyOrCorrupt(match last_error {
            Some(e) => format!("no key profile decodes the directory: {e}"),
            None => "no patch version matches the stored version".into(),
        })
    })
}

/// First patch version whose directory table parses and whose first image starts correctly
fn probe(
    r: &mut WzReader<&mut dyn ReadSeek>,
    header: &FileHeader,
    key: &Arc<KeyStream>,
    versions: &[VersionInfo],
) -> Result<Candidate> {
    let mut last_error = Error::WrongKeyOrCorrupt("no patch version to try".into());

    for version in versions {
        let offsets = OffsetCodec {
            data_start: header.data_start,
            hash: version.hash,
        };
        r.set_offsets(offsets);
        let table = match version.is_64bit() {
            true => header.data_start as u64,
            false => header.data_start as u64 + 2,
        };

        match table_at(r, header, table) {
            Ok(entries) => {
                trace!(patch_version = version.patch_version, "directory decoded");
                return Ok(Candidate {
                    key: key.clone(),
                    version: *version,
                    entries,
                });
            }
            Err(e @ Error::Poisoned) => return Err(e),
            Err(e) => last_error = e,
        }
    }

    Err(last_error)
}

fn table_at(
    r: &mut WzReader<&mut dyn ReadSeek>,
    header: &FileHeader,
    table: u64,
) -> Result<Vec<DirEntry>> {
    r.seek(table)?;
    let entries = directory(r, header, 0)?;
    check_first_image(r, &entries)?;
    Ok(entries)
}

fn directory(
    r: &mut WzReader<&mut dyn ReadSeek>,
    header: &FileHeader,
    depth: usize,
) -> Result<Vec<DirEntry>> {
    if depth > MAX_DEPTH {
        return Err(Error::WrongKeyOrCorrupt("directories nested too deep".into()));
    }
    if r.remaining()? == 0 {
        return Ok(Vec::new());
    }

    let count = r.read_compressed_int()?;
    if !(0..=MAX_ENTRIES).contains(&count) {
        return Err(Error::WrongKeyOrCorrupt(format!("directory entry count {count}")));
    }

    let mut entries = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let tag = r.read_u8()?;
        let (kind, name) = match EntryKind::try_from(tag) {
            Ok(EntryKind::Unknown) => {
                r.read_i32()?;
                r.read_i16()?;
                r.read_offset()?;
                continue;
            }
            Ok(EntryKind::Reference) => {
                let offset = r.read_i32()?;
                let back = r.position()?;
                r.seek((header.data_start as u64).wrapping_add_signed(offset as i64))?;
                let tag = r.read_u8()?;
                let name = r.read_string()?;
                r.seek(back)?;
                (tag, name)
            }
            Ok(_) => (tag, r.read_string()?),
            Err(other) => {
                return Err(Error::WrongKeyOrCorrupt(format!(
                    "directory entry type {other}"
                )))
            }
        };

        let kind = match EntryKind::try_from(kind) {
            Ok(kind @ (EntryKind::Directory | EntryKind::Image)) => kind,
            _ => {
                return Err(Error::WrongKeyOrCorrupt(format!(
                    "directory entry {name} has type {kind}"
                )))
            }
        };
        let size = r.read_compressed_int()?;
        let checksum = r.read_compressed_int()?;
        let offset = r.read_offset()?;

        let end = match kind {
            EntryKind::Image => offset as u64 + size.max(0) as u64,
            _ => offset as u64,
        };
        if size < 0 || end > r.len() {
            return Err(Error::WrongKeyOrCorrupt(format!(
                "{name} at {offset:#X}+{size} is outside the archive"
            )));
        }

        entries.push(DirEntry {
            name,
            kind,
            size,
            checksum,
            offset,
            children: Vec::new(),
        });
    }

    for entry in entries.iter_mut().filter(|e| e.kind == EntryKind::Directory) {
        r.seek(entry.offset as u64)?;
        entry.children = directory(r, header, depth + 1)?;
    }

    Ok(entries)
}

fn first_image(entries: &[DirEntry]) -> Option<&DirEntry> {
    entries
        .iter()
        .find(|e| e.kind == EntryKind::Image)
        .or_else(|| entries.iter().find_map(|e| first_image(&e.children)))
}

fn check_first_image(r: &mut WzReader<&mut dyn ReadSeek>, entries: &[DirEntry]) -> Result<()> {
    let Some(image) = first_image(entries) else {
        return Ok(());
    };

    r.seek(image.offset as u64)?;
    match r.read_u8()? {
        IMAGE_HEADER | IMAGE_HEADER_REFERENCE | LUA_HEADER => Ok(()),
        other => Err(Error::WrongKeyOrCorrupt(format!(
            "image {} starts with {other:#04X}",
            image.name
        ))),
    }
}

/// Share of names made of the characters the game uses, in percent
fn plausibility(entries: &[DirEntry]) -> usize {
    fn walk(entries: &[DirEntry], total: &mut usize, plausible: &mut usize) {
        for entry in entries {
            *total += 1;
            let clean = entry
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "._-# ".contains(c));
            let suffix = entry.kind != EntryKind::Image || entry.name.ends_with(".img");
            if clean && suffix {
                *plausible += 1;
            }
            walk(&entry.children, total, plausible);
        }
    }

    let (mut total, mut plausible) = (0, 0);
    walk(entries, &mut total, &mut plausible);
    match total {
        0 => 100,
        total => plausible * 100 / total,
    }
}

/// Number of images that parse with `key`
fn parsed_images(
    r: &mut WzReader<&mut dyn ReadSeek>,
    key: &Arc<KeyStream>,
    entries: &[DirEntry],
) -> Result<usize> {
    let mut parsed = 0;
    for entry in entries {
        match entry.kind {
            EntryKind::Image => {
                r.seek(entry.offset as u64)?;
                let bytes = r.read_bytes(entry.size as usize)?;
                if image::parse_image(&bytes, key).is_ok() {
                    parsed += 1;
                }
            }
            _ => parsed += parsed_images(r, key, &entry.children)?,
        }
    }
    Ok(parsed)
}
