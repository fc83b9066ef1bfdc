//! Saving archives.

use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use binrw::BinWrite;
use bon::Builder;
use tracing::{debug, info, instrument};

use crate::cursor::OffsetCodec;
use crate::error::{Error, Result};
use crate::image;
use crate::keys::{KeyProfile, KeyStream};
use crate::read::{VersionInfo, WzArchive};
use crate::tree::{Arena, Body, NodeId};
use crate::types::{EntryKind, FileHeader};
use crate::writer::WzWriter;

/// Options for how the archive should be written
#[derive(Debug, Clone, Copy, Default, Builder)]
pub struct SaveOptions {
    /// Key profile to encrypt with. Defaults to the profile the archive was opened with.
    pub key: Option<KeyProfile>,

    /// Patch version to hash offsets with. Defaults to the detected one.
    pub patch_version: Option<u16>,

    /// Write the 64-bit client layout, without a version field. Defaults to the layout read.
    pub as_64bit: Option<bool>,
}

/// Bytes of one image as they will be stored
struct ImageBlob {
    bytes: Vec<u8>,
    checksum: i32,
}

/// One directory block, in save order
#[derive(Default)]
struct DirPlan {
    /// Name and index into the image blobs
    images: Vec<(String, usize)>,
    dirs: Vec<(String, DirPlan)>,
}

impl DirPlan {
    /// Collect the directories under `id`, appending images in save order
    fn build(nodes: &Arena, id: NodeId, order: &mut Vec<NodeId>) -> Result<Self> {
        let mut plan = DirPlan::default();
        let mut dirs = Vec::new();

        for child in &nodes.get(id)?.children {
            let node = nodes.get(*child)?;
            match node.body {
                Body::Image(_) => {
                    plan.images.push((node.name.clone(), order.len()));
                    order.push(*child);
                }
                Body::Directory => dirs.push((node.name.clone(), *child)),
                _ => {
                    return Err(Error::InvalidOperation(format!(
                        "{} cannot be stored in a directory",
                        nodes.path(*child)?
                    )))
                }
            }
        }

        for (name, dir) in dirs {
            let sub = DirPlan::build(nodes, dir, order)?;
            plan.dirs.push((name, sub));
        }
        Ok(plan)
    }

    /// Number of directory blocks, this one included
    fn blocks(&self) -> usize {
        1 + self.dirs.iter().map(|(_, d)| d.blocks()).sum::<usize>()
    }

    fn size(&self, blobs: &[ImageBlob]) -> i32 {
        let images = self
            .images
            .iter()
            .map(|(_, i)| blobs[*i].bytes.len() as i32)
            .fold(0i32, i32::wrapping_add);
        self.dirs
            .iter()
            .map(|(_, d)| d.size(blobs))
            .fold(images, i32::wrapping_add)
    }

    fn checksum(&self, blobs: &[ImageBlob]) -> i32 {
        let images = self
            .images
            .iter()
            .map(|(_, i)| blobs[*i].checksum)
            .fold(0i32, i32::wrapping_add);
        self.dirs
            .iter()
            .map(|(_, d)| d.checksum(blobs))
            .fold(images, i32::wrapping_add)
    }
}

/// Writes the directory table. Run once with placeholder offsets to learn where every block
/// starts, then again with the real offsets.
struct TableWriter<'a> {
    blobs: &'a [ImageBlob],
    image_offsets: Vec<u32>,
    dir_offsets: Vec<u32>,
    starts: Vec<u32>,
}

impl TableWriter<'_> {
    fn write_dir(&mut self, w: &mut WzWriter<Cursor<Vec<u8>>>, plan: &DirPlan) -> Result<()> {
        let index = self.starts.len();
        self.starts.push(w.position()? as u32);

        w.write_compressed_int((plan.images.len() + plan.dirs.len()) as i32)?;
        for (name, blob) in &plan.images {
            w.write_object_name(EntryKind::Image as u8, name)?;
            w.write_compressed_int(self.blobs[*blob].bytes.len() as i32)?;
            w.write_compressed_int(self.blobs[*blob].checksum)?;
            w.write_offset(self.image_offsets[*blob])?;
        }

        let mut child = index + 1;
        for (name, dir) in &plan.dirs {
            w.write_object_name(EntryKind::Directory as u8, name)?;
            w.write_compressed_int(dir.size(self.blobs))?;
            w.write_compressed_int(dir.checksum(self.blobs))?;
            w.write_offset(self.dir_offsets[child])?;
            child += dir.blocks();
        }

        for (_, dir) in &plan.dirs {
            self.write_dir(w, dir)?;
        }
        Ok(())
    }
}

impl WzArchive {
    /// Serialize the archive to `writer`
    ///
    /// Images that were not changed are copied verbatim when the key profile stays the same;
    /// everything else is written from the tree. Unparsed images are parsed first when they need
    /// to be rewritten.
    #[instrument(skip(self, writer), err)]
    pub fn save<W: Write>(&self, mut writer: W, options: SaveOptions) -> Result<()> {
        let bytes = self.serialize(options)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Save the archive to `path`, going through a temporary file next to it so the file this
    /// archive was opened from can be replaced
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()), err)]
    pub fn save_to_path(&self, path: impl AsRef<Path>, options: SaveOptions) -> Result<()> {
        let path = path.as_ref();
        let mut temporary = path.as_os_str().to_owned();
        temporary.push(".tmp");

        let saved = File::create(&temporary)
            .map_err(Error::from)
            .and_then(|file| self.save(BufWriter::new(file), options))
            .and_then(|()| fs::rename(&temporary, path).map_err(Error::from));
        if saved.is_err() {
            if let Err(e) = fs::remove_file(&temporary) {
                debug!(temporary = ?temporary, "could not remove temporary file: {e}");
            }
        }
        saved
    }

    fn serialize(&self, options: SaveOptions) -> Result<Vec<u8>> {
        let profile = options.key.unwrap_or(self.key.profile());
        let key = match profile == self.key.profile() {
            true => self.key.clone(),
            false => Arc::new(KeyStream::new(profile)),
        };
        let version = VersionInfo::new(
            options.patch_version.unwrap_or(self.version.patch_version),
            options.as_64bit.unwrap_or(self.version.is_64bit()),
        );

        let mut order = Vec::new();
        let plan = DirPlan::build(&*self.nodes.read()?, Arena::ROOT, &mut order)?;
        let blobs = order
            .iter()
            .map(|id| self.image_blob(*id, &key))
            .collect::<Result<Vec<_>>>()?;

        let data_start = self.header.data_start;
        let table_start = match version.header {
            Some(_) => data_start as u64 + 2,
            None => data_start as u64,
        };
        let offsets = OffsetCodec {
            data_start,
            hash: version.hash,
        };

        let mut table = TableWriter {
            blobs: &blobs,
            image_offsets: vec![0; blobs.len()],
            dir_offsets: vec![0; plan.blocks()],
            starts: Vec::new(),
        };
        let table_len = write_table(&mut table, &plan, &key, offsets, table_start)?.len() as u64;

        let mut position = (table_start + table_len) as u32;
        for (offset, blob) in table.image_offsets.iter_mut().zip(&blobs) {
            *offset = position;
            position += blob.bytes.len() as u32;
        }
        table.dir_offsets = std::mem::take(&mut table.starts);
        let directory = write_table(&mut table, &plan, &key, offsets, table_start)?;
        if directory.len() as u64 != table_len {
            return Err(Error::CustomError(
                "directory table changed length between passes".into(),
            ));
        }

        let header = FileHeader {
            size: position as u64 - data_start as u64,
            data_start,
            copyright: self.header.copyright.clone(),
        };
        let mut out = Cursor::new(Vec::with_capacity(position as usize));
        header.write(&mut out)?;
        let mut out = out.into_inner();
        if out.len() > data_start as usize {
            return Err(Error::InvalidOperation(format!(
                "copyright does not fit before the data start {data_start}"
            )));
        }
        out.resize(data_start as usize, 0);
        if let Some(stored) = version.header {
            out.extend_from_slice(&stored.to_le_bytes());
        }
        out.extend_from_slice(&directory);
        for blob in &blobs {
            out.extend_from_slice(&blob.bytes);
        }

        info!(
            profile = %profile,
            patch_version = version.patch_version,
            images = blobs.len(),
            len = out.len(),
            "saved {}",
            self.name
        );
        Ok(out)
    }

    /// The bytes `id` would be saved as, encrypted with this archive's key. Offsets inside are
    /// relative to the first byte, so the result is a standalone `.img` file.
    pub fn image_bytes(&self, id: NodeId) -> Result<Vec<u8>> {
        let key = self.key.clone();
        Ok(self.image_blob(id, &key)?.bytes)
    }

    fn image_blob(&self, id: NodeId, key: &Arc<KeyStream>) -> Result<ImageBlob> {
        let slot = match &self.nodes.read()?.get(id)?.body {
            Body::Image(slot) => slot.clone(),
            _ => return Err(Error::InvalidOperation("not an image".into())),
        };

        if key.profile() == self.key.profile() && !slot.is_dirty() {
            match self.cursor.read_range(slot.offset, slot.size as u64) {
                Ok(bytes) => {
                    return Ok(ImageBlob {
                        bytes,
                        checksum: slot.checksum,
                    })
                }
                Err(Error::LifetimeViolation(_)) if slot.is_parsed() => {
                    debug!(image = %self.path(id)?, "source closed, writing parsed image");
                }
                Err(Error::LifetimeViolation(_)) => {
                    return Err(Error::LifetimeViolation(self.path(id)?))
                }
                Err(e) => return Err(e),
            }
        }

        self.ensure_parsed(id)?;
        let bytes = image::write_image(&*self.nodes.read()?, id, &self.key, key)?;
        let checksum = bytes.iter().fold(0i32, |sum, b| sum.wrapping_add(*b as i32));
        Ok(ImageBlob { bytes, checksum })
    }
}

fn write_table(
    table: &mut TableWriter,
    plan: &DirPlan,
    key: &Arc<KeyStream>,
    offsets: OffsetCodec,
    base: u64,
) -> Result<Vec<u8>> {
    table.starts.clear();
    let mut w = WzWriter::new(Cursor::new(Vec::new()), key.clone())
        .with_offsets(offsets)
        .with_base(base);
    table.write_dir(&mut w, plan)?;
    Ok(w.into_inner().into_inner())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::SaveOptions;
    use crate::error::Result;
    use crate::keys::KeyProfile;
    use crate::property::Leaf;
    use crate::read::{KeySelector, OpenOptions, WzArchive};
    use crate::tree::NewNode;

    #[test]
    fn empty_archive() -> Result<()> {
        let archive = WzArchive::new("Empty.wz");
        let mut out = Vec::new();
        archive.save(&mut out, SaveOptions::default())?;

        // header, version, a directory with no entries
        assert_eq!(out.len(), 60 + 2 + 1);
        assert_eq!(&out[..4], b"PKG1");
        assert_eq!(&out[60..], &[0xAC, 0x00, 0x00]);
        Ok(())
    }

    #[test]
    fn nested_directories_reopen() -> Result<()> {
        let archive = WzArchive::with_profile("Map.wz", KeyProfile::Gms);
        let map = archive.add_child(archive.root(), "Map", NewNode::Directory)?;
        let map0 = archive.add_child(map, "Map0", NewNode::Directory)?;
        for (parent, name) in [(map0, "000010000.img"), (map, "AreaCode.img")] {
            let image = archive.add_child(parent, name, NewNode::Image)?;
            archive.add_child(image, "bgm", NewNode::Leaf(Leaf::String("Bgm00/GoPicnic".into())))?;
        }
        archive.add_child(map, "Map1", NewNode::Directory)?;

        let mut out = Vec::new();
        archive.save(&mut out, SaveOptions::default())?;

        let options = OpenOptions::builder()
            .key(KeySelector::Profile(KeyProfile::Gms))
            .patch_version(83)
            .build();
        let reopened = WzArchive::from_reader("Map.wz", Cursor::new(out), options)?;
        let bgm = reopened.get("Map/Map0/000010000.img/bgm")?;
        assert_eq!(reopened.leaf(bgm)?.as_string(), Some("Bgm00/GoPicnic"));

        let names = reopened
            .children(reopened.get("Map")?)?
            .into_iter()
            .map(|id| reopened.name(id))
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(names, vec!["AreaCode.img", "Map0", "Map1"]);
        Ok(())
    }
}
