//! Reading and writing the property tree stored inside an image.
//!
//! An image is a self-contained byte range: string references inside it are offsets from its first
//! byte. It is either a property list or a single Lua script.
//!
//! | Tag | Value                                   |
//! |-----|-----------------------------------------|
//! | 0   | null                                    |
//! | 2   | `i16` (11 also accepted)                |
//! | 3   | compressed `i32` (19 also accepted)     |
//! | 20  | compressed `i64`                        |
//! | 4   | `0x80` then `f32`, or `0` for zero      |
//! | 5   | `f64`                                   |
//! | 8   | string block                            |
//! | 9   | `u32` length then an extended property  |
//!
//! Extended properties start with a type name: `Property`, `Canvas`, `Shape2D#Vector2D`,
//! `Shape2D#Convex2D`, `Sound_DX8`, `UOL` or `RawData`. Anything else is kept as raw bytes.

use std::borrow::Cow;
use std::io::Cursor;
use std::sync::Arc;

use binrw::{BinRead, BinWrite};
use tracing::{instrument, warn};

use crate::compression::{self, CompressionScheme};
use crate::cursor::WzReader;
use crate::error::{Error, Result};
use crate::keys::KeyStream;
use crate::pixel::{self, PixelFormat};
use crate::property::{Audio, Canvas, Leaf, Passthrough, Script, Vector2D};
use crate::tree::{Arena, Body, NodeId};
use crate::types::{SoundHeader, IMAGE_HEADER, IMAGE_HEADER_REFERENCE, LUA_HEADER, MAX_ENTRIES};
use crate::writer::WzWriter;

/// Name of the single child of a script image
pub const SCRIPT_NAME: &str = "Script";

const EXTENDED: u8 = 9;

/// A parsed node that has not been attached to an archive yet
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Draft {
    pub name: String,
    pub leaf: Leaf,
    pub children: Vec<Draft>,
}

impl Draft {
    fn new(name: String, leaf: Leaf) -> Self {
        Self {
            name,
            leaf,
            children: Vec::new(),
        }
    }
}

/// Parse the bytes of an image into its top level nodes
#[instrument(skip_all, fields(len = bytes.len()), err)]
pub(crate) fn parse_image(bytes: &[u8], key: &Arc<KeyStream>) -> Result<Vec<Draft>> {
    let mut parser = ImageParser {
        bytes,
        r: WzReader::new(Cursor::new(bytes), key.clone())?,
    };

    match bytes.first() {
        Some(&LUA_HEADER) => {
            parser.r.skip(1)?;
            let len = parser.r.read_length("script")?;
            let data = parser.r.read_decrypted(len, &KeyStream::lua())?;
            Ok(vec![Draft::new(
                SCRIPT_NAME.to_string(),
                Leaf::Script(Script {
                    data: Arc::from(data),
                }),
            )])
        }
        Some(&IMAGE_HEADER) | Some(&IMAGE_HEADER_REFERENCE) => {
            let type_name = parser.r.read_string_block(0)?;
            if type_name != "Property" {
                return Err(Error::WrongKeyOrCorrupt(format!(
                    "image starts with {type_name:?}"
                )));
            }
            parser.list(true)
        }
        other => Err(Error::WrongKeyOrCorrupt(format!(
            "image header byte {other:02X?}"
        ))),
    }
}

struct ImageParser<'a> {
    bytes: &'a [u8],
    r: WzReader<Cursor<&'a [u8]>>,
}

impl ImageParser<'_> {
    fn list(&mut self, top_level: bool) -> Result<Vec<Draft>> {
        self.r.skip(2)?;
        let count = self.r.read_compressed_int()?;
        if !(0..=MAX_ENTRIES).contains(&count) {
            return Err(Error::WrongKeyOrCorrupt(format!("property count {count}")));
        }

        let mut drafts = Vec::with_capacity(count.min(1024) as usize);
        for index in 0..count {
            let start = self.r.position()? as usize;
            let name = self.r.read_string_block(0)?;
            let leaf = match self.r.read_u8()? {
                0 => Leaf::Null,
                2 | 11 => Leaf::Short(self.r.read_i16()?),
                3 | 19 => Leaf::Int(self.r.read_compressed_int()?),
                20 => Leaf::Long(self.r.read_compressed_long()?),
                4 => match self.r.read_u8()? {
                    0x80 => Leaf::Float(self.r.read_f32()?),
                    0 => Leaf::Float(0.0),
                    marker => {
                        warn!(marker, name = %name, "dropping float with unknown marker");
                        continue;
                    }
                },
                5 => Leaf::Double(self.r.read_f64()?),
                8 => Leaf::String(self.r.read_string_block(0)?),
                EXTENDED => {
                    let len = self.r.read_u32()?;
                    let len = self.r.check_length(len as i64, "extended property")?;
                    let end = self.r.position()? + len as u64;
                    drafts.push(self.bounded(name, end)?);
                    continue;
                }
                tag if top_level => {
                    warn!(tag, name = %name, "unknown property tag, keeping the rest of the image as is");
                    drafts.push(Draft::new(
                        name,
                        Leaf::RawPassthrough(Passthrough::ListTail {
                            entries: (count - index) as u32,
                            body: Arc::from(&self.bytes[start..]),
                        }),
                    ));
                    self.r.seek(self.bytes.len() as u64)?;
                    break;
                }
                tag => {
                    return Err(Error::UnknownLeafShape(format!(
                        "property tag {tag} for {name}"
                    )))
                }
            };
            drafts.push(Draft::new(name, leaf));
        }

        Ok(drafts)
    }

    /// An extended property that must end exactly at `end`. Anything that fails to parse is kept
    /// as raw bytes.
    fn bounded(&mut self, name: String, end: u64) -> Result<Draft> {
        let begin = self.r.position()?;
        let parsed = self.extended(name.clone());
        let position = self.r.position()?;

        let draft = match parsed {
            Ok(draft) if position == end => draft,
            Err(e @ (Error::LifetimeViolation(_) | Error::Poisoned)) => return Err(e),
            outcome => {
                let reason = match outcome {
                    Err(e) => e.to_string(),
                    Ok(_) => format!("block ends at {end:#X}, parsed up to {position:#X}"),
                };
                self.r.seek(begin)?;
                let type_name = self.r.read_string_block(0).unwrap_or_default();
                warn!(name = %name, type_name = %type_name, "keeping extended property as raw bytes: {reason}");

                Draft::new(
                    name,
                    Leaf::RawPassthrough(Passthrough::Extended {
                        type_name,
                        body: Arc::from(&self.bytes[begin as usize..end as usize]),
                    }),
                )
            }
        };

        self.r.seek(end)?;
        Ok(draft)
    }

    fn extended(&mut self, name: String) -> Result<Draft> {
        let type_name = self.r.read_string_block(0)?;

        let leaf = match type_name.as_str() {
            "Property" => {
                let children = self.list(false)?;
                return Ok(Draft {
                    name,
                    leaf: Leaf::Container,
                    children,
                });
            }
            "Canvas" => return self.canvas(name),
            "Shape2D#Convex2D" => {
                let count = self.r.read_compressed_int()?;
                if !(0..=MAX_ENTRIES).contains(&count) {
                    return Err(Error::WrongKeyOrCorrupt(format!("convex count {count}")));
                }
                let children = (0..count)
                    .map(|i| self.extended(i.to_string()))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Draft {
                    name,
                    leaf: Leaf::Convex,
                    children,
                });
            }
            "Shape2D#Vector2D" => {
                let x = self.r.read_compressed_int()?;
                let y = self.r.read_compressed_int()?;
                Leaf::Vector(Vector2D::new(x, y))
            }
            "Sound_DX8" => {
                self.r.skip(1)?;
                let len = self.r.read_length("sound")?;
                let duration = self.r.read_compressed_int()?;
                let header = SoundHeader::read(&mut Cursor::new(self.r.read_bytes(51)?))?;
                let media_block = match header.has_media_block() {
                    true => {
                        let block_len = self.r.read_u8()? as usize;
                        Some(Arc::from(self.r.read_bytes(block_len)?))
                    }
                    false => None,
                };
                let format = match header.has_format() {
                    true => {
                        let format_len = self.r.read_u8()? as usize;
                        Some(Arc::from(self.r.read_bytes(format_len)?))
                    }
                    false => None,
                };
                Leaf::Audio(Audio {
                    duration,
                    header,
                    media_block,
                    format,
                    data: Arc::from(self.r.read_bytes(len)?),
                })
            }
            "UOL" => {
                self.r.skip(1)?;
                Leaf::Link(self.r.read_string_block(0)?)
            }
            "RawData" => {
                self.r.skip(1)?;
                let len = self.r.read_i32()?;
                let len = self.r.check_length(len as i64, "raw data")?;
                Leaf::RawData(Arc::from(self.r.read_bytes(len)?))
            }
            other => {
                return Err(Error::UnknownLeafShape(format!(
                    "extended property type {other}"
                )))
            }
        };

        Ok(Draft::new(name, leaf))
    }

    fn canvas(&mut self, name: String) -> Result<Draft> {
        self.r.skip(1)?;
        let children = match self.r.read_u8()? {
            1 => self.list(false)?,
            _ => Vec::new(),
        };

        let width = self.r.read_compressed_int()?;
        let height = self.r.read_compressed_int()?;
        let format = PixelFormat::from(self.r.read_compressed_int()?);
        let mip_level = self.r.read_compressed_int()?;
        if width < 0 || height < 0 {
            return Err(Error::WrongKeyOrCorrupt(format!(
                "canvas size {width}x{height}"
            )));
        }

        self.r.skip(4)?;
        let len = self.r.read_i32()?;
        let len = self.r.check_length(len as i64 - 1, "canvas payload")?;
        self.r.skip(1)?;
        let payload = self.r.read_bytes(len)?;

        Ok(Draft {
            name,
            leaf: Leaf::Canvas(Canvas::from_compressed(
                width as u32,
                height as u32,
                format,
                mip_level,
                payload,
            )),
            children,
        })
    }
}

/// Serialize the children of `image`, which must already be parsed.
///
/// Canvas payloads read with `source_key` are re-encrypted for `key` when they need to be; replaced
/// bitmaps are compressed again.
#[instrument(skip(nodes, source_key, key), err)]
pub(crate) fn write_image(
    nodes: &Arena,
    image: NodeId,
    source_key: &KeyStream,
    key: &Arc<KeyStream>,
) -> Result<Vec<u8>> {
    let mut writer = ImageWriter {
        nodes,
        source_key,
        key: key.clone(),
        w: WzWriter::new(Cursor::new(Vec::new()), key.clone()),
    };
    let children = &nodes.get(image)?.children;

    if let [only] = children[..] {
        if let Body::Leaf(Leaf::Script(script)) = &nodes.get(only)?.body {
            writer.w.write_u8(LUA_HEADER)?;
            writer.w.write_compressed_int(script.data.len() as i32)?;
            writer.w.write_encrypted(&script.data, &KeyStream::lua())?;
            return Ok(writer.w.into_inner().into_inner());
        }
    }

    writer.type_name("Property")?;
    writer.list(children)?;
    Ok(writer.w.into_inner().into_inner())
}

struct ImageWriter<'a> {
    nodes: &'a Arena,
    source_key: &'a KeyStream,
    key: Arc<KeyStream>,
    w: WzWriter<Cursor<Vec<u8>>>,
}

impl ImageWriter<'_> {
    fn type_name(&mut self, name: &str) -> Result<()> {
        self.w
            .write_string_value(name, IMAGE_HEADER, IMAGE_HEADER_REFERENCE)
    }

    fn list(&mut self, children: &[NodeId]) -> Result<()> {
        let mut entries = Vec::with_capacity(children.len());
        let mut tails = Vec::new();
        let mut count = 0u32;

        for id in children {
            let node = self.nodes.get(*id)?;
            match &node.body {
                Body::Leaf(Leaf::RawPassthrough(Passthrough::ListTail { entries, body })) => {
                    count += entries;
                    tails.push(body.clone());
                }
                _ => {
                    count += 1;
                    entries.push(*id);
                }
            }
        }

        self.w.write_u16(0)?;
        self.w.write_compressed_int(count as i32)?;
        for id in entries {
            self.entry(id)?;
        }
        for body in tails {
            self.w.write_bytes(&body)?;
        }
        Ok(())
    }

    fn entry(&mut self, id: NodeId) -> Result<()> {
        let node = self.nodes.get(id)?;
        let Body::Leaf(leaf) = &node.body else {
            return Err(Error::InvalidOperation(format!(
                "{} cannot be stored inside an image",
                self.nodes.path(id)?
            )));
        };

        self.w.write_string_value(&node.name, 0x00, 0x01)?;
        match leaf {
            Leaf::Null => self.w.write_u8(0)?,
            Leaf::Short(v) => {
                self.w.write_u8(2)?;
                self.w.write_i16(*v)?;
            }
            Leaf::Int(v) => {
                self.w.write_u8(3)?;
                self.w.write_compressed_int(*v)?;
            }
            Leaf::Long(v) => {
                self.w.write_u8(20)?;
                self.w.write_compressed_long(*v)?;
            }
            Leaf::Float(v) => {
                self.w.write_u8(4)?;
                if *v == 0.0 {
                    self.w.write_u8(0)?;
                } else {
                    self.w.write_u8(0x80)?;
                    self.w.write_f32(*v)?;
                }
            }
            Leaf::Double(v) => {
                self.w.write_u8(5)?;
                self.w.write_f64(*v)?;
            }
            Leaf::String(s) => {
                self.w.write_u8(8)?;
                self.w.write_string_value(s, 0x00, 0x01)?;
            }
            Leaf::Script(_) => {
                return Err(Error::InvalidOperation(format!(
                    "script {} must be the only node of its image",
                    self.nodes.path(id)?
                )))
            }
            _ => {
                self.w.write_u8(EXTENDED)?;
                let length_at = self.w.position()?;
                self.w.write_u32(0)?;
                self.extended(id)?;
                let len = self.w.position()? - length_at - 4;
                self.w.patch_u32(length_at, len as u32)?;
            }
        }
        Ok(())
    }

    fn extended(&mut self, id: NodeId) -> Result<()> {
        let node = self.nodes.get(id)?;
        let Body::Leaf(leaf) = &node.body else {
            return Err(Error::InvalidOperation(format!("{} is not a leaf", node.name)));
        };

        match leaf {
            Leaf::Container => {
                self.type_name("Property")?;
                self.list(&node.children)?;
            }
            Leaf::Canvas(canvas) => {
                self.type_name("Canvas")?;
                self.w.write_u8(0)?;
                if node.children.is_empty() {
                    self.w.write_u8(0)?;
                } else {
                    self.w.write_u8(1)?;
                    self.list(&node.children)?;
                }
                self.w.write_compressed_int(canvas.width() as i32)?;
                self.w.write_compressed_int(canvas.height() as i32)?;
                self.w.write_compressed_int(canvas.format().code())?;
                self.w.write_compressed_int(canvas.mip_level())?;
                self.w.write_i32(0)?;

                let payload = self.canvas_payload(canvas)?;
                self.w.write_i32(payload.len() as i32 + 1)?;
                self.w.write_u8(0)?;
                self.w.write_bytes(&payload)?;
            }
            Leaf::Vector(v) => {
                self.type_name("Shape2D#Vector2D")?;
                self.w.write_compressed_int(v.x)?;
                self.w.write_compressed_int(v.y)?;
            }
            Leaf::Convex => {
                self.type_name("Shape2D#Convex2D")?;
                self.w.write_compressed_int(node.children.len() as i32)?;
                for child in &node.children {
                    self.extended(*child)?;
                }
            }
            Leaf::Link(path) => {
                self.type_name("UOL")?;
                self.w.write_u8(0)?;
                self.w.write_string_value(path, 0x00, 0x01)?;
            }
            Leaf::Audio(audio) => {
                self.type_name("Sound_DX8")?;
                self.w.write_u8(0)?;
                self.w.write_compressed_int(audio.data.len() as i32)?;
                self.w.write_compressed_int(audio.duration)?;

                let mut header = Cursor::new(Vec::new());
                audio.header.write(&mut header)?;
                self.w.write_bytes(header.get_ref())?;
                if audio.header.has_media_block() {
                    let block = audio.media_block.as_deref().unwrap_or_default();
                    self.w.write_u8(block.len() as u8)?;
                    self.w.write_bytes(block)?;
                }
                if audio.header.has_format() {
                    let format = audio.format.as_deref().unwrap_or_default();
                    self.w.write_u8(format.len() as u8)?;
                    self.w.write_bytes(format)?;
                }
                self.w.write_bytes(&audio.data)?;
            }
            Leaf::RawData(data) => {
                self.type_name("RawData")?;
                self.w.write_u8(0)?;
                self.w.write_i32(data.len() as i32)?;
                self.w.write_bytes(data)?;
            }
            Leaf::RawPassthrough(Passthrough::Extended { body, .. }) => {
                self.w.write_bytes(body)?;
            }
            other => {
                return Err(Error::InvalidOperation(format!(
                    "a {} cannot be stored as an extended property",
                    other.kind()
                )))
            }
        }
        Ok(())
    }

    fn canvas_payload<'c>(&self, canvas: &'c Canvas) -> Result<Cow<'c, [u8]>> {
        let payload = &canvas.payload;
        match (&payload.compressed, &payload.decoded, payload.dirty) {
            (Some(compressed), _, false) => {
                let reencrypt = payload.scheme == CompressionScheme::ListWz
                    && self.source_key.profile() != self.key.profile();
                match reencrypt {
                    true => Ok(Cow::Owned(compression::rekey(
                        compressed,
                        self.source_key,
                        &self.key,
                    )?)),
                    false => Ok(Cow::Borrowed(compressed)),
                }
            }
            (_, Some(bitmap), _) => {
                let raw = pixel::encode(canvas.format(), bitmap)?;
                Ok(Cow::Owned(compression::compress(
                    &raw,
                    payload.scheme,
                    &self.key,
                )?))
            }
            _ => Err(Error::InvalidOperation("canvas without pixels".into())),
        }
    }
}
