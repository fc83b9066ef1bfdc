//! Values held by leaf nodes.

use std::borrow::Cow;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use binrw::BinRead;

use crate::compression::CompressionScheme;
use crate::pixel::{Bitmap, PixelFormat};
use crate::types::{SoundHeader, WaveFormat};

/// A point, stored as `Shape2D#Vector2D`
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Vector2D {
    pub x: i32,
    pub y: i32,
}

impl Vector2D {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A decrypted Lua script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub data: Arc<[u8]>,
}

impl Script {
    pub fn new(text: &str) -> Self {
        Self {
            data: Arc::from(text.as_bytes()),
        }
    }

    /// Script source, with invalid UTF-8 replaced
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// An embedded sound, stored as `Sound_DX8`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audio {
    /// Play time in milliseconds
    pub duration: i32,
    pub header: SoundHeader,

    /// Block that follows an unusual media type, see [`SoundHeader::has_media_block`]
    pub media_block: Option<Arc<[u8]>>,

    /// Raw format descriptor, `None` when the media type is blank
    pub format: Option<Arc<[u8]>>,
    pub data: Arc<[u8]>,
}

impl Audio {
    /// An MP3 or PCM sound described by `format`
    pub fn new(duration: i32, format: Vec<u8>, data: Vec<u8>) -> Self {
        Self {
            duration,
            header: SoundHeader::default(),
            media_block: None,
            format: Some(Arc::from(format)),
            data: Arc::from(data),
        }
    }

    /// The common part of the format descriptor, when there is one
    pub fn wave_format(&self) -> Option<WaveFormat> {
        let format = self.format.as_ref()?;
        WaveFormat::read(&mut Cursor::new(&format[..])).ok()
    }
}

/// Bytes of a structure that could not be interpreted, written back untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Passthrough {
    /// An extended property block, from its type name up to the end of the block
    Extended { type_name: String, body: Arc<[u8]> },

    /// The remaining entries of an image's property list, starting at the first entry with an
    /// unknown type tag
    ListTail { entries: u32, body: Arc<[u8]> },
}

/// Pixel payload of a canvas.
///
/// Holds the compressed bytes as stored in the archive, the decoded bitmap once requested, or both.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Payload {
    pub compressed: Option<Arc<[u8]>>,
    pub decoded: Option<Arc<Bitmap>>,
    pub scheme: CompressionScheme,

    /// `decoded` was replaced and `compressed` is stale
    pub dirty: bool,
}

/// An image with its pixel payload; named children hang off the canvas node
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    width: u32,
    height: u32,
    format: PixelFormat,
    mip_level: i32,
    pub(crate) payload: Payload,
}

impl Canvas {
    /// A canvas holding `bitmap`, compressed with zlib when saved
    pub fn from_bitmap(bitmap: Bitmap, format: PixelFormat) -> Self {
        Self {
            width: bitmap.width,
            height: bitmap.height,
            format,
            mip_level: 0,
            payload: Payload {
                compressed: None,
                decoded: Some(Arc::new(bitmap)),
                scheme: CompressionScheme::Zlib,
                dirty: true,
            },
        }
    }

    /// Store the pixels with `scheme` instead of plain zlib
    pub fn with_scheme(mut self, scheme: CompressionScheme) -> Self {
        self.payload.scheme = scheme;
        self.payload.dirty |= self.payload.decoded.is_some();
        self
    }

    pub(crate) fn from_compressed(
        width: u32,
        height: u32,
        format: PixelFormat,
        mip_level: i32,
        compressed: Vec<u8>,
    ) -> Self {
        let scheme = CompressionScheme::detect(&compressed);
        Self {
            width,
            height,
            format,
            mip_level,
            payload: Payload {
                compressed: Some(Arc::from(compressed)),
                decoded: None,
                scheme,
                dirty: false,
            },
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn mip_level(&self) -> i32 {
        self.mip_level
    }

    /// How the payload is compressed in the archive
    pub fn scheme(&self) -> CompressionScheme {
        self.payload.scheme
    }

    /// Compressed bytes as read from the archive, unless the bitmap was replaced since
    pub fn compressed(&self) -> Option<&[u8]> {
        match self.payload.dirty {
            true => None,
            false => self.payload.compressed.as_deref(),
        }
    }

    /// Whether a decoded bitmap is cached
    pub fn is_decoded(&self) -> bool {
        self.payload.decoded.is_some()
    }

    /// Whether the bitmap was replaced and has not been recompressed yet
    pub fn is_dirty(&self) -> bool {
        self.payload.dirty
    }

    pub(crate) fn replace(&mut self, bitmap: Bitmap) {
        self.width = bitmap.width;
        self.height = bitmap.height;
        self.payload.decoded = Some(Arc::new(bitmap));
        self.payload.dirty = true;
    }
}

/// Value of a leaf node
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    Null,
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Vector(Vector2D),

    /// Named children, stored as `Property`
    Container,

    /// Ordered vectors, stored as `Shape2D#Convex2D`
    Convex,
    Canvas(Canvas),

    /// Relative path to another node, stored as `UOL`
    Link(String),
    Script(Script),
    Audio(Audio),

    /// An opaque length-prefixed blob, stored as `RawData`
    RawData(Arc<[u8]>),
    RawPassthrough(Passthrough),
}

impl Leaf {
    /// Whether the leaf holds named children
    pub fn is_container(&self) -> bool {
        matches!(self, Leaf::Container | Leaf::Convex | Leaf::Canvas(_))
    }

    /// Kind of leaf as a short name
    pub fn kind(&self) -> &'static str {
        match self {
            Leaf::Null => "null",
            Leaf::Short(_) => "short",
            Leaf::Int(_) => "int",
            Leaf::Long(_) => "long",
            Leaf::Float(_) => "float",
            Leaf::Double(_) => "double",
            Leaf::String(_) => "string",
            Leaf::Vector(_) => "vector",
            Leaf::Container => "property",
            Leaf::Convex => "convex",
            Leaf::Canvas(_) => "canvas",
            Leaf::Link(_) => "uol",
            Leaf::Script(_) => "script",
            Leaf::Audio(_) => "sound",
            Leaf::RawData(_) => "raw",
            Leaf::RawPassthrough(_) => "passthrough",
        }
    }

    /// Any integer leaf, or a string holding one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Leaf::Short(v) => Some(*v as i64),
            Leaf::Int(v) => Some(*v as i64),
            Leaf::Long(v) => Some(*v),
            Leaf::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Any numeric leaf, or a string holding one
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Leaf::Float(v) => Some(*v as f64),
            Leaf::Double(v) => Some(*v),
            Leaf::String(s) => s.trim().parse().ok(),
            other => other.as_int().map(|v| v as f64),
        }
    }

    /// String and link leaves
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Leaf::String(s) | Leaf::Link(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vector2D> {
        match self {
            Leaf::Vector(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_canvas(&self) -> Option<&Canvas> {
        match self {
            Leaf::Canvas(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&Audio> {
        match self {
            Leaf::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_script(&self) -> Option<&Script> {
        match self {
            Leaf::Script(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&str> {
        match self {
            Leaf::Link(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leaf::Null | Leaf::Container | Leaf::Convex => write!(f, "{}", self.kind()),
            Leaf::Short(v) => write!(f, "{v}"),
            Leaf::Int(v) => write!(f, "{v}"),
            Leaf::Long(v) => write!(f, "{v}"),
            Leaf::Float(v) => write!(f, "{v}"),
            Leaf::Double(v) => write!(f, "{v}"),
            Leaf::String(s) => write!(f, "{s:?}"),
            Leaf::Vector(v) => write!(f, "({}, {})", v.x, v.y),
            Leaf::Canvas(c) => write!(f, "canvas {}x{} {}", c.width, c.height, c.format),
            Leaf::Link(path) => write!(f, "-> {path}"),
            Leaf::Script(s) => write!(f, "script, {} bytes", s.data.len()),
            Leaf::Audio(a) => write!(f, "sound {}ms, {} bytes", a.duration, a.data.len()),
            Leaf::RawData(data) => write!(f, "raw, {} bytes", data.len()),
            Leaf::RawPassthrough(Passthrough::Extended { type_name, body }) => {
                write!(f, "unknown {type_name}, {} bytes", body.len())
            }
            Leaf::RawPassthrough(Passthrough::ListTail { entries, body }) => {
                write!(f, "{entries} unknown entries, {} bytes", body.len())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Audio, Leaf, Vector2D};

    #[test]
    fn numeric_accessors_coerce() {
        assert_eq!(Leaf::Short(-3).as_int(), Some(-3));
        assert_eq!(Leaf::String(" 42 ".into()).as_int(), Some(42));
        assert_eq!(Leaf::Int(7).as_float(), Some(7.0));
        assert_eq!(Leaf::Vector(Vector2D::new(1, 2)).as_int(), None);
        assert_eq!(Leaf::Link("../a".into()).as_string(), Some("../a"));
    }

    #[test]
    fn audio_format_descriptor() {
        #[rustfmt::skip]
        let format = vec![
            0x01, 0x00, 0x01, 0x00,
            0x22, 0x56, 0x00, 0x00,
            0x44, 0xAC, 0x00, 0x00,
            0x02, 0x00, 0x10, 0x00,
            0x00, 0x00,
        ];
        let audio = Audio::new(1000, format, vec![0; 16]);
        let wave = audio.wave_format();

        assert_eq!(wave.map(|w| w.samples_per_sec), Some(22050));
        assert_eq!(wave.map(|w| w.bits_per_sample), Some(16));
    }
}
