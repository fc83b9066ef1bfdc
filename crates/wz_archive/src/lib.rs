//! This library reads, edits and writes the **WZ** archives used by *MapleStory*.
//!
//! # WZ Archive Format Documentation
//!
//! A WZ archive packs a directory tree of *images* into one file. Every image is a serialized
//! property tree holding numbers, strings, vectors, canvases, sounds, links and scripts. Strings and
//! scripts are XOR encrypted with a region specific key stream (see [`keys`]), and the offsets of the
//! directory table are obfuscated with a hash of the game patch version.
//!
//! ## File Structure
//!
//! | Offset (bytes) | Field        | Description                                                      |
//! |----------------|--------------|------------------------------------------------------------------|
//! | 0x0000         | Magic number | 4 bytes: `PKG1`                                                  |
//! | 0x0004         | Size         | 8 bytes: file length minus the data start                        |
//! | 0x000C         | Data start   | 4 bytes: offset of the version field, usually `60`               |
//! | 0x0010         | Copyright    | Null terminated, padded with zeros up to the data start          |
//! | data start     | Version      | 2 bytes: encrypted patch version, absent in 64-bit client files  |
//! | ...            | Directories  | The root directory block, followed by every subdirectory block   |
//! | ...            | Images       | Image bodies, in directory order                                 |
//!
//! ### Directory Blocks
//!
//! A block starts with a compressed count of entries. Each entry is
//!
//! | Field    | Description                                                                   |
//! |----------|-------------------------------------------------------------------------------|
//! | Type     | 1 byte: `1` unknown, `2` reference to a name, `3` directory, `4` image         |
//! | Name     | Encrypted string, or for `2` an `i32` offset from the data start to the name |
//! | Size     | Compressed int: byte length of the image, or of every image in a directory   |
//! | Checksum | Compressed int: byte sum of the image                                         |
//! | Offset   | 4 bytes: obfuscated absolute offset of the image or directory block           |
//!
//! Images are written first, then subdirectories; the block of every subdirectory follows its
//! parent's block in pre-order.
//!
//! ### Compressed Integers
//!
//! A signed byte, or the marker `-128` followed by an `i32` (an `i64` for compressed longs).
//!
//! ### Strings
//!
//! A signed length byte: positive means UTF-16 of that many units, negative means a narrow string;
//! `127` and `-128` are followed by an `i32` length. Narrow bytes are XORed with the key stream and
//! a mask starting at `0xAA`, UTF-16 units with the stream and a mask starting at `0xAAAA`.
//!
//! ### Images
//!
//! Images start with `0x73` (or `0x1B` and an offset to an earlier string) and the type name
//! `Property`, then a property list. See [`image`] for the tag table. An image starting with `0x01`
//! holds a single encrypted Lua script.
//!
//! ## Additional Information
//!
//! - **File Extension**: `.wz`, with `List.wz` using the separate [`listfile`] format
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Key Profiles**: `gms`, `ems` and `none` are built in, see [`KeyProfile`]
//! - **Canvas Compression**: zlib, or on old clients zlib split into XOR encrypted blocks
//!

pub mod compression;
pub mod cursor;
pub mod error;
pub mod image;
pub mod keys;
pub mod link;
pub mod listfile;
pub mod pixel;
pub mod property;
pub mod read;
pub mod tree;
pub mod types;
pub mod write;
pub mod writer;

pub use compression::CompressionScheme;
pub use keys::KeyProfile;
pub use link::ArchiveSet;
pub use pixel::{Bitmap, PixelFormat};
pub use property::{Audio, Canvas, Leaf, Passthrough, Script, Vector2D};
pub use read::{KeySelector, OpenOptions, VersionInfo, WzArchive};
pub use tree::{ArchiveNode, ImageInfo, NewNode, NodeId};
pub use write::SaveOptions;
