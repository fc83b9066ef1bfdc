use std::io::Cursor;

use wz_archive::error::Result;
use wz_archive::{
    Bitmap, Canvas, KeyProfile, KeySelector, Leaf, NewNode, OpenOptions, PixelFormat, SaveOptions,
    Vector2D, WzArchive,
};

#[rustfmt::skip]
pub const PIXELS: [u8; 16] = [
    0x10, 0x20, 0x30, 0xFF,  0x40, 0x50, 0x60, 0xFF,
    0x70, 0x80, 0x90, 0x80,  0xA0, 0xB0, 0xC0, 0x00,
];

/// A small `Mob.wz` with one populated image, a linked frame and a nested directory
pub fn sample(profile: KeyProfile) -> Result<WzArchive> {
    let archive = WzArchive::with_profile("Mob.wz", profile);
    let root = archive.root();

    let snail = archive.add_child(root, "0100100.img", NewNode::Image)?;
    let info = archive.add_child(snail, "info", NewNode::Leaf(Leaf::Container))?;
    for (name, leaf) in [
        ("speed", Leaf::Int(-20)),
        ("name", Leaf::String("Snail".into())),
        ("bodyAttack", Leaf::Short(1)),
        ("rate", Leaf::Float(0.5)),
        ("ratio", Leaf::Double(2.25)),
        ("exp", Leaf::Long(5_000_000_000)),
        ("origin", Leaf::Vector(Vector2D::new(-3, 7))),
    ] {
        archive.add_child(info, name, NewNode::Leaf(leaf))?;
    }

    let stand = archive.add_child(snail, "stand", NewNode::Leaf(Leaf::Container))?;
    let bitmap = Bitmap::from_bgra(2, 2, PIXELS.to_vec())?;
    let frame = archive.add_child(
        stand,
        "0",
        NewNode::Leaf(Leaf::Canvas(Canvas::from_bitmap(bitmap, PixelFormat::Bgra8888))),
    )?;
    archive.add_child(frame, "delay", NewNode::Leaf(Leaf::Int(120)))?;
    archive.add_child(snail, "move", NewNode::Leaf(Leaf::Link("stand/0".into())))?;

    let boss = archive.add_child(root, "Boss", NewNode::Directory)?;
    let pianus = archive.add_child(boss, "8510000.img", NewNode::Image)?;
    archive.add_child(pianus, "level", NewNode::Leaf(Leaf::Int(110)))?;

    Ok(archive)
}

pub fn save(archive: &WzArchive, options: SaveOptions) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    archive.save(&mut out, options)?;
    Ok(out)
}

pub fn reopen(bytes: Vec<u8>, key: KeySelector) -> Result<WzArchive> {
    WzArchive::from_reader(
        "Mob.wz",
        Cursor::new(bytes),
        OpenOptions::builder().key(key).build(),
    )
}

/// Names of the children of `path`
pub fn names(archive: &WzArchive, path: &str) -> Result<Vec<String>> {
    archive
        .children(archive.get(path)?)?
        .into_iter()
        .map(|id| archive.name(id))
        .collect()
}
