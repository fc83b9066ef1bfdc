mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tracing::info;
use tracing_test::traced_test;
use wz_archive::error::{Error, Result};
use wz_archive::{
    ArchiveNode, KeyProfile, KeySelector, Leaf, NewNode, SaveOptions, Vector2D, WzArchive,
};

use common::{names, reopen, sample, save, PIXELS};

#[traced_test]
#[test]
fn detects_key_and_version() -> Result<()> {
    let bytes = save(&sample(KeyProfile::Gms)?, SaveOptions::default())?;
    let archive = reopen(bytes, KeySelector::AutoDetect)?;

    assert_eq!(archive.key_profile(), KeyProfile::Gms);
    assert_eq!(archive.version().patch_version, 83);
    assert!(!archive.version().is_64bit());
    assert_eq!(names(&archive, "")?, vec!["0100100.img", "Boss"]);
    Ok(())
}

#[test]
fn brute_force_agrees_with_detection() -> Result<()> {
    let bytes = save(&sample(KeyProfile::Ems)?, SaveOptions::default())?;
    let archive = reopen(bytes, KeySelector::BruteForce)?;

    assert_eq!(archive.key_profile(), KeyProfile::Ems);
    Ok(())
}

#[test]
fn encrypted_archive_with_no_key() -> Result<()> {
    let bytes = save(&sample(KeyProfile::Gms)?, SaveOptions::default())?;

    match reopen(bytes, KeySelector::Profile(KeyProfile::None)) {
        Err(Error::WrongKeyOrCorrupt(message)) => info!("rejected: {message}"),
        other => panic!("expected WrongKeyOrCorrupt, got {other:?}"),
    }
    Ok(())
}

#[test]
fn every_leaf_survives_a_save() -> Result<()> {
    let bytes = save(&sample(KeyProfile::Gms)?, SaveOptions::default())?;
    let archive = reopen(bytes, KeySelector::Profile(KeyProfile::Gms))?;

    let leaf = |path: &str| -> Result<Leaf> { archive.leaf(archive.get(path)?) };
    assert_eq!(leaf("0100100.img/info/speed")?, Leaf::Int(-20));
    assert_eq!(leaf("0100100.img/info/name")?.as_string(), Some("Snail"));
    assert_eq!(leaf("0100100.img/info/bodyAttack")?, Leaf::Short(1));
    assert_eq!(leaf("0100100.img/info/rate")?, Leaf::Float(0.5));
    assert_eq!(leaf("0100100.img/info/ratio")?, Leaf::Double(2.25));
    assert_eq!(leaf("0100100.img/info/exp")?.as_int(), Some(5_000_000_000));
    assert_eq!(
        leaf("0100100.img/info/origin")?.as_vector(),
        Some(Vector2D::new(-3, 7))
    );
    assert_eq!(leaf("Boss/8510000.img/level")?.as_int(), Some(110));

    let frame = archive.get("0100100.img/stand/0")?;
    assert_eq!(archive.bitmap(frame)?.data, PIXELS.to_vec());
    assert_eq!(leaf("0100100.img/stand/0/delay")?.as_int(), Some(120));
    Ok(())
}

#[test]
fn images_parse_on_first_access() -> Result<()> {
    let bytes = save(&sample(KeyProfile::None)?, SaveOptions::default())?;
    let archive = reopen(bytes, KeySelector::AutoDetect)?;

    let image = archive.get("0100100.img")?;
    assert!(matches!(archive.node(image)?, ArchiveNode::Image(_)));
    assert!(!archive.is_parsed(image)?);

    assert_eq!(names(&archive, "0100100.img")?, vec!["info", "stand", "move"]);
    assert!(archive.is_parsed(image)?);
    assert!(!archive.is_parsed(archive.get("Boss/8510000.img")?)?);
    Ok(())
}

#[test]
fn link_resolves_after_reopen() -> Result<()> {
    let bytes = save(&sample(KeyProfile::Gms)?, SaveOptions::default())?;
    let archive = reopen(bytes, KeySelector::AutoDetect)?;

    let link = archive.get("0100100.img/move")?;
    assert_eq!(archive.leaf(link)?.as_link(), Some("stand/0"));
    assert_eq!(archive.resolve_link(link)?, archive.get("0100100.img/stand/0")?);
    Ok(())
}

#[test]
fn parallel_first_access() -> Result<()> {
    let archive = WzArchive::with_profile("Npc.wz", KeyProfile::Gms);
    for i in 0..50 {
        let image = archive.add_child(archive.root(), &format!("{i}.img"), NewNode::Image)?;
        archive.add_child(image, "id", NewNode::Leaf(Leaf::Int(i)))?;
    }
    let bytes = save(&archive, SaveOptions::default())?;
    let archive = Arc::new(reopen(bytes, KeySelector::AutoDetect)?);
    let images = archive.children(archive.root())?;

    let results = std::thread::scope(|scope| {
        let handles = (0..50)
            .map(|thread| {
                let archive = &archive;
                let images = &images;
                scope.spawn(move || -> Result<()> {
                    for offset in 0..images.len() {
                        let image = images[(thread + offset) % images.len()];
                        let id = archive
                            .child(image, "id")?
                            .ok_or_else(|| Error::BrokenLink("id".into()))?;
                        archive.leaf(id)?;
                    }
                    Ok(())
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("reader thread panicked"))
            .collect::<Vec<_>>()
    });
    for result in results {
        result?;
    }

    for (i, image) in images.iter().enumerate() {
        assert_eq!(archive.materialization_count(*image)?, 1);
        let id = archive.get_from(*image, "id")?;
        assert_eq!(archive.leaf(id)?.as_int(), Some(i as i64));
    }
    Ok(())
}

#[test]
fn closed_archive_cannot_parse() -> Result<()> {
    let bytes = save(&sample(KeyProfile::Gms)?, SaveOptions::default())?;
    let archive = reopen(bytes, KeySelector::AutoDetect)?;
    let parsed = archive.get("0100100.img/info")?;

    archive.close();
    assert!(!archive.is_open());
    assert!(archive.leaf(archive.get_from(parsed, "speed")?).is_ok());
    assert!(matches!(
        archive.children(archive.get("Boss/8510000.img")?),
        Err(Error::LifetimeViolation(path)) if path.ends_with("8510000.img")
    ));
    Ok(())
}

#[test]
fn missing_path() -> Result<()> {
    let archive = sample(KeyProfile::None)?;
    assert!(matches!(
        archive.get("0100100.img/info/missing"),
        Err(Error::NodeNotFound(_))
    ));
    assert_eq!(
        archive.get("0100100.img/stand/0/../../info/speed")?,
        archive.get("0100100.img/info/speed")?
    );
    Ok(())
}
