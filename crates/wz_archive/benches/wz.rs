use divan::AllocProfiler;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

/// An archive of `count` images with a handful of leaves each, saved with the GMS key
fn get_input(count: i32) -> Vec<u8> {
    use wz_archive::{KeyProfile, Leaf, NewNode, SaveOptions, WzArchive};

    let archive = WzArchive::with_profile("String.wz", KeyProfile::Gms);
    for i in 0..count {
        let image = archive
            .add_child(archive.root(), &format!("{i:07}.img"), NewNode::Image)
            .unwrap();
        let info = archive
            .add_child(image, "info", NewNode::Leaf(Leaf::Container))
            .unwrap();
        archive
            .add_child(info, "name", NewNode::Leaf(Leaf::String(format!("Item {i}"))))
            .unwrap();
        archive
            .add_child(info, "price", NewNode::Leaf(Leaf::Int(i * 10)))
            .unwrap();
    }

    let mut out = Vec::new();
    archive.save(&mut out, SaveOptions::default()).unwrap();
    out
}

pub mod read {
    use divan::Bencher;
    use std::io::Cursor;
    use wz_archive::{KeyProfile, KeySelector, OpenOptions, WzArchive};

    fn options() -> OpenOptions {
        OpenOptions::builder()
            .key(KeySelector::Profile(KeyProfile::Gms))
            .patch_version(83)
            .build()
    }

    #[divan::bench]
    fn open(bencher: Bencher) {
        bencher
            .with_inputs(|| super::get_input(500))
            .bench_values(|data| {
                divan::black_box(WzArchive::from_reader("String.wz", Cursor::new(data), options()).unwrap());
            });
    }

    #[divan::bench]
    fn detect_key(bencher: Bencher) {
        bencher
            .with_inputs(|| super::get_input(50))
            .bench_values(|data| {
                let options = OpenOptions::builder().key(KeySelector::AutoDetect).build();
                divan::black_box(WzArchive::from_reader("String.wz", Cursor::new(data), options).unwrap());
            });
    }

    #[divan::bench(sample_count = 1)]
    fn parse_all(bencher: Bencher) {
        let archive = WzArchive::from_reader("String.wz", Cursor::new(super::get_input(500)), options()).unwrap();

        bencher.bench_local(move || {
            for image in archive.children(archive.root()).unwrap() {
                divan::black_box(archive.children(image).unwrap());
            }
        });
    }
}

pub mod write {
    use divan::Bencher;
    use std::io::Cursor;
    use wz_archive::{KeyProfile, KeySelector, OpenOptions, SaveOptions, WzArchive};

    fn open() -> WzArchive {
        let options = OpenOptions::builder()
            .key(KeySelector::Profile(KeyProfile::Gms))
            .build();
        WzArchive::from_reader("String.wz", Cursor::new(super::get_input(500)), options).unwrap()
    }

    #[divan::bench]
    fn save_verbatim(bencher: Bencher) {
        bencher.with_inputs(open).bench_refs(|archive| {
            let mut out = Vec::new();
            archive.save(&mut out, SaveOptions::default()).unwrap();
            divan::black_box(out);
        });
    }

    #[divan::bench]
    fn save_rekeyed(bencher: Bencher) {
        bencher.with_inputs(open).bench_refs(|archive| {
            let mut out = Vec::new();
            let options = SaveOptions::builder().key(KeyProfile::Ems).build();
            archive.save(&mut out, options).unwrap();
            divan::black_box(out);
        });
    }
}
