//! On-disk layout tests against the documented AmigaDOS byte positions.

use amiga_fs::{FileSystem, FsName, FsVolumeType};
use format_adf::{Density, ADF_SIZE_DD};

fn read32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn checksum(block: &[u8], skip: usize) -> u32 {
    let mut sum: u32 = 0;
    for offset in (0..block.len()).step_by(4) {
        if offset != skip {
            sum = sum.wrapping_add(read32(block, offset));
        }
    }
    sum.wrapping_neg()
}

#[test]
fn empty_ofs_format_writes_canonical_root_block() {
    let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Empty", false);
    let adf = fs.to_adf().expect("export");
    let image = adf.data();
    assert_eq!(image.len(), ADF_SIZE_DD);

    // Boot block signature, no boot code.
    assert_eq!(&image[0..3], b"DOS");
    assert_eq!(image[3], 0x00);

    // Root block sits at the middle of the disk.
    let root = &image[ADF_SIZE_DD / 2..ADF_SIZE_DD / 2 + 512];
    assert_eq!(root[3], 0x02, "type word = 2");
    assert_eq!(root[15], 0x48, "hash table holds 72 entries");
    assert_eq!(&root[312..316], &[0xFF; 4], "bitmap-valid flag");
    assert_eq!(root[511], 0x01, "secondary type = 1 (root)");

    // First bitmap block pointer: block 881 in the first bm-pages slot.
    assert_eq!(read32(root, 316), 881);
    assert_eq!(root[318], 0x03);
    assert_eq!(root[319], 0x71);

    // Stored checksum matches the recomputed value.
    assert_eq!(read32(root, 20), checksum(root, 20));

    // Apart from boot, root, and the bitmap, the disk is zero.
    for nr in 0..1760 {
        if [0usize, 1, 880, 881].contains(&nr) {
            continue;
        }
        let block = &image[nr * 512..(nr + 1) * 512];
        assert!(block.iter().all(|&b| b == 0), "block {nr} should be zero");
    }
}

#[test]
fn bootable_ffs_format_writes_documented_bootstrap() {
    let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ffs, "Boot", true);
    let adf = fs.to_adf().expect("export");
    let image = adf.data();

    assert_eq!(&image[0..4], b"DOS\x01");
    assert_eq!(&image[4..8], &[0xE3, 0x3D, 0x0E, 0x72]);
}

#[test]
fn bootable_ofs_format_writes_documented_bootstrap() {
    let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Boot", true);
    let adf = fs.to_adf().expect("export");
    let image = adf.data();

    assert_eq!(&image[0..4], b"DOS\x00");
    assert_eq!(&image[4..8], &[0xC0, 0x20, 0x0F, 0x19]);
}

#[test]
fn colliding_names_chain_through_next_hash_ref() {
    let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Hash", false);
    let first = fs.create_file("test").expect("first");
    let second = fs.create_file("test2").expect("second");

    let h1 = FsName::new("test").hash_value() % 72;
    let h2 = FsName::new("test2").hash_value() % 72;
    if h1 == h2 {
        assert_eq!(
            fs.block(first).expect("first block").next_hash_ref(),
            second,
            "colliding entry must append to the chain tail"
        );
    } else {
        assert_eq!(fs.block(first).expect("first block").next_hash_ref(), 0);
    }

    assert_eq!(fs.seek_ref(&FsName::new("test")), Some(first));
    assert_eq!(fs.seek_ref(&FsName::new("test2")), Some(second));
}

#[test]
fn host_directory_round_trip_preserves_names_and_contents() {
    let base = std::env::temp_dir().join(format!("amiga-fs-roundtrip-{}", std::process::id()));
    let src = base.join("src");
    let dst = base.join("dst");
    let _ = std::fs::remove_dir_all(&base);
    std::fs::create_dir_all(src.join("S")).expect("host mkdir");
    std::fs::write(src.join("S/Startup-Sequence"), b"LoadWB\nEndCLI >NIL:\n").expect("host write");
    std::fs::write(src.join("ReadMe"), b"hello amiga").expect("host write");

    let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ffs, "Round", false);
    fs.import_directory(&src, true).expect("import");
    let report = fs.check();
    assert_eq!(report.corrupted_blocks, 0);
    assert_eq!(report.bitmap_errors, 0);

    fs.change_dir("/");
    fs.export_directory(&dst).expect("export");

    let exported = std::fs::read(dst.join("S/Startup-Sequence")).expect("exported file");
    assert_eq!(exported, b"LoadWB\nEndCLI >NIL:\n");
    let readme = std::fs::read(dst.join("ReadMe")).expect("exported file");
    assert_eq!(readme, b"hello amiga");

    // A second export into the now-populated directory must refuse.
    assert!(fs.export_directory(&dst).is_err());

    let _ = std::fs::remove_dir_all(&base);
}
