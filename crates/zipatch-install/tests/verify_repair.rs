//! Corrupt-then-repair round trips: whatever verification flags, repair must
//! restore to the exact bytes a clean application produces.

mod common;

use std::fs;
use std::io::Cursor;

use common::*;
use pretty_assertions::assert_eq;
use zipatch_formats::block::CompressedBlock;
use zipatch_formats::partial::{PartialIndex, EXPANSION_BASE_GAME};
use zipatch_formats::PatchFile;
use zipatch_install::{PatchApplier, Repairer, Verifier};

const DAT: &str = "sqpack/ffxiv/0a0000.win32.dat0";
const MOVIE: &str = "movie/ffxiv/00004.bk2";

fn build_patch() -> Vec<u8> {
    encode_patch(&[
        file_header(),
        version_header((0..1024u32).map(|i| i as u8).collect()),
        add_data(2048, vec![0xA5; 256], 128),
        delete_data(4096, 4),
        add_file(
            MOVIE,
            0,
            vec![
                CompressedBlock::stored(b"ABCD"),
                CompressedBlock::deflated(&[0x42; 300]).unwrap(),
            ],
        ),
    ])
}

struct Fixture {
    dir: tempfile::TempDir,
    bytes: Vec<u8>,
    index: PartialIndex,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let bytes = build_patch();

    let mut applier = PatchApplier::new(dir.path());
    applier
        .apply(&mut PatchFile::open(bytes.as_slice()).unwrap())
        .unwrap();

    let mut index = PartialIndex::new(EXPANSION_BASE_GAME);
    index
        .ingest_patch(
            "D2023.09.15.0000.0000.patch",
            &mut PatchFile::open(bytes.as_slice()).unwrap(),
        )
        .unwrap();
    index.seal_crc32(&mut [Cursor::new(bytes.clone())]).unwrap();

    Fixture { dir, bytes, index }
}

#[test]
fn test_clean_install_verifies_clean() {
    let fx = fixture();
    let report = Verifier::new(&fx.index, fx.dir.path()).verify(2).unwrap();
    assert!(report.is_clean());
}

#[test]
fn test_corruption_is_localized_and_repaired() {
    let fx = fixture();
    let dat_path = fx.dir.path().join(DAT);
    let pristine = fs::read(&dat_path).unwrap();

    let mut corrupt = pristine.clone();
    corrupt[2100] ^= 0xFF;
    fs::write(&dat_path, &corrupt).unwrap();

    let verifier = Verifier::new(&fx.index, fx.dir.path());
    let report = verifier.verify(2).unwrap();
    assert!(!report.is_clean());

    // Exactly one part is flagged: the one covering the corrupt byte.
    let dat_index = fx.index.target_index_of(DAT).unwrap();
    let flagged = &report.missing_parts[dat_index];
    assert_eq!(flagged.len(), 1);
    assert_eq!(report.total_missing_parts(), 1);
    let part = &fx.index.targets()[dat_index].plan.parts()[*flagged.first().unwrap()];
    assert!(part.target_offset <= 2100 && 2100 < part.target_end());

    // Attribution: the flagged part's bytes come from the only source file.
    let per_source = report.missing_per_source(&fx.index);
    assert_eq!(per_source[0].len(), 1);

    let repairer = Repairer::new(&fx.index, fx.dir.path());
    let summary = repairer
        .repair(&mut [Cursor::new(fx.bytes.clone())], &report)
        .unwrap();
    assert_eq!(summary.parts_rebuilt, 1);

    assert_eq!(fs::read(&dat_path).unwrap(), pristine);
    assert!(Verifier::new(&fx.index, fx.dir.path())
        .verify(2)
        .unwrap()
        .is_clean());
}

#[test]
fn test_missing_file_is_recreated() {
    let fx = fixture();
    let movie_path = fx.dir.path().join(MOVIE);
    let pristine = fs::read(&movie_path).unwrap();
    fs::remove_file(&movie_path).unwrap();

    let report = Verifier::new(&fx.index, fx.dir.path()).verify(2).unwrap();
    let movie_index = fx.index.target_index_of(MOVIE).unwrap();
    assert_eq!(
        report.missing_parts[movie_index].len(),
        fx.index.targets()[movie_index].plan.len()
    );

    Repairer::new(&fx.index, fx.dir.path())
        .repair(&mut [Cursor::new(fx.bytes.clone())], &report)
        .unwrap();

    assert_eq!(fs::read(&movie_path).unwrap(), pristine);
}

#[test]
fn test_truncated_file_is_extended_back() {
    let fx = fixture();
    let dat_path = fx.dir.path().join(DAT);
    let pristine = fs::read(&dat_path).unwrap();

    // Cut the file inside the trailing zero span.
    let file = fs::OpenOptions::new().write(true).open(&dat_path).unwrap();
    file.set_len(pristine.len() as u64 - 100).unwrap();
    drop(file);

    let report = Verifier::new(&fx.index, fx.dir.path()).verify(2).unwrap();
    let dat_index = fx.index.target_index_of(DAT).unwrap();
    assert!(report.size_mismatches.contains(&dat_index));
    assert!(!report.missing_parts[dat_index].is_empty());

    let summary = Repairer::new(&fx.index, fx.dir.path())
        .repair(&mut [Cursor::new(fx.bytes.clone())], &report)
        .unwrap();
    assert_eq!(summary.files_resized, 0); // part rewrite already extended it

    assert_eq!(fs::read(&dat_path).unwrap(), pristine);
}

#[test]
fn test_cancellation_aborts_verification() {
    let fx = fixture();
    let verifier = Verifier::new(&fx.index, fx.dir.path());
    verifier
        .cancel_flag()
        .store(true, std::sync::atomic::Ordering::Relaxed);
    assert!(matches!(
        verifier.verify(2),
        Err(zipatch_install::Error::Cancelled)
    ));
}

#[test]
fn test_version_files_written_after_repair() {
    let fx = fixture();
    let report = Verifier::new(&fx.index, fx.dir.path()).verify(2).unwrap();
    let repairer = Repairer::new(&fx.index, fx.dir.path());
    repairer
        .repair(&mut [Cursor::new(fx.bytes.clone())], &report)
        .unwrap();
    repairer.write_version_files().unwrap();

    assert_eq!(
        fs::read_to_string(fx.dir.path().join("ffxivgame.ver")).unwrap(),
        "2023.09.15.0000.0000"
    );
    assert_eq!(
        fs::read_to_string(fx.dir.path().join("ffxivgame.bck")).unwrap(),
        "2023.09.15.0000.0000"
    );
}
