//! Index ingestion over a synthetic patch chain, through CRC sealing.

use std::io::Cursor;

use pretty_assertions::assert_eq;
use zipatch_formats::block::CompressedBlock;
use zipatch_formats::chunk::sqpk::{
    FileOperation, HeaderKind, SqpkAddData, SqpkDataSpan, SqpkFile, SqpkHeader, SqpkTargetInfo,
};
use zipatch_formats::chunk::{ChunkKind, FileHeader};
use zipatch_formats::partial::{PartSource, PartialIndex, VerifyOutcome, EXPANSION_BASE_GAME};
use zipatch_formats::sqpack::{SqpackKind, SqpackRef};
use zipatch_formats::{PatchFile, Platform, SqpkCommand, ZIPATCH_MAGIC};

fn dat_ref() -> SqpackRef {
    SqpackRef {
        main_id: 0x0a,
        sub_id: 0x0000,
        file_id: 0,
        kind: SqpackKind::Dat,
    }
}

fn build_patch() -> Vec<u8> {
    let kinds = vec![
        ChunkKind::FileHeader(FileHeader {
            version: 2,
            patch_type: "DIFF".into(),
            entry_files: 2,
            v3: None,
        }),
        ChunkKind::Sqpk(SqpkCommand::TargetInfo(SqpkTargetInfo {
            platform: Platform::Win32,
            region: -1,
            is_debug: false,
            version: 2,
            deleted_data_size: 0,
            seek_count: 0,
        })),
        ChunkKind::Sqpk(SqpkCommand::Header(SqpkHeader {
            header_kind: HeaderKind::Version,
            target: dat_ref(),
            data: (0..1024).map(|i| i as u8).collect(),
            data_offset: 0,
        })),
        ChunkKind::Sqpk(SqpkCommand::AddData(SqpkAddData {
            target: dat_ref(),
            block_offset: 2048,
            data: vec![0xA5; 256],
            delete_size: 128,
            data_offset: 0,
        })),
        ChunkKind::Sqpk(SqpkCommand::DeleteData(SqpkDataSpan {
            target: dat_ref(),
            block_offset: 4096,
            block_count: 4,
        })),
        ChunkKind::Sqpk(SqpkCommand::File(SqpkFile {
            operation: FileOperation::AddFile,
            file_offset: 0,
            file_size: 700,
            expansion_id: 0,
            path: "movie/ffxiv/00004.bk2".into(),
            blocks: vec![
                CompressedBlock::stored(&[0x11; 200]),
                CompressedBlock::deflated(&[0x22; 500]).unwrap(),
            ],
        })),
        ChunkKind::EndOfFile,
    ];

    let mut bytes = ZIPATCH_MAGIC.to_vec();
    for kind in &kinds {
        bytes.extend_from_slice(&kind.to_bytes());
    }
    bytes
}

#[test]
fn test_ingest_builds_expected_plans() {
    let bytes = build_patch();
    let mut index = PartialIndex::new(EXPANSION_BASE_GAME);
    let mut patch = PatchFile::open(bytes.as_slice()).unwrap();
    index
        .ingest_patch("D2023.09.15.0000.0000.patch", &mut patch)
        .unwrap();

    assert_eq!(index.sources().len(), 1);
    assert_eq!(index.targets().len(), 2);

    let dat = &index.targets()[index
        .target_index_of("sqpack/ffxiv/0a0000.win32.dat0")
        .unwrap()];
    assert!(dat.plan.is_contiguous());
    // header (1024) + zero gap + add data (256) + zero wipe (128) + gap +
    // empty block (128) + trailing zeros (384)
    assert_eq!(dat.file_size(), 4096 + 4 * 128);

    let parts = dat.plan.parts();
    assert_eq!(parts[0].target_offset, 0);
    assert_eq!(parts[0].target_size, 1024);
    assert!(parts[0].is_from_patch());

    let add = parts
        .iter()
        .find(|p| p.target_offset == 2048)
        .expect("add data part");
    assert_eq!(add.target_size, 256);
    // The recorded source span must contain exactly the payload bytes.
    let span = &bytes[add.source_offset() as usize..][..add.target_size as usize];
    assert!(span.iter().all(|&b| b == 0xA5));

    let wipe = parts
        .iter()
        .find(|p| p.target_offset == 2048 + 256)
        .expect("wipe part");
    assert_eq!(wipe.source, PartSource::Zeros);
    assert_eq!(wipe.target_size, 128);

    let empty = parts
        .iter()
        .find(|p| p.target_offset == 4096)
        .expect("empty block part");
    assert_eq!(empty.source, PartSource::EmptyBlock { follow_units: 3 });
    assert_eq!(empty.target_size, 128);

    let movie = &index.targets()[index.target_index_of("movie/ffxiv/00004.bk2").unwrap()];
    assert_eq!(movie.file_size(), 700);
    assert_eq!(movie.plan.len(), 2);
    assert!(matches!(
        movie.plan.parts()[1].source,
        PartSource::Patch { deflated: true, .. }
    ));
}

#[test]
fn test_seal_and_verify_reconstructed_parts() {
    let bytes = build_patch();
    let mut index = PartialIndex::new(EXPANSION_BASE_GAME);
    let mut patch = PatchFile::open(bytes.as_slice()).unwrap();
    index
        .ingest_patch("D2023.09.15.0000.0000.patch", &mut patch)
        .unwrap();

    let mut sources = [Cursor::new(bytes.clone())];
    index.seal_crc32(&mut sources).unwrap();

    for target in index.targets() {
        for part in target.plan.parts() {
            if part.patch_index().is_none() {
                continue;
            }
            let crc = part.crc32.expect("sealed crc");

            // Rebuild from the patch bytes and check it against its own seal.
            let avail = bytes.len() - part.source_offset() as usize;
            let take = (part.max_source_size() as usize).min(avail);
            let src = &bytes[part.source_offset() as usize..][..take];
            let mut out = vec![0u8; part.target_size as usize];
            part.reconstruct(src, &mut out, false).unwrap();
            assert_eq!(crc32fast::hash(&out), crc);
            assert_eq!(part.verify(&out), VerifyOutcome::Pass);
        }
    }
}

#[test]
fn test_rewriting_a_file_resets_its_plan() {
    let bytes = build_patch();
    let mut index = PartialIndex::new(EXPANSION_BASE_GAME);
    let mut patch = PatchFile::open(bytes.as_slice()).unwrap();
    index.ingest_patch("first.patch", &mut patch).unwrap();

    // A second patch rewriting the movie file from offset zero replaces the
    // whole plan instead of layering onto it.
    let mut second = ZIPATCH_MAGIC.to_vec();
    second.extend_from_slice(
        &ChunkKind::Sqpk(SqpkCommand::File(SqpkFile {
            operation: FileOperation::AddFile,
            file_offset: 0,
            file_size: 64,
            expansion_id: 0,
            path: "movie/ffxiv/00004.bk2".into(),
            blocks: vec![CompressedBlock::stored(&[0x77; 64])],
        }))
        .to_bytes(),
    );
    second.extend_from_slice(&ChunkKind::EndOfFile.to_bytes());

    let mut patch2 = PatchFile::open(second.as_slice()).unwrap();
    index.ingest_patch("second.patch", &mut patch2).unwrap();

    let movie = &index.targets()[index.target_index_of("movie/ffxiv/00004.bk2").unwrap()];
    assert_eq!(movie.file_size(), 64);
    assert_eq!(movie.plan.len(), 1);
    assert_eq!(movie.plan.parts()[0].patch_index(), Some(1));
}
