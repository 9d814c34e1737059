//! Shared patch builders for installer tests.

use zipatch_formats::block::CompressedBlock;
use zipatch_formats::chunk::sqpk::{
    FileOperation, HeaderKind, SqpkAddData, SqpkDataSpan, SqpkFile, SqpkHeader,
};
use zipatch_formats::chunk::{ChunkKind, FileHeader};
use zipatch_formats::sqpack::{SqpackKind, SqpackRef};
use zipatch_formats::{SqpkCommand, ZIPATCH_MAGIC};

pub fn dat_ref() -> SqpackRef {
    SqpackRef {
        main_id: 0x0a,
        sub_id: 0x0000,
        file_id: 0,
        kind: SqpackKind::Dat,
    }
}

pub fn file_header() -> ChunkKind {
    ChunkKind::FileHeader(FileHeader {
        version: 2,
        patch_type: "DIFF".into(),
        entry_files: 1,
        v3: None,
    })
}

pub fn add_data(block_offset: u64, data: Vec<u8>, delete_size: u64) -> ChunkKind {
    ChunkKind::Sqpk(SqpkCommand::AddData(SqpkAddData {
        target: dat_ref(),
        block_offset,
        data,
        delete_size,
        data_offset: 0,
    }))
}

pub fn delete_data(block_offset: u64, block_count: u32) -> ChunkKind {
    ChunkKind::Sqpk(SqpkCommand::DeleteData(SqpkDataSpan {
        target: dat_ref(),
        block_offset,
        block_count,
    }))
}

pub fn version_header(data: Vec<u8>) -> ChunkKind {
    ChunkKind::Sqpk(SqpkCommand::Header(SqpkHeader {
        header_kind: HeaderKind::Version,
        target: dat_ref(),
        data,
        data_offset: 0,
    }))
}

pub fn add_file(path: &str, file_offset: u64, blocks: Vec<CompressedBlock>) -> ChunkKind {
    let file_size = blocks.iter().map(|b| b.decompressed_size as u64).sum();
    ChunkKind::Sqpk(SqpkCommand::File(SqpkFile {
        operation: FileOperation::AddFile,
        file_offset,
        file_size,
        expansion_id: 0,
        path: path.into(),
        blocks,
    }))
}

pub fn remove_all(expansion_id: u16) -> ChunkKind {
    ChunkKind::Sqpk(SqpkCommand::File(SqpkFile {
        operation: FileOperation::RemoveAll,
        file_offset: 0,
        file_size: 0,
        expansion_id,
        path: String::new(),
        blocks: Vec::new(),
    }))
}

pub fn encode_patch(kinds: &[ChunkKind]) -> Vec<u8> {
    let mut bytes = ZIPATCH_MAGIC.to_vec();
    for kind in kinds {
        bytes.extend_from_slice(&kind.to_bytes());
    }
    bytes.extend_from_slice(&ChunkKind::EndOfFile.to_bytes());
    bytes
}
