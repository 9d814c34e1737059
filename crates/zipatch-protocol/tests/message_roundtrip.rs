//! Every message must survive encode → decode unchanged.

use pretty_assertions::assert_eq;
use zipatch_protocol::{RepairMessage, RequestedPart};

fn roundtrip(message: RepairMessage) {
    let frame = message.encode();
    assert_eq!(RepairMessage::decode(&frame).unwrap(), message);
}

#[test]
fn test_provide_index_file() {
    roundtrip(RepairMessage::ProvideIndexFile {
        root_path: "game".into(),
        version_name: "2023.09.15.0000.0000".into(),
        compressed_index: vec![0xDE, 0xAD, 0xBE, 0xEF],
    });
    roundtrip(RepairMessage::ProvideIndexFile {
        root_path: String::new(),
        version_name: String::new(),
        compressed_index: Vec::new(),
    });
}

#[test]
fn test_provide_index_file_finish() {
    roundtrip(RepairMessage::ProvideIndexFileFinish);
}

#[test]
fn test_request_partial_file() {
    roundtrip(RepairMessage::RequestPartialFile {
        patch_set_id: 3,
        source_file_id: 7,
        source_file_name: "D2023.09.15.0000.0000.patch".into(),
        parts: vec![
            RequestedPart {
                target_file_id: 0,
                part_id: 12,
                source_offset: 0x1234_5678_9ABC,
                source_size: 16384,
            },
            RequestedPart {
                target_file_id: 9,
                part_id: 0,
                source_offset: 0,
                source_size: 1,
            },
        ],
    });
    roundtrip(RepairMessage::RequestPartialFile {
        patch_set_id: 0,
        source_file_id: 0,
        source_file_name: String::new(),
        parts: Vec::new(),
    });
}

#[test]
fn test_provide_partial_file() {
    roundtrip(RepairMessage::ProvidePartialFile {
        patch_set_id: 1,
        source_file_id: 2,
        local_path: "/tmp/partial/D2023.09.15.0000.0000.patch".into(),
    });
}

#[test]
fn test_finish_partial_file() {
    roundtrip(RepairMessage::FinishPartialFile {
        patch_set_id: 1,
        source_file_id: 2,
        source_file_name: "D2023.09.15.0000.0000.patch".into(),
    });
}

#[test]
fn test_status_update() {
    roundtrip(RepairMessage::StatusUpdate {
        fraction_done: 0.25,
        bytes_done: 1 << 20,
        bytes_total: 1 << 22,
    });
}

#[test]
fn test_finished() {
    roundtrip(RepairMessage::Finished);
}

#[test]
fn test_opcodes_are_stable() {
    let messages = [
        RepairMessage::ProvideIndexFile {
            root_path: String::new(),
            version_name: String::new(),
            compressed_index: Vec::new(),
        },
        RepairMessage::ProvideIndexFileFinish,
        RepairMessage::RequestPartialFile {
            patch_set_id: 0,
            source_file_id: 0,
            source_file_name: String::new(),
            parts: Vec::new(),
        },
        RepairMessage::ProvidePartialFile {
            patch_set_id: 0,
            source_file_id: 0,
            local_path: String::new(),
        },
        RepairMessage::FinishPartialFile {
            patch_set_id: 0,
            source_file_id: 0,
            source_file_name: String::new(),
        },
        RepairMessage::StatusUpdate {
            fraction_done: 0.0,
            bytes_done: 0,
            bytes_total: 0,
        },
        RepairMessage::Finished,
    ];
    for (expected, message) in messages.iter().enumerate() {
        assert_eq!(message.opcode(), expected as u8);
        assert_eq!(message.encode()[0], expected as u8);
    }
}
