//! Error types for ZiPatch parsing and encoding

use thiserror::Error;

/// Result type for ZiPatch format operations
pub type Result<T> = std::result::Result<T, Error>;

/// ZiPatch format error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid ZiPatch magic bytes
    #[error("Invalid ZiPatch magic: {0:02x?}")]
    InvalidMagic([u8; 12]),

    /// Chunk declared more payload than the stream holds
    #[error("Truncated chunk at offset {offset:#x}: declared {declared} bytes, stream has {available}")]
    TruncatedChunk {
        offset: u64,
        declared: u32,
        available: u64,
    },

    /// Read past the end of a chunk payload
    #[error("Unexpected end of chunk payload: wanted {wanted} bytes, {available} remain")]
    UnexpectedEof { wanted: usize, available: usize },

    /// Chunk type tag with no registered decoder
    #[error("Unknown chunk tag {tag:?} at offset {offset:#x}")]
    UnknownChunkTag { tag: [u8; 4], offset: u64 },

    /// SQPK command byte with no registered decoder
    #[error("Unknown SQPK command {command:#04x} at offset {offset:#x}")]
    UnknownSqpkCommand { command: u8, offset: u64 },

    /// Inner SQPK size disagrees with the outer chunk size
    #[error("SQPK inner size {inner} does not match chunk size {outer} at offset {offset:#x}")]
    SqpkSizeMismatch { inner: i32, outer: u32, offset: u64 },

    /// Stored CRC32 trailer does not match the computed value
    #[error("Checksum mismatch for {tag:?} chunk at offset {offset:#x}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        tag: [u8; 4],
        offset: u64,
        stored: u32,
        computed: u32,
    },

    /// Compressed file block produced the wrong number of bytes
    #[error("Block decompressed to {actual} bytes, expected {expected}")]
    BlockSizeMismatch { expected: usize, actual: usize },

    /// Non-ASCII or otherwise unusable string field
    #[error("Invalid string field: {0}")]
    InvalidString(String),

    /// Partial index stream failed structural validation
    #[error("Malformed partial index: {0}")]
    MalformedIndex(String),

    /// Span too large to track as a single file part
    #[error("Span of {size} bytes at target offset {offset:#x} exceeds the part size limit")]
    OversizedPart { size: u64, offset: u64 },

    /// Patch data backing a part ended early
    #[error("Insufficient source data for part at target offset {target_offset:#x}")]
    InsufficientSourceData { target_offset: u64 },

    /// Rebuilt part bytes failed their own verification
    #[error("Source data mismatch for part at target offset {target_offset:#x}")]
    SourceDataMismatch { target_offset: u64 },
}
