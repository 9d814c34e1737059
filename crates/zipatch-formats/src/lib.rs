//! ZiPatch container format
//!
//! Decoding, re-encoding, and indexing for the chunked binary patch format
//! used to distribute game content updates: a magic-prefixed stream of
//! CRC-trailed chunks, sqpack container addressing, compressed file blocks,
//! and the partial-file index derived from a patch chain.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::BufReader;
//! use zipatch_formats::PatchFile;
//!
//! # fn main() -> zipatch_formats::Result<()> {
//! let mut patch = PatchFile::open(BufReader::new(File::open("D2023.09.15.patch")?))?;
//! while let Some(chunk) = patch.next_chunk()? {
//!     println!("{:?} at {:#x}", chunk.tag(), chunk.offset);
//! }
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod chunk;
mod error;
pub mod partial;
pub mod patch;
mod reader;
pub mod sqpack;

pub use block::CompressedBlock;
pub use chunk::{Chunk, ChunkKind, SqpkCommand};
pub use error::{Error, Result};
pub use partial::PartialIndex;
pub use patch::{PatchFile, ZIPATCH_MAGIC};
pub use reader::ChunkReader;
pub use sqpack::{Platform, SqpackKind, SqpackRef};
