//! Partial-file model
//!
//! Patch files describe edits; the partial model inverts them into a
//! description of the *result*: every target file as an ordered list of parts,
//! each with a recipe for its bytes and, once sealed, a CRC32 to check them
//! against. This is what makes piecewise verification and minimal repair
//! possible without replaying whole patch chains.

mod index;
mod part;
mod plan;

pub use index::{
    normalize_path, PartialIndex, SourceFile, TargetFile, EXPANSION_BASE_GAME, EXPANSION_BOOT,
    INDEX_MAGIC, INDEX_VERSION,
};
pub use part::{
    empty_block_header, FilePart, PartSource, VerifyOutcome, EMPTY_BLOCK_HEADER_SIZE,
    MAX_DEFLATED_SOURCE,
};
pub use plan::PartPlan;
