//! Patch installation for ZiPatch archives
//!
//! Three workflows over one install directory:
//!
//! - **Apply**: replay a patch file's chunks sequentially ([`PatchApplier`]).
//! - **Verify**: check the install piecewise against a sealed partial index
//!   ([`Verifier`]), in parallel.
//! - **Repair**: rebuild exactly the flagged parts from the original patch
//!   files ([`Repairer`]).
//!
//! Verification and repair work from a [`zipatch_formats::PartialIndex`], so
//! a damaged install never needs a full patch replay.

pub mod apply;
mod error;
pub mod repair;
pub mod repository;
pub mod store;
pub mod verify;

pub use apply::{ApplySummary, PatchApplier};
pub use error::{Error, Result};
pub use repair::{RepairSummary, Repairer};
pub use repository::{Repository, BASE_VERSION};
pub use store::FileStore;
pub use verify::{verify_install, Verifier, VerifyReport};
