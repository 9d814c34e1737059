//! Remote repair protocol for ZiPatch installs
//!
//! When the machine that verifies an install is not the one holding the patch
//! files (a sandboxed or elevated helper process, typically), the two sides
//! talk in [`RepairMessage`]s over any ordered, reliable [`MessageChannel`].
//! The verifier side runs a [`RepairServer`]; the patch holder runs a
//! [`RepairClient`] and satisfies span requests through a
//! [`PartialFileProvider`].
//!
//! ```no_run
//! use zipatch_protocol::{memory_pair, RepairClient, RepairServer};
//! # use zipatch_protocol::{PartialFileProvider, RequestedPart, Result};
//! # struct Patches;
//! # impl PartialFileProvider for Patches {
//! #     fn provide(&mut self, _: u32, _: &str, _: &[RequestedPart]) -> Result<std::path::PathBuf> { unimplemented!() }
//! # }
//! # fn load_index() -> zipatch_formats::PartialIndex { unimplemented!() }
//! # fn main() -> Result<()> {
//! let (mut server_side, client_side) = memory_pair();
//! let mut client = RepairClient::new(client_side, Patches);
//! client.offer_index("game", &load_index())?;
//!
//! std::thread::spawn(move || client.run());
//! let summary = RepairServer::new("/opt/ffxiv", 0).run(&mut server_side)?;
//! # let _ = summary; Ok(())
//! # }
//! ```

pub mod channel;
mod error;
pub mod message;
pub mod session;

pub use channel::{memory_pair, MemoryChannel, MessageChannel, StreamChannel, MAX_FRAME_SIZE};
pub use error::{Error, Result};
pub use message::{RepairMessage, RequestedPart};
pub use session::{PartialFileProvider, RepairClient, RepairServer};
