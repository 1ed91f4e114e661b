//! Host-side interop bridge for linear-memory modules.
//!
//! A module running in its own linear memory cannot hold references into
//! the host's object graph, and the host cannot read module memory except
//! through explicit byte ranges. [`Bridge`] makes the boundary look like
//! ordinary calls on both sides: host values travel as [`Handle`]s,
//! strings as UTF-8 [`Span`]s, and module closures come back as host
//! functions with an explicit release protocol.

mod bridge;
mod closure;
pub mod codec;
mod config;
pub mod error;
mod exception;
mod guest;
pub mod heap;
pub mod host;
mod interface;
mod intrinsics;
mod linker;
pub mod memory;
pub mod value;

pub use bridge::Bridge;
pub use closure::{AbiType, ClosureAbi};
pub use codec::{Encoded, Span};
pub use config::BridgeConfig;
pub use error::{BridgeError, HostError};
pub use exception::ErrorSlot;
pub use guest::Guest;
pub use heap::{Handle, HandleTable};
pub use host::{Console, JsFunction, JsObject, JsValue, Timers};
pub use interface::{ExportKind, FuncImport, GuestExport, GuestInterface};
pub use linker::{HostFunc, LinkReport, Linker, Signature};
pub use memory::{Memory, TypedView, ViewCache};
pub use value::{Val, ValType};
