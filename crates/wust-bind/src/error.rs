//! Error taxonomy for the bridge.
//!
//! [`BridgeError`] covers contract violations and module traps. It only
//! carries owned strings and integers so it stays `Send + Sync` and can be
//! wrapped by `anyhow` at binary and test boundaries.
//!
//! Host exceptions are values of the host, so they travel separately as
//! [`HostError::Thrown`] until the error bridge stores them in the handle
//! table or the dispatcher renders them into [`BridgeError::HostFault`].

use thiserror::Error;

use crate::host::JsValue;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("invalid handle {0}")]
    InvalidHandle(u32),

    #[error("invalid UTF-8 in span ptr={ptr:#x} len={len} (valid up to {valid_up_to})")]
    InvalidEncoding { ptr: u32, len: u32, valid_up_to: usize },

    #[error("uncaught host exception: {0}")]
    HostFault(String),

    #[error("out of bounds memory access: ptr={ptr:#x} len={len} exceeds memory size {size:#x}")]
    OutOfBounds { ptr: u32, len: u32, size: usize },

    #[error("misaligned access: ptr={ptr:#x} is not a multiple of {align}")]
    Misaligned { ptr: u32, align: u32 },

    #[error("signature mismatch calling {import}: expected {expected}, found {found}")]
    SignatureMismatch {
        import: String,
        expected: String,
        found: String,
    },

    #[error("import {module}.{name} was not found")]
    UnknownImport { module: String, name: String },

    #[error("closure invoked recursively or destroyed already")]
    ClosureReentered,

    #[error("bridge has been unlinked")]
    Unlinked,

    #[error("guest trap: {0}")]
    Guest(String),

    #[error("link error: {0}")]
    Link(String),
}

/// Failure of a host-level operation.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    /// A host exception. Catchable by the error bridge.
    #[error("thrown: {}", .0.debug_string())]
    Thrown(JsValue),
    /// A contract violation. Never captured into the error slot.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl HostError {
    /// Throw a fresh host `Error` object carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        HostError::Thrown(JsValue::error(message))
    }

    /// Throw a host `TypeError` carrying `message`.
    pub fn type_error(message: impl Into<String>) -> Self {
        HostError::Thrown(JsValue::error_with_name("TypeError", message))
    }

    /// Convert into a bridge error, rendering an uncaught exception.
    pub fn into_bridge(self) -> BridgeError {
        match self {
            HostError::Thrown(value) => BridgeError::HostFault(value.debug_string()),
            HostError::Bridge(err) => err,
        }
    }
}

impl From<HostError> for BridgeError {
    fn from(err: HostError) -> Self {
        err.into_bridge()
    }
}
