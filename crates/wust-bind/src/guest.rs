//! What the bridge needs from the module on the other side.
//!
//! The module is opaque: the bridge only sees its linear memory and a
//! handful of exported entry points. Every method takes `&self` because the
//! module may be re-entered (a host call from the module can invoke a
//! closure that calls back into it), so implementations keep their own
//! state behind interior mutability.

use crate::Bridge;
use crate::error::{BridgeError, HostError};
use crate::memory::Memory;
use crate::value::Val;

/// Exported entry points of a linked module.
pub trait Guest {
    /// The module's linear memory.
    fn memory(&self) -> &Memory;

    /// Allocate `size` bytes and return the address.
    fn alloc(&self, size: u32) -> Result<u32, BridgeError>;

    /// Resize the allocation at `ptr` from `old_size` to `new_size` bytes.
    /// The contents up to the smaller size are preserved; the block may move.
    fn realloc(&self, ptr: u32, old_size: u32, new_size: u32) -> Result<u32, BridgeError>;

    /// Release `size` bytes at `ptr`.
    fn free(&self, ptr: u32, size: u32) -> Result<(), BridgeError>;

    /// Run once after linking. A host exception raised by an import and
    /// not handled by the module unwinds out as [`HostError::Thrown`].
    fn start(&self, bridge: &Bridge) -> Result<(), HostError>;

    /// Destructor table entry `dtor`: release the closure environment `(a, b)`.
    fn destroy_closure(&self, dtor: u32, a: u32, b: u32) -> Result<(), BridgeError>;

    /// Closure invoke entry point `adapter`: run the closure `(a, b)` with
    /// already-lowered arguments.
    fn invoke_closure(
        &self,
        bridge: &Bridge,
        adapter: u32,
        a: u32,
        b: u32,
        args: &[Val],
    ) -> Result<Vec<Val>, HostError>;
}
