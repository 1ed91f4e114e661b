//! Handle table mapping small integers to host values.
//!
//! The module never holds host references, only [`Handle`]s. Slots below
//! [`HEAP_START`] are reserved and immortal: `0..32` read as `undefined`
//! (handle 0 doubles as "no value" for optional returns) and `32..36` hold
//! the constants `undefined`, `null`, `true`, `false`. Released slots form an
//! intrusive free list threaded through the slots themselves, whose tail
//! sentinel is the table length.

use std::fmt;

use tracing::trace;

use crate::error::BridgeError;
use crate::host::JsValue;
use crate::value::{Val, ValType, WasmVal};

/// Number of leading placeholder slots.
pub const RESERVED_SLOTS: u32 = 32;

/// First slot that is ever handed out and recycled.
pub const HEAP_START: u32 = RESERVED_SLOTS + 4;

/// Index of one entry in the handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u32);

impl Handle {
    /// "No value" in optional returns.
    pub const NONE: Handle = Handle(0);
    pub const UNDEFINED: Handle = Handle(RESERVED_SLOTS);
    pub const NULL: Handle = Handle(RESERVED_SLOTS + 1);
    pub const TRUE: Handle = Handle(RESERVED_SLOTS + 2);
    pub const FALSE: Handle = Handle(RESERVED_SLOTS + 3);

    pub fn index(self) -> u32 {
        self.0
    }

    /// Reserved handles are never recycled; dropping one is a no-op.
    pub fn is_reserved(self) -> bool {
        self.0 < HEAP_START
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl WasmVal for Handle {
    const TYPE: ValType = ValType::I32;
    fn to_val(&self) -> Val {
        Val::I32(self.0 as i32)
    }
    fn from_val(val: &Val) -> Result<Self, BridgeError> {
        u32::from_val(val).map(Handle)
    }
}

enum Slot {
    Occupied(JsValue),
    Free { next: u32 },
}

/// Slot array with free-slot reuse. Never shrinks.
pub struct HandleTable {
    slots: Vec<Slot>,
    next_free: u32,
    live: usize,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with room for `capacity` non-reserved entries before
    /// the backing vector reallocates.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(HEAP_START as usize + capacity);
        slots.extend((0..RESERVED_SLOTS).map(|_| Slot::Occupied(JsValue::Undefined)));
        slots.push(Slot::Occupied(JsValue::Undefined));
        slots.push(Slot::Occupied(JsValue::Null));
        slots.push(Slot::Occupied(JsValue::Bool(true)));
        slots.push(Slot::Occupied(JsValue::Bool(false)));
        HandleTable {
            next_free: slots.len() as u32,
            slots,
            live: 0,
        }
    }

    /// Place `value` in the head of the free list, or a new slot when the
    /// free list is empty.
    pub fn store(&mut self, value: JsValue) -> Handle {
        if self.next_free as usize == self.slots.len() {
            self.slots.push(Slot::Free {
                next: self.slots.len() as u32 + 1,
            });
        }
        let idx = self.next_free;
        let slot = &mut self.slots[idx as usize];
        self.next_free = match slot {
            Slot::Free { next } => *next,
            // The free list only ever threads through free slots.
            Slot::Occupied(_) => unreachable!("free list points at occupied slot {idx}"),
        };
        *slot = Slot::Occupied(value);
        self.live += 1;
        trace!(handle = idx, live = self.live, "stored host value");
        Handle(idx)
    }

    /// The value behind `handle`, without affecting ownership.
    pub fn load(&self, handle: Handle) -> Result<JsValue, BridgeError> {
        match self.slots.get(handle.0 as usize) {
            Some(Slot::Occupied(value)) => Ok(value.clone()),
            _ => Err(BridgeError::InvalidHandle(handle.0)),
        }
    }

    /// Borrow the value behind `handle`.
    pub fn get(&self, handle: Handle) -> Result<&JsValue, BridgeError> {
        match self.slots.get(handle.0 as usize) {
            Some(Slot::Occupied(value)) => Ok(value),
            _ => Err(BridgeError::InvalidHandle(handle.0)),
        }
    }

    /// `load` followed by `drop`. Reserved handles are read but stay put.
    pub fn take(&mut self, handle: Handle) -> Result<JsValue, BridgeError> {
        if handle.is_reserved() {
            return self.load(handle);
        }
        self.release(handle)
    }

    /// Release the table's ownership of `handle`. Reserved handles are
    /// immortal and ignored; releasing a free slot is an error.
    pub fn drop(&mut self, handle: Handle) -> Result<(), BridgeError> {
        if handle.is_reserved() {
            return Ok(());
        }
        self.release(handle).map(|_| ())
    }

    fn release(&mut self, handle: Handle) -> Result<JsValue, BridgeError> {
        let idx = handle.0;
        let next_free = self.next_free;
        let slot = match self.slots.get_mut(idx as usize) {
            Some(slot @ Slot::Occupied(_)) => slot,
            _ => return Err(BridgeError::InvalidHandle(idx)),
        };
        let Slot::Occupied(value) = std::mem::replace(slot, Slot::Free { next: next_free }) else {
            unreachable!("slot {idx} checked occupied");
        };
        self.next_free = idx;
        self.live -= 1;
        trace!(handle = idx, live = self.live, "dropped host value");
        Ok(value)
    }

    /// Store a second handle to the value behind `handle`.
    pub fn clone_ref(&mut self, handle: Handle) -> Result<Handle, BridgeError> {
        let value = self.load(handle)?;
        Ok(self.store(value))
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        matches!(self.slots.get(handle.0 as usize), Some(Slot::Occupied(_)))
    }

    /// High-water mark: number of slots ever created, reserved ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of occupied non-reserved slots.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Release every non-reserved entry and return the values, so callers
    /// can drop them outside of any borrow of the table.
    pub fn drain(&mut self) -> Vec<JsValue> {
        let mut released = Vec::with_capacity(self.live);
        for idx in HEAP_START..self.slots.len() as u32 {
            if self.is_live(Handle(idx)) {
                if let Ok(value) = self.release(Handle(idx)) {
                    released.push(value);
                }
            }
        }
        released
    }
}
