//! The module's linear memory as the host sees it.
//!
//! A [`Memory`] owns one current [`ArrayBuffer`]. Growing the memory
//! allocates a fresh buffer, copies the old contents over and detaches the
//! old buffer, so anything still holding the old buffer observes a
//! zero-length block instead of stale bytes. Buffer identity is `Rc`
//! pointer identity.

pub mod view;

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use tracing::trace;

pub use view::{Element, TypedView, ViewCache};

/// WASM page size in bytes (64 KiB).
pub const PAGE_SIZE: usize = 64 * 1024;

/// A raw block of bytes backing a memory at one point in time.
#[derive(Debug, Default)]
pub struct ArrayBuffer {
    bytes: RefCell<Vec<u8>>,
}

impl ArrayBuffer {
    fn with_len(len: usize) -> Self {
        ArrayBuffer {
            bytes: RefCell::new(vec![0; len]),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.borrow().len()
    }

    /// Whether the owning memory has moved on to a newer buffer.
    pub fn is_detached(&self) -> bool {
        self.bytes.borrow().is_empty()
    }

    pub fn bytes(&self) -> Ref<'_, Vec<u8>> {
        self.bytes.borrow()
    }

    pub fn bytes_mut(&self) -> RefMut<'_, Vec<u8>> {
        self.bytes.borrow_mut()
    }

    fn detach(&self) -> Vec<u8> {
        std::mem::take(&mut *self.bytes.borrow_mut())
    }
}

/// Growable linear memory (32-bit index space).
#[derive(Debug)]
pub struct Memory {
    buffer: RefCell<Rc<ArrayBuffer>>,
    max_pages: Option<u32>,
}

impl Memory {
    /// Create a memory of `min_pages` pages, optionally capped at `max_pages`.
    pub fn new(min_pages: u32, max_pages: Option<u32>) -> Self {
        Memory {
            buffer: RefCell::new(Rc::new(ArrayBuffer::with_len(
                min_pages as usize * PAGE_SIZE,
            ))),
            max_pages,
        }
    }

    /// The current backing buffer.
    pub fn buffer(&self) -> Rc<ArrayBuffer> {
        Rc::clone(&self.buffer.borrow())
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.borrow().byte_len()
    }

    pub fn size_pages(&self) -> u32 {
        (self.byte_len() / PAGE_SIZE) as u32
    }

    /// Grow by `delta_pages`. Returns the previous size in pages, or `None`
    /// when the maximum would be exceeded.
    ///
    /// Every successful grow replaces the backing buffer, including a grow
    /// by zero pages.
    pub fn grow(&self, delta_pages: u32) -> Option<u32> {
        let prev = self.size_pages();
        let new = prev.checked_add(delta_pages)?;
        if let Some(max) = self.max_pages {
            if new > max {
                return None;
            }
        }
        if new as usize > u32::MAX as usize / PAGE_SIZE + 1 {
            return None;
        }
        let mut slot = self.buffer.borrow_mut();
        let mut bytes = slot.detach();
        bytes.resize(new as usize * PAGE_SIZE, 0);
        *slot = Rc::new(ArrayBuffer {
            bytes: RefCell::new(bytes),
        });
        trace!(prev, new, "memory grown, buffer replaced");
        Some(prev)
    }
}
