//! Typed views over linear memory and the cache that hands them out.
//!
//! A [`TypedView`] pins one [`ArrayBuffer`]. The [`ViewCache`] keeps one
//! view per element type and rebuilds it whenever the memory's current
//! buffer is no longer the one the cached view pins. Views are meant to be
//! taken, used and dropped inside one host call: any call into the module
//! may grow memory and detach the buffer a view holds.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::trace;

use super::{ArrayBuffer, Memory};
use crate::error::BridgeError;

/// A little-endian element type that can overlay linear memory.
pub trait Element: Copy + Sized + 'static {
    const SIZE: usize;
    const NAME: &'static str;

    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut [u8]);

    #[doc(hidden)]
    fn slot(cache: &ViewCache) -> &RefCell<Option<TypedView<Self>>>;
}

macro_rules! impl_element {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();
                const NAME: &'static str = stringify!($ty);

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }

                fn write_le(self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn slot(cache: &ViewCache) -> &RefCell<Option<TypedView<Self>>> {
                    &cache.$field
                }
            }
        )*
    };
}

impl_element!(
    u8 => u8_view,
    u16 => u16_view,
    i32 => i32_view,
    u32 => u32_view,
    f32 => f32_view,
    f64 => f64_view,
);

/// A typed overlay on one memory buffer. Indices are element indices,
/// so the byte address of element `i` is `i * T::SIZE`.
pub struct TypedView<T: Element> {
    buffer: Rc<ArrayBuffer>,
    _marker: PhantomData<T>,
}

impl<T: Element> Clone for TypedView<T> {
    fn clone(&self) -> Self {
        TypedView {
            buffer: Rc::clone(&self.buffer),
            _marker: PhantomData,
        }
    }
}

impl<T: Element> std::fmt::Debug for TypedView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedView")
            .field("element", &T::NAME)
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Element> TypedView<T> {
    pub fn new(buffer: Rc<ArrayBuffer>) -> Self {
        TypedView {
            buffer,
            _marker: PhantomData,
        }
    }

    /// Number of whole elements in the view.
    pub fn len(&self) -> usize {
        self.buffer.byte_len() / T::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this view is backed by `buffer`.
    pub fn is_backed_by(&self, buffer: &Rc<ArrayBuffer>) -> bool {
        Rc::ptr_eq(&self.buffer, buffer)
    }

    pub fn buffer(&self) -> &Rc<ArrayBuffer> {
        &self.buffer
    }

    fn byte_range(&self, index: usize, count: usize) -> Result<std::ops::Range<usize>, BridgeError> {
        let size = self.buffer.byte_len();
        let out_of_bounds = || BridgeError::OutOfBounds {
            ptr: index.saturating_mul(T::SIZE) as u32,
            len: count.saturating_mul(T::SIZE) as u32,
            size,
        };
        let start = index.checked_mul(T::SIZE).ok_or_else(out_of_bounds)?;
        let len = count.checked_mul(T::SIZE).ok_or_else(out_of_bounds)?;
        let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
        if end > size {
            return Err(out_of_bounds());
        }
        Ok(start..end)
    }

    pub fn get(&self, index: usize) -> Result<T, BridgeError> {
        let range = self.byte_range(index, 1)?;
        Ok(T::read_le(&self.buffer.bytes()[range]))
    }

    pub fn set(&self, index: usize, value: T) -> Result<(), BridgeError> {
        let range = self.byte_range(index, 1)?;
        value.write_le(&mut self.buffer.bytes_mut()[range]);
        Ok(())
    }

    /// Copy `count` elements starting at element `index` out of memory.
    pub fn subarray(&self, index: usize, count: usize) -> Result<Vec<T>, BridgeError> {
        let range = self.byte_range(index, count)?;
        let bytes = self.buffer.bytes();
        Ok(bytes[range].chunks_exact(T::SIZE).map(T::read_le).collect())
    }

    /// Copy `values` into memory starting at element `index`.
    pub fn write(&self, index: usize, values: &[T]) -> Result<(), BridgeError> {
        let range = self.byte_range(index, values.len())?;
        let mut bytes = self.buffer.bytes_mut();
        for (chunk, value) in bytes[range].chunks_exact_mut(T::SIZE).zip(values) {
            value.write_le(chunk);
        }
        Ok(())
    }
}

impl TypedView<u8> {
    /// Run `f` over the byte range `[ptr, ptr + len)` without copying.
    pub fn with_bytes<R>(&self, ptr: u32, len: u32, f: impl FnOnce(&[u8]) -> R) -> Result<R, BridgeError> {
        let range = self.byte_range(ptr as usize, len as usize)?;
        Ok(f(&self.buffer.bytes()[range]))
    }
}

/// Lazily built typed views, one per element type.
#[derive(Default)]
pub struct ViewCache {
    u8_view: RefCell<Option<TypedView<u8>>>,
    u16_view: RefCell<Option<TypedView<u16>>>,
    i32_view: RefCell<Option<TypedView<i32>>>,
    u32_view: RefCell<Option<TypedView<u32>>>,
    f32_view: RefCell<Option<TypedView<f32>>>,
    f64_view: RefCell<Option<TypedView<f64>>>,
    rebuilds: Cell<u64>,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached `T` view of `memory`, rebuilding it first if it is
    /// missing or pins a buffer the memory has since replaced.
    pub fn view<T: Element>(&self, memory: &Memory) -> TypedView<T> {
        let current = memory.buffer();
        let mut slot = T::slot(self).borrow_mut();
        if let Some(view) = slot.as_ref() {
            if view.is_backed_by(&current) {
                return view.clone();
            }
        }
        trace!(element = T::NAME, bytes = current.byte_len(), "rebuilding memory view");
        self.rebuilds.set(self.rebuilds.get() + 1);
        let view = TypedView::new(current);
        *slot = Some(view.clone());
        view
    }

    /// How many times any view has been (re)built.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.get()
    }

    /// Forget every cached view.
    pub fn clear(&self) {
        *self.u8_view.borrow_mut() = None;
        *self.u16_view.borrow_mut() = None;
        *self.i32_view.borrow_mut() = None;
        *self.u32_view.borrow_mut() = None;
        *self.f32_view.borrow_mut() = None;
        *self.f64_view.borrow_mut() = None;
    }
}
