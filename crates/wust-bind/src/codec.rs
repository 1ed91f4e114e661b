//! String marshalling between host strings and module memory.
//!
//! Strings cross the boundary as UTF-8 spans, never NUL-terminated.
//! Decoding is strict. Encoding allocates in the module through its
//! allocator exports and copies the bytes in through a fresh view, since
//! any allocation may grow memory and detach earlier views.

use tracing::trace;

use crate::error::BridgeError;
use crate::guest::Guest;
use crate::memory::{Memory, ViewCache};

/// A `(ptr, len)` byte range in module memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub ptr: u32,
    pub len: u32,
}

impl Span {
    pub fn new(ptr: u32, len: u32) -> Self {
        Span { ptr, len }
    }
}

/// A string written into module memory.
///
/// `span.len` is the number of bytes written. `capacity` is the size of the
/// allocation backing it, which may be larger after the non-ASCII fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    pub span: Span,
    pub capacity: u32,
}

/// Decode `[ptr, ptr + len)` as strict UTF-8.
pub fn decode(views: &ViewCache, memory: &Memory, ptr: u32, len: u32) -> Result<String, BridgeError> {
    views
        .view::<u8>(memory)
        .with_bytes(ptr, len, |bytes| {
            std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| e.valid_up_to())
        })?
        .map_err(|valid_up_to| BridgeError::InvalidEncoding { ptr, len, valid_up_to })
}

/// Copy raw bytes out of `[ptr, ptr + len)`.
pub fn read_bytes(views: &ViewCache, memory: &Memory, ptr: u32, len: u32) -> Result<Vec<u8>, BridgeError> {
    views.view::<u8>(memory).with_bytes(ptr, len, <[u8]>::to_vec)
}

/// Write `value` into freshly allocated module memory.
///
/// The first allocation assumes one byte per UTF-16 unit of the string and
/// ASCII bytes are copied straight in. On the first non-ASCII character the
/// allocation is grown to three bytes per remaining UTF-16 unit (the UTF-8
/// worst case) and the rest is copied through the general path. Callers
/// must use the returned length, not the capacity.
pub fn encode(guest: &dyn Guest, views: &ViewCache, value: &str) -> Result<Encoded, BridgeError> {
    let bytes = value.as_bytes();
    let mut capacity = utf16_len(value)?;
    let mut ptr = guest.alloc(capacity)?;

    let ascii = bytes.iter().position(|b| !b.is_ascii()).unwrap_or(bytes.len());
    views
        .view::<u8>(guest.memory())
        .write(ptr as usize, &bytes[..ascii])?;
    let mut offset = ascii as u32;

    if ascii != bytes.len() {
        let rest = &value[ascii..];
        let worst_case = offset
            .checked_add(utf16_len(rest)?.checked_mul(3).ok_or_else(|| too_long(value))?)
            .ok_or_else(|| too_long(value))?;
        ptr = guest.realloc(ptr, capacity, worst_case)?;
        capacity = worst_case;
        views
            .view::<u8>(guest.memory())
            .write(ptr as usize + offset as usize, rest.as_bytes())?;
        offset += rest.len() as u32;
        trace!(ascii_prefix = ascii, written = offset, capacity, "encoded non-ASCII string");
    }

    Ok(Encoded {
        span: Span::new(ptr, offset),
        capacity,
    })
}

/// Write `value` with a single exact-size allocation and no fast path.
pub fn encode_exact(guest: &dyn Guest, views: &ViewCache, value: &str) -> Result<Encoded, BridgeError> {
    let len = u32::try_from(value.len()).map_err(|_| too_long(value))?;
    let ptr = guest.alloc(len)?;
    views.view::<u8>(guest.memory()).write(ptr as usize, value.as_bytes())?;
    Ok(Encoded {
        span: Span::new(ptr, len),
        capacity: len,
    })
}

fn utf16_len(s: &str) -> Result<u32, BridgeError> {
    u32::try_from(s.encode_utf16().count()).map_err(|_| too_long(s))
}

fn too_long(s: &str) -> BridgeError {
    BridgeError::OutOfBounds {
        ptr: 0,
        len: u32::MAX,
        size: s.len(),
    }
}
