//! Scripted in-process module for exercising the bridge.
//!
//! [`TestGuest`] stands in for a compiled module: a bump allocator over a
//! growable [`Memory`], recorded frees and destructor calls, and closure
//! bodies registered as Rust closures keyed by adapter index.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use wust_bind::value::{FromVals, IntoVals};
use wust_bind::{Bridge, BridgeConfig, BridgeError, Guest, HostError, Linker, Memory, Val};

/// Scratch address the tests use for multi-value returns.
pub const RET: u32 = 16;

/// First address handed out by the allocator.
const HEAP_BASE: u32 = 1024;

pub type ClosureBody = Rc<dyn Fn(&Bridge, u32, u32, &[Val]) -> Result<Vec<Val>, HostError>>;
pub type StartBody = Rc<dyn Fn(&Bridge) -> Result<(), HostError>>;

pub struct TestGuest {
    memory: Memory,
    next: Cell<u32>,
    /// Grow memory on every realloc, to move the buffer under the codec.
    grow_on_realloc: Cell<bool>,
    pub allocs: RefCell<Vec<(u32, u32)>>,
    pub reallocs: RefCell<Vec<(u32, u32, u32)>>,
    pub frees: RefCell<Vec<(u32, u32)>>,
    pub destroyed: RefCell<Vec<(u32, u32, u32)>>,
    adapters: RefCell<HashMap<u32, ClosureBody>>,
    start: RefCell<Option<StartBody>>,
}

impl TestGuest {
    pub fn new() -> Rc<Self> {
        Self::with_pages(1)
    }

    pub fn with_pages(pages: u32) -> Rc<Self> {
        Rc::new(TestGuest {
            memory: Memory::new(pages, None),
            next: Cell::new(HEAP_BASE),
            grow_on_realloc: Cell::new(false),
            allocs: RefCell::default(),
            reallocs: RefCell::default(),
            frees: RefCell::default(),
            destroyed: RefCell::default(),
            adapters: RefCell::default(),
            start: RefCell::default(),
        })
    }

    pub fn grow_on_realloc(&self, on: bool) {
        self.grow_on_realloc.set(on);
    }

    /// Register the body of closure invoke entry point `adapter`.
    pub fn on_invoke(
        &self,
        adapter: u32,
        body: impl Fn(&Bridge, u32, u32, &[Val]) -> Result<Vec<Val>, HostError> + 'static,
    ) {
        self.adapters.borrow_mut().insert(adapter, Rc::new(body));
    }

    pub fn on_start(&self, body: impl Fn(&Bridge) -> Result<(), HostError> + 'static) {
        *self.start.borrow_mut() = Some(Rc::new(body));
    }

    /// Place `s` in memory the way module code would, returning `(ptr, len)`.
    pub fn put_str(&self, s: &str) -> (u32, u32) {
        self.put_bytes(s.as_bytes())
    }

    pub fn put_bytes(&self, bytes: &[u8]) -> (u32, u32) {
        let ptr = self.alloc(bytes.len() as u32).expect("alloc");
        self.memory.buffer().bytes_mut()[ptr as usize..ptr as usize + bytes.len()]
            .copy_from_slice(bytes);
        (ptr, bytes.len() as u32)
    }

    pub fn bytes(&self, ptr: u32, len: u32) -> Vec<u8> {
        self.memory.buffer().bytes()[ptr as usize..(ptr + len) as usize].to_vec()
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        u32::from_le_bytes(self.bytes(addr, 4).try_into().unwrap())
    }

    pub fn read_f64(&self, addr: u32) -> f64 {
        f64::from_le_bytes(self.bytes(addr, 8).try_into().unwrap())
    }

    /// Read the `(ptr, len)` pair at `addr` and decode it.
    pub fn read_span_str(&self, addr: u32) -> String {
        let (ptr, len) = (self.read_u32(addr), self.read_u32(addr + 4));
        String::from_utf8(self.bytes(ptr, len)).expect("utf-8")
    }

    pub fn destroyed_count(&self) -> usize {
        self.destroyed.borrow().len()
    }

    fn grow_to(&self, end: u32) -> Result<(), BridgeError> {
        let size = self.memory.byte_len() as u64;
        if u64::from(end) > size {
            let page = wust_bind::memory::PAGE_SIZE as u64;
            let delta = (u64::from(end) - size).div_ceil(page) as u32;
            self.memory
                .grow(delta)
                .ok_or_else(|| BridgeError::Guest("out of memory".into()))?;
        }
        Ok(())
    }
}

impl Guest for TestGuest {
    fn memory(&self) -> &Memory {
        &self.memory
    }

    fn alloc(&self, size: u32) -> Result<u32, BridgeError> {
        let ptr = self.next.get().next_multiple_of(8);
        let end = ptr + size;
        self.grow_to(end)?;
        self.next.set(end);
        self.allocs.borrow_mut().push((ptr, size));
        Ok(ptr)
    }

    fn realloc(&self, ptr: u32, old_size: u32, new_size: u32) -> Result<u32, BridgeError> {
        if self.grow_on_realloc.get() {
            self.memory
                .grow(1)
                .ok_or_else(|| BridgeError::Guest("out of memory".into()))?;
        }
        let new_ptr = self.alloc(new_size)?;
        let keep = old_size.min(new_size) as usize;
        let buffer = self.memory.buffer();
        buffer
            .bytes_mut()
            .copy_within(ptr as usize..ptr as usize + keep, new_ptr as usize);
        self.reallocs.borrow_mut().push((ptr, old_size, new_size));
        Ok(new_ptr)
    }

    fn free(&self, ptr: u32, size: u32) -> Result<(), BridgeError> {
        self.frees.borrow_mut().push((ptr, size));
        Ok(())
    }

    fn start(&self, bridge: &Bridge) -> Result<(), HostError> {
        let body = self.start.borrow().clone();
        match body {
            Some(body) => body(bridge),
            None => Ok(()),
        }
    }

    fn destroy_closure(&self, dtor: u32, a: u32, b: u32) -> Result<(), BridgeError> {
        self.destroyed.borrow_mut().push((dtor, a, b));
        Ok(())
    }

    fn invoke_closure(
        &self,
        bridge: &Bridge,
        adapter: u32,
        a: u32,
        b: u32,
        args: &[Val],
    ) -> Result<Vec<Val>, HostError> {
        let body = self.adapters.borrow().get(&adapter).cloned();
        match body {
            Some(body) => body(bridge, a, b, args),
            None => Err(BridgeError::Guest(format!("no closure adapter {adapter}")).into()),
        }
    }
}

/// A linker with the intrinsics registered under the default import module.
pub fn linker() -> Linker {
    Linker::with_intrinsics(BridgeConfig::default())
}

/// A fresh guest linked against the intrinsics.
pub fn setup() -> (Rc<TestGuest>, Bridge) {
    let guest = TestGuest::new();
    let bridge = linker().instantiate(guest.clone());
    (guest, bridge)
}

/// Call an import in the `wbg` module as the module would.
pub fn wbg<P: IntoVals, R: FromVals>(bridge: &Bridge, name: &str, params: P) -> anyhow::Result<R> {
    Ok(try_wbg(bridge, name, params).map_err(HostError::into_bridge)?)
}

/// Like [`wbg`], keeping a thrown host exception intact.
pub fn try_wbg<P: IntoVals, R: FromVals>(bridge: &Bridge, name: &str, params: P) -> Result<R, HostError> {
    bridge.call_typed("wbg", name, params)
}

/// Call a host function value, rendering a thrown exception.
pub fn call(f: &wust_bind::JsFunction, args: &[wust_bind::JsValue]) -> anyhow::Result<wust_bind::JsValue> {
    Ok(f.call(args).map_err(HostError::into_bridge)?)
}
