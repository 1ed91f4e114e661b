//! The per-link context object.
//!
//! A [`Bridge`] owns everything that lives for one linked module: the
//! handle table, the view cache, the error slot, the module's exports and
//! the import table. It is a cheap `Rc` handle so host functions and
//! trampolines can re-enter it; no interior borrow is ever held across a
//! call into the module or into a host function.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, instrument, warn};

use crate::closure::{ClosureAbi, ClosureState};
use crate::codec::{self, Encoded, Span};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, HostError};
use crate::exception::ErrorSlot;
use crate::guest::Guest;
use crate::heap::{Handle, HandleTable};
use crate::host::{JsFunction, JsValue};
use crate::linker::ImportMap;
use crate::memory::{Element, Memory, TypedView, ViewCache};
use crate::value::{FromVals, IntoVals, Val, ValType, type_list};

pub(crate) struct Inner {
    config: BridgeConfig,
    guest: Rc<dyn Guest>,
    heap: RefCell<HandleTable>,
    views: ViewCache,
    exception: RefCell<ErrorSlot>,
    imports: ImportMap,
    linked: Cell<bool>,
}

#[derive(Clone)]
pub struct Bridge {
    inner: Rc<Inner>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("import_module", &self.inner.config.import_module)
            .field("live_objects", &self.live_objects())
            .field("linked", &self.is_linked())
            .finish()
    }
}

impl Bridge {
    pub(crate) fn new(config: BridgeConfig, guest: Rc<dyn Guest>, imports: ImportMap) -> Bridge {
        let heap = HandleTable::with_capacity(config.initial_capacity);
        Bridge {
            inner: Rc::new(Inner {
                config,
                guest,
                heap: RefCell::new(heap),
                views: ViewCache::new(),
                exception: RefCell::new(ErrorSlot::new()),
                imports,
                linked: Cell::new(true),
            }),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<Inner>) -> Option<Bridge> {
        weak.upgrade().map(|inner| Bridge { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Rc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn guest(&self) -> &dyn Guest {
        &*self.inner.guest
    }

    pub fn memory(&self) -> &Memory {
        self.inner.guest.memory()
    }

    pub fn is_linked(&self) -> bool {
        self.inner.linked.get()
    }

    pub(crate) fn ensure_linked(&self) -> Result<(), BridgeError> {
        if self.is_linked() {
            Ok(())
        } else {
            Err(BridgeError::Unlinked)
        }
    }

    /// Run the module's start routine. An exception that escapes it is
    /// rendered into [`BridgeError::HostFault`].
    #[instrument(name = "bridge::start", level = "debug", skip(self))]
    pub fn start(&self) -> Result<(), BridgeError> {
        self.ensure_linked()?;
        debug!(export = %self.inner.config.start_export, "starting module");
        self.inner.guest.start(self).map_err(HostError::into_bridge)
    }

    /// Tear down the link. Every table entry is released, the error slot
    /// is cleared and any trampoline still held by the host fails with
    /// [`BridgeError::Unlinked`] from now on.
    pub fn unlink(&self) {
        if !self.inner.linked.replace(false) {
            return;
        }
        // Values are dropped after the table borrow ends.
        let released = self.inner.heap.borrow_mut().drain();
        self.inner.exception.borrow_mut().take();
        self.inner.views.clear();
        debug!(released = released.len(), "unlinked module");
        drop(released);
    }

    // Dispatch

    /// Call the host function `module.name` on behalf of the module.
    #[instrument(name = "bridge::call", level = "trace", skip(self, args))]
    pub fn call(&self, module: &str, name: &str, args: &[Val]) -> Result<Vec<Val>, HostError> {
        self.ensure_linked()?;
        let import = self
            .inner
            .imports
            .get(module)
            .and_then(|funcs| funcs.get(name))
            .ok_or_else(|| BridgeError::UnknownImport {
                module: module.to_string(),
                name: name.to_string(),
            })?;
        let mismatch = |expected: &[ValType], found: &[ValType]| BridgeError::SignatureMismatch {
            import: format!("{module}.{name}"),
            expected: type_list(expected),
            found: type_list(found),
        };
        let arg_types: Vec<_> = args.iter().map(Val::ty).collect();
        if arg_types != import.sig.params {
            return Err(mismatch(import.sig.params.as_slice(), arg_types.as_slice()).into());
        }
        let results = (import.func)(self, args)?;
        let result_types: Vec<_> = results.iter().map(Val::ty).collect();
        if result_types != import.sig.results {
            return Err(mismatch(import.sig.results.as_slice(), result_types.as_slice()).into());
        }
        Ok(results)
    }

    /// Typed form of [`Bridge::call`].
    pub fn call_typed<P: IntoVals, R: FromVals>(
        &self,
        module: &str,
        name: &str,
        params: P,
    ) -> Result<R, HostError> {
        let results = self.call(module, name, &params.to_vals())?;
        Ok(R::from_vals(&results)?)
    }

    /// Call a function in the configured import module.
    pub fn call_import(&self, name: &str, args: &[Val]) -> Result<Vec<Val>, HostError> {
        self.call(&self.inner.config.import_module, name, args)
    }

    // Handle table

    /// Store `value` and hand ownership of the new handle to the caller.
    pub fn add_object(&self, value: JsValue) -> Handle {
        self.inner.heap.borrow_mut().store(value)
    }

    pub fn get_object(&self, handle: Handle) -> Result<JsValue, BridgeError> {
        self.inner.heap.borrow().load(handle)
    }

    pub fn take_object(&self, handle: Handle) -> Result<JsValue, BridgeError> {
        self.inner.heap.borrow_mut().take(handle)
    }

    pub fn drop_object(&self, handle: Handle) -> Result<(), BridgeError> {
        self.take_object(handle).map(drop)
    }

    pub fn clone_object(&self, handle: Handle) -> Result<Handle, BridgeError> {
        self.inner.heap.borrow_mut().clone_ref(handle)
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.inner.heap.borrow().is_live(handle)
    }

    /// Occupied non-reserved handles.
    pub fn live_objects(&self) -> usize {
        self.inner.heap.borrow().live()
    }

    // Memory

    /// The cached `T` view of the module's memory. Do not hold it across
    /// a call into the module.
    pub fn view<T: Element>(&self) -> TypedView<T> {
        self.inner.views.view::<T>(self.memory())
    }

    pub fn views(&self) -> &ViewCache {
        &self.inner.views
    }

    pub fn read_str(&self, ptr: u32, len: u32) -> Result<String, BridgeError> {
        codec::decode(&self.inner.views, self.memory(), ptr, len)
    }

    pub fn read_bytes(&self, ptr: u32, len: u32) -> Result<Vec<u8>, BridgeError> {
        codec::read_bytes(&self.inner.views, self.memory(), ptr, len)
    }

    /// Copy `value` into module memory. The module owns the result.
    pub fn pass_str(&self, value: &str) -> Result<Encoded, BridgeError> {
        codec::encode(self.guest(), &self.inner.views, value)
    }

    /// Return a module-owned span to the module's deallocator.
    pub fn free(&self, ptr: u32, len: u32) -> Result<(), BridgeError> {
        self.inner.guest.free(ptr, len)
    }

    /// Write `values` at byte address `addr`, which must be aligned to `T`.
    pub fn write_at<T: Element>(&self, addr: u32, values: &[T]) -> Result<(), BridgeError> {
        if addr as usize % T::SIZE != 0 {
            return Err(BridgeError::Misaligned {
                ptr: addr,
                align: T::SIZE as u32,
            });
        }
        self.view::<T>().write(addr as usize / T::SIZE, values)
    }

    /// Read `count` values at byte address `addr`, which must be aligned to `T`.
    pub fn read_at<T: Element>(&self, addr: u32, count: usize) -> Result<Vec<T>, BridgeError> {
        if addr as usize % T::SIZE != 0 {
            return Err(BridgeError::Misaligned {
                ptr: addr,
                align: T::SIZE as u32,
            });
        }
        self.view::<T>().subarray(addr as usize / T::SIZE, count)
    }

    /// Fail unless the `len` bytes at `addr` lie inside memory.
    pub fn check_range(&self, addr: u32, len: u32) -> Result<(), BridgeError> {
        let size = self.memory().byte_len();
        match addr.checked_add(len) {
            Some(end) if end as usize <= size => Ok(()),
            _ => Err(BridgeError::OutOfBounds { ptr: addr, len, size }),
        }
    }

    pub fn write_i32s(&self, addr: u32, values: &[i32]) -> Result<(), BridgeError> {
        self.write_at::<i32>(addr, values)
    }

    /// Write a multi-value `(ptr, len)` return at `ret`.
    pub fn write_span(&self, ret: u32, span: Span) -> Result<(), BridgeError> {
        self.write_at::<u32>(ret, &[span.ptr, span.len])
    }

    /// Pass an optional string out through `ret`, writing `(0, 0)` for none.
    pub fn write_opt_str(&self, ret: u32, value: Option<&str>) -> Result<(), BridgeError> {
        // Nothing is allocated for a return slot the module cannot receive.
        self.check_range(ret, 8)?;
        let span = match value {
            Some(s) => self.pass_str(s)?.span,
            None => Span::default(),
        };
        self.write_span(ret, span)
    }

    // Error bridge

    /// Store a caught host exception for the module to poll.
    pub fn capture(&self, exn: JsValue) {
        let handle = self.add_object(exn);
        let displaced = self.inner.exception.borrow_mut().store(handle);
        if let Some(old) = displaced {
            warn!(%old, new = %handle, "unread host exception overwritten");
            // The displaced handle was stored by us and nobody else holds it.
            if let Err(err) = self.drop_object(old) {
                warn!(%err, "displaced exception handle was already released");
            }
        }
    }

    /// Hand the pending exception handle to the module, or [`Handle::NONE`].
    pub fn take_exception_handle(&self) -> Handle {
        self.inner.exception.borrow_mut().take().unwrap_or(Handle::NONE)
    }

    /// Take the pending exception as a host value.
    pub fn take_exception(&self) -> Option<JsValue> {
        let handle = self.inner.exception.borrow_mut().take()?;
        self.take_object(handle).ok()
    }

    pub fn has_pending_exception(&self) -> bool {
        self.inner.exception.borrow().is_pending()
    }

    /// Unread exceptions lost to a newer one so far.
    pub fn exceptions_overwritten(&self) -> u64 {
        self.inner.exception.borrow().overwritten()
    }

    // Closures

    /// Wrap the module closure `(a, b)` as a host function.
    pub fn make_closure(&self, a: u32, b: u32, dtor: u32, adapter: u32, abi: ClosureAbi) -> JsFunction {
        debug!(a, b, dtor, adapter, "registering closure");
        JsFunction::closure(ClosureState::new(self.downgrade(), a, b, dtor, adapter, abi))
    }

    fn closure_at(&self, handle: Handle) -> Result<Rc<ClosureState>, BridgeError> {
        match self.get_object(handle)? {
            JsValue::Function(f) => f.closure_state().cloned().ok_or(BridgeError::InvalidHandle(handle.0)),
            _ => Err(BridgeError::InvalidHandle(handle.0)),
        }
    }

    /// Drop the reference held by `handle`. Returns whether this released
    /// the module-side environment.
    pub fn drop_closure(&self, handle: Handle) -> Result<bool, BridgeError> {
        let state = self.closure_at(handle)?;
        self.drop_object(handle)?;
        state.drop_ref(self)
    }

    /// Take one more owning reference to the closure behind `handle`,
    /// returned as a new handle.
    pub fn retain_closure(&self, handle: Handle) -> Result<Handle, BridgeError> {
        let state = self.closure_at(handle)?;
        state.retain()?;
        self.clone_object(handle)
    }
}
