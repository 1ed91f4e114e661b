//! Host-callable trampolines over module closures.
//!
//! A module closure is an opaque environment pair `(a, b)` plus two module
//! entry points: an invoke adapter and a destructor-table entry. The host
//! sees it as a [`JsFunction`]. The state record counts references: the
//! function value itself holds one, and every in-flight invocation holds
//! one more while it runs. `a` is checked out (set to 0) for the duration
//! of a call so a reentrant drop cannot release the environment under the
//! running body. Whoever brings the count to zero runs the destructor, and
//! it runs at most once.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::bridge::{Bridge, Inner};
use crate::error::{BridgeError, HostError};
use crate::host::{JsResult, JsValue};
use crate::value::{Val, ValType};

/// How one closure argument or result crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiType {
    /// Stored in the handle table and passed as a handle.
    Object,
    /// Passed as `f64`.
    Number,
    /// Truncated to `i32`.
    Int,
    /// `0` or `1` as `i32`.
    Bool,
}

impl AbiType {
    pub fn val_type(self) -> ValType {
        match self {
            AbiType::Number => ValType::F64,
            AbiType::Object | AbiType::Int | AbiType::Bool => ValType::I32,
        }
    }
}

/// Argument and result layout of one closure invoke adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClosureAbi {
    pub params: Vec<AbiType>,
    pub result: Option<AbiType>,
}

impl ClosureAbi {
    pub fn new(params: impl Into<Vec<AbiType>>, result: Option<AbiType>) -> Self {
        ClosureAbi {
            params: params.into(),
            result,
        }
    }

    /// Types the module sees: `(a, b, params...) -> result`.
    pub fn adapter_params(&self) -> Vec<ValType> {
        let mut types = vec![ValType::I32, ValType::I32];
        types.extend(self.params.iter().map(|p| p.val_type()));
        types
    }
}

pub struct ClosureState {
    a: Cell<u32>,
    b: u32,
    cnt: Cell<u32>,
    dtor: u32,
    adapter: u32,
    abi: ClosureAbi,
    released: Cell<bool>,
    bridge: Weak<Inner>,
}

impl fmt::Debug for ClosureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureState")
            .field("a", &self.a.get())
            .field("b", &self.b)
            .field("cnt", &self.cnt.get())
            .field("dtor", &self.dtor)
            .field("adapter", &self.adapter)
            .field("released", &self.released.get())
            .finish()
    }
}

impl ClosureState {
    pub(crate) fn new(
        bridge: Weak<Inner>,
        a: u32,
        b: u32,
        dtor: u32,
        adapter: u32,
        abi: ClosureAbi,
    ) -> Rc<Self> {
        Rc::new(ClosureState {
            a: Cell::new(a),
            b,
            cnt: Cell::new(1),
            dtor,
            adapter,
            abi,
            released: Cell::new(false),
            bridge,
        })
    }

    /// Whether an invocation currently holds the environment.
    fn is_running(&self) -> bool {
        self.a.get() == 0 && !self.released.get()
    }

    /// Take one more owning reference.
    pub(crate) fn retain(&self) -> Result<(), BridgeError> {
        if self.released.get() {
            return Err(BridgeError::ClosureReentered);
        }
        self.cnt.set(self.cnt.get() + 1);
        Ok(())
    }

    pub(crate) fn invoke(&self, args: &[JsValue]) -> JsResult {
        let bridge = Bridge::upgrade(&self.bridge).ok_or(BridgeError::Unlinked)?;
        bridge.ensure_linked()?;

        let a = self.a.get();
        if a == 0 || self.released.get() {
            return Err(BridgeError::ClosureReentered.into());
        }
        self.cnt.set(self.cnt.get() + 1);
        self.a.set(0);

        let result = self.call_guest(&bridge, a, args);

        let remaining = self.cnt.get() - 1;
        self.cnt.set(remaining);
        if remaining == 0 {
            let released = self.release(&bridge, a);
            // A fault from the body wins over one from the destructor.
            let value = result?;
            released?;
            Ok(value)
        } else {
            self.a.set(a);
            result
        }
    }

    fn call_guest(&self, bridge: &Bridge, a: u32, args: &[JsValue]) -> JsResult {
        let mut vals = Vec::with_capacity(self.abi.params.len());
        for (i, ty) in self.abi.params.iter().enumerate() {
            let arg = args.get(i).cloned().unwrap_or_default();
            vals.push(lower(bridge, *ty, arg));
        }
        let results = bridge
            .guest()
            .invoke_closure(bridge, self.adapter, a, self.b, &vals)?;
        match self.abi.result {
            None => Ok(JsValue::Undefined),
            Some(ty) => {
                let Some(val) = results.first() else {
                    return Err(BridgeError::SignatureMismatch {
                        import: format!("closure adapter {}", self.adapter),
                        expected: ty.val_type().to_string(),
                        found: "no result".into(),
                    }
                    .into());
                };
                Ok(lift(bridge, ty, val)?)
            }
        }
    }

    /// Drop one owning reference. Returns whether this drop released the
    /// environment.
    pub(crate) fn drop_ref(&self, bridge: &Bridge) -> Result<bool, BridgeError> {
        let cnt = self.cnt.get();
        if cnt == 0 || self.released.get() {
            return Ok(false);
        }
        if cnt == 1 && self.is_running() {
            // The last reference belongs to a running invocation.
            return Err(BridgeError::ClosureReentered);
        }
        self.cnt.set(cnt - 1);
        if cnt == 1 {
            let a = self.a.replace(0);
            self.release(bridge, a)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn release(&self, bridge: &Bridge, a: u32) -> Result<(), BridgeError> {
        if self.released.replace(true) {
            return Ok(());
        }
        self.a.set(0);
        debug!(dtor = self.dtor, a, b = self.b, "releasing closure environment");
        bridge.guest().destroy_closure(self.dtor, a, self.b)
    }
}

fn lower(bridge: &Bridge, ty: AbiType, arg: JsValue) -> Val {
    match ty {
        AbiType::Object => Val::I32(bridge.add_object(arg).0 as i32),
        AbiType::Number => Val::F64(arg.as_f64().unwrap_or(f64::NAN)),
        AbiType::Int => Val::I32(arg.as_f64().map_or(0, |n| n as i32)),
        AbiType::Bool => Val::I32(truthy(&arg) as i32),
    }
}

fn lift(bridge: &Bridge, ty: AbiType, val: &Val) -> Result<JsValue, HostError> {
    let mismatch = || BridgeError::SignatureMismatch {
        import: "closure result".into(),
        expected: ty.val_type().to_string(),
        found: val.ty().to_string(),
    };
    Ok(match (ty, val) {
        (AbiType::Object, Val::I32(h)) => bridge.take_object(crate::heap::Handle(*h as u32))?,
        (AbiType::Number, Val::F64(n)) => JsValue::Number(*n),
        (AbiType::Int, Val::I32(n)) => JsValue::Number(f64::from(*n)),
        (AbiType::Bool, Val::I32(n)) => JsValue::Bool(*n != 0),
        _ => return Err(mismatch().into()),
    })
}

fn truthy(value: &JsValue) -> bool {
    match value {
        JsValue::Undefined | JsValue::Null => false,
        JsValue::Bool(b) => *b,
        JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
        JsValue::String(s) => !s.is_empty(),
        JsValue::Array(_) | JsValue::Object(_) | JsValue::Function(_) => true,
    }
}
