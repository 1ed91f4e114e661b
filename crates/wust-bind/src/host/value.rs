//! Dynamic host values.
//!
//! The host is dynamically typed: a value is a primitive, a reference to a
//! shared object graph, or something callable. Reference variants compare
//! by identity and primitives by value, with `Object.is` rules for numbers.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

use crate::closure::ClosureState;
use crate::error::HostError;

/// Result of calling a host function. A thrown host exception arrives as
/// [`HostError::Thrown`].
pub type JsResult = Result<JsValue, HostError>;

type NativeFn = dyn Fn(&[JsValue]) -> JsResult;

#[derive(Clone, Default)]
pub enum JsValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(JsArray),
    Object(JsObject),
    Function(JsFunction),
}

impl JsValue {
    /// A fresh `Error` object.
    pub fn error(message: impl Into<String>) -> JsValue {
        Self::error_with_name("Error", message)
    }

    /// A fresh error object of class `name` (e.g. `TypeError`).
    pub fn error_with_name(name: &str, message: impl Into<String>) -> JsValue {
        let message = message.into();
        let obj = JsObject::new(name);
        obj.set("name", JsValue::from(name));
        obj.set("stack", JsValue::from(format!("{name}: {message}\n    at <host>")));
        obj.set("message", JsValue::from(message));
        JsValue::Object(obj)
    }

    pub fn array(items: Vec<JsValue>) -> JsValue {
        JsValue::Array(JsArray(Rc::new(RefCell::new(items))))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, JsValue::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JsValue::Null)
    }

    /// `typeof v === 'object' && v !== null`.
    pub fn is_object(&self) -> bool {
        matches!(self, JsValue::Array(_) | JsValue::Object(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, JsValue::Function(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, JsValue::String(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JsValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&JsObject> {
        match self {
            JsValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&JsFunction> {
        match self {
            JsValue::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Null | JsValue::Array(_) | JsValue::Object(_) => "object",
            JsValue::Bool(_) => "boolean",
            JsValue::Number(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Function(_) => "function",
        }
    }

    /// Human-readable rendering used for diagnostics and uncaught faults.
    pub fn debug_string(&self) -> String {
        self.render(&mut Vec::new())
    }

    /// `open` holds the arrays currently being rendered, outermost first.
    fn render(&self, open: &mut Vec<JsArray>) -> String {
        match self {
            JsValue::Undefined => "undefined".into(),
            JsValue::Null => "null".into(),
            JsValue::Bool(b) => b.to_string(),
            JsValue::Number(n) => number_to_string(*n),
            JsValue::String(s) => format!("\"{s}\""),
            JsValue::Function(f) => {
                if f.name().is_empty() {
                    "Function".into()
                } else {
                    format!("Function({})", f.name())
                }
            }
            JsValue::Array(arr) => {
                if open.len() >= MAX_DEPTH || open.iter().any(|outer| Rc::ptr_eq(&outer.0, &arr.0)) {
                    return "[...]".into();
                }
                open.push(arr.clone());
                let items: Vec<String> = arr.0.borrow().iter().map(|item| item.render(open)).collect();
                open.pop();
                format!("[{}]", items.join(", "))
            }
            JsValue::Object(obj) => obj.debug_string(),
        }
    }
}

const MAX_DEPTH: usize = 64;

/// `JSON.stringify` view of a value. Nesting past [`MAX_DEPTH`] is an
/// error, which is also how cycles end.
struct Json<'a> {
    value: &'a JsValue,
    depth: usize,
}

impl<'a> Json<'a> {
    fn root(value: &'a JsValue) -> Self {
        Json { value, depth: 0 }
    }

    fn child<'b>(&self, value: &'b JsValue) -> Json<'b> {
        Json {
            value,
            depth: self.depth + 1,
        }
    }
}

/// Skipped by `JSON.stringify` when they appear as property values.
fn is_unserializable(value: &JsValue) -> bool {
    matches!(value, JsValue::Undefined | JsValue::Function(_))
}

impl Serialize for Json<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.depth > MAX_DEPTH {
            return Err(S::Error::custom("value nests too deeply"));
        }
        match self.value {
            JsValue::Undefined | JsValue::Null | JsValue::Function(_) => serializer.serialize_unit(),
            JsValue::Bool(b) => serializer.serialize_bool(*b),
            JsValue::Number(n) if n.is_finite() => {
                // serde_json would print 1e21 as `1e21`; the host prints `1e+21`.
                let raw = RawValue::from_string(number_to_string(*n)).map_err(S::Error::custom)?;
                raw.serialize(serializer)
            }
            JsValue::Number(_) => serializer.serialize_unit(),
            JsValue::String(s) => serializer.serialize_str(s),
            JsValue::Array(arr) => {
                let items = arr.0.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(&self.child(item))?;
                }
                seq.end()
            }
            JsValue::Object(obj) => {
                let props = obj.data.props.borrow();
                let mut map = serializer.serialize_map(None)?;
                for (key, value) in props.iter().filter(|(_, v)| !is_unserializable(v)) {
                    map.serialize_entry(key, &self.child(value))?;
                }
                map.end()
            }
        }
    }
}

/// `Number.prototype.toString()`: plain decimals for magnitudes in
/// `[1e-6, 1e21)`, exponent form otherwise.
fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        let name = if n > 0.0 { "Infinity" } else { "-Infinity" };
        return name.into();
    }
    if n == 0.0 {
        return "0".into();
    }
    // Shortest round-trip digits, e.g. `1.25e-7`.
    let sci = format!("{:e}", n.abs());
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let exp: i32 = exp.parse().unwrap_or(0);
    let k = digits.len() as i32;
    let point = exp + 1;

    let body = if k <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat(point.unsigned_abs() as usize))
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        match digits.split_at(1) {
            (first, "") => format!("{first}e{sign}{}", exp.unsigned_abs()),
            (first, rest) => format!("{first}.{rest}e{sign}{}", exp.unsigned_abs()),
        }
    };
    if n < 0.0 { format!("-{body}") } else { body }
}

impl PartialEq for JsValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
            (JsValue::Bool(a), JsValue::Bool(b)) => a == b,
            (JsValue::Number(a), JsValue::Number(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (JsValue::String(a), JsValue::String(b)) => a == b,
            (JsValue::Array(a), JsValue::Array(b)) => Rc::ptr_eq(&a.0, &b.0),
            (JsValue::Object(a), JsValue::Object(b)) => Rc::ptr_eq(&a.data, &b.data),
            (JsValue::Function(a), JsValue::Function(b)) => Rc::ptr_eq(&a.data, &b.data),
            _ => false,
        }
    }
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_string())
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        JsValue::Bool(b)
    }
}

impl From<f64> for JsValue {
    fn from(n: f64) -> Self {
        JsValue::Number(n)
    }
}

impl From<i32> for JsValue {
    fn from(n: i32) -> Self {
        JsValue::Number(n as f64)
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        JsValue::String(Rc::from(s))
    }
}

impl From<String> for JsValue {
    fn from(s: String) -> Self {
        JsValue::String(Rc::from(s))
    }
}

impl From<JsObject> for JsValue {
    fn from(obj: JsObject) -> Self {
        JsValue::Object(obj)
    }
}

impl From<JsFunction> for JsValue {
    fn from(f: JsFunction) -> Self {
        JsValue::Function(f)
    }
}

/// A shared, mutable host array.
#[derive(Clone)]
pub struct JsArray(Rc<RefCell<Vec<JsValue>>>);

impl JsArray {
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> JsValue {
        self.0.borrow().get(index).cloned().unwrap_or_default()
    }

    pub fn push(&self, value: JsValue) {
        self.0.borrow_mut().push(value);
    }
}

struct ObjectData {
    class: String,
    props: RefCell<Vec<(String, JsValue)>>,
}

/// A shared host object with a class name and ordered properties.
#[derive(Clone)]
pub struct JsObject {
    data: Rc<ObjectData>,
}

impl JsObject {
    pub fn new(class: &str) -> Self {
        JsObject {
            data: Rc::new(ObjectData {
                class: class.to_string(),
                props: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn class(&self) -> &str {
        &self.data.class
    }

    /// Property lookup; a missing property reads as `undefined`.
    pub fn get(&self, key: &str) -> JsValue {
        self.data
            .props
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    pub fn set(&self, key: &str, value: JsValue) {
        let mut props = self.data.props.borrow_mut();
        match props.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => props.push((key.to_string(), value)),
        }
    }

    fn is_error(&self) -> bool {
        self.data.class.ends_with("Error")
    }

    fn debug_string(&self) -> String {
        if self.is_error() {
            let name = self.get("name");
            let name = name.as_str().unwrap_or(&self.data.class);
            let message = self.get("message");
            let stack = self.get("stack");
            return format!(
                "{name}: {}\n{}",
                message.as_str().unwrap_or(""),
                stack.as_str().unwrap_or("")
            );
        }
        if self.data.class == "Object" {
            let value = JsValue::Object(self.clone());
            return match serde_json::to_string(&Json::root(&value)) {
                Ok(json) => format!("Object({json})"),
                Err(_) => "Object".into(),
            };
        }
        self.data.class.clone()
    }
}

pub(crate) enum FunctionKind {
    Native(Box<NativeFn>),
    Closure(Rc<ClosureState>),
}

pub(crate) struct FunctionData {
    name: String,
    kind: FunctionKind,
}

/// A host-callable function: either native host code or a trampoline back
/// into the module.
#[derive(Clone)]
pub struct JsFunction {
    data: Rc<FunctionData>,
}

impl JsFunction {
    pub fn native(name: &str, f: impl Fn(&[JsValue]) -> JsResult + 'static) -> Self {
        JsFunction {
            data: Rc::new(FunctionData {
                name: name.to_string(),
                kind: FunctionKind::Native(Box::new(f)),
            }),
        }
    }

    pub(crate) fn closure(state: Rc<ClosureState>) -> Self {
        JsFunction {
            data: Rc::new(FunctionData {
                name: String::new(),
                kind: FunctionKind::Closure(state),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// The closure state behind a trampoline, if this is one.
    pub(crate) fn closure_state(&self) -> Option<&Rc<ClosureState>> {
        match &self.data.kind {
            FunctionKind::Closure(state) => Some(state),
            FunctionKind::Native(_) => None,
        }
    }

    pub fn is_closure(&self) -> bool {
        self.closure_state().is_some()
    }

    pub fn call(&self, args: &[JsValue]) -> JsResult {
        match &self.data.kind {
            FunctionKind::Native(f) => f(args),
            FunctionKind::Closure(state) => state.invoke(args),
        }
    }
}
