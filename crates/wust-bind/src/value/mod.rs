//! Core values crossing the module boundary.
//!
//! Everything the module passes to a host function, and everything a host
//! function hands back, is one of the four numeric core types. Richer host
//! values travel as handles or as spans into linear memory.

use std::fmt;

use crate::error::BridgeError;

/// Core value type of a parameter or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Render a list of types as `(i32, f64)`.
pub fn type_list(types: &[ValType]) -> String {
    let names: Vec<String> = types.iter().map(ToString::to_string).collect();
    format!("({})", names.join(", "))
}

impl TryFrom<wasmparser::ValType> for ValType {
    type Error = BridgeError;

    fn try_from(ty: wasmparser::ValType) -> Result<Self, Self::Error> {
        match ty {
            wasmparser::ValType::I32 => Ok(ValType::I32),
            wasmparser::ValType::I64 => Ok(ValType::I64),
            wasmparser::ValType::F32 => Ok(ValType::F32),
            wasmparser::ValType::F64 => Ok(ValType::F64),
            other => Err(BridgeError::Link(format!(
                "unsupported value type {other:?} at the host boundary"
            ))),
        }
    }
}

/// Dynamic core value for untyped host calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Val {
    pub fn zero_for(ty: ValType) -> Val {
        match ty {
            ValType::I32 => Val::I32(0),
            ValType::I64 => Val::I64(0),
            ValType::F32 => Val::F32(0.0),
            ValType::F64 => Val::F64(0.0),
        }
    }

    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(..) => ValType::I32,
            Val::I64(..) => ValType::I64,
            Val::F32(..) => ValType::F32,
            Val::F64(..) => ValType::F64,
        }
    }
}

/// Convert a single Rust value to/from a `Val`.
pub trait WasmVal: Sized {
    const TYPE: ValType;
    fn to_val(&self) -> Val;
    fn from_val(val: &Val) -> Result<Self, BridgeError>;
}

fn mismatch(expected: ValType, val: &Val) -> BridgeError {
    BridgeError::SignatureMismatch {
        import: "<value>".into(),
        expected: expected.to_string(),
        found: val.ty().to_string(),
    }
}

impl WasmVal for i32 {
    const TYPE: ValType = ValType::I32;
    fn to_val(&self) -> Val {
        Val::I32(*self)
    }
    fn from_val(val: &Val) -> Result<Self, BridgeError> {
        match val {
            Val::I32(v) => Ok(*v),
            _ => Err(mismatch(Self::TYPE, val)),
        }
    }
}

// Pointers and lengths are unsigned on the host side but travel as i32.
impl WasmVal for u32 {
    const TYPE: ValType = ValType::I32;
    fn to_val(&self) -> Val {
        Val::I32(*self as i32)
    }
    fn from_val(val: &Val) -> Result<Self, BridgeError> {
        match val {
            Val::I32(v) => Ok(*v as u32),
            _ => Err(mismatch(Self::TYPE, val)),
        }
    }
}

impl WasmVal for bool {
    const TYPE: ValType = ValType::I32;
    fn to_val(&self) -> Val {
        Val::I32(*self as i32)
    }
    fn from_val(val: &Val) -> Result<Self, BridgeError> {
        match val {
            Val::I32(v) => Ok(*v != 0),
            _ => Err(mismatch(Self::TYPE, val)),
        }
    }
}

impl WasmVal for i64 {
    const TYPE: ValType = ValType::I64;
    fn to_val(&self) -> Val {
        Val::I64(*self)
    }
    fn from_val(val: &Val) -> Result<Self, BridgeError> {
        match val {
            Val::I64(v) => Ok(*v),
            _ => Err(mismatch(Self::TYPE, val)),
        }
    }
}

impl WasmVal for f32 {
    const TYPE: ValType = ValType::F32;
    fn to_val(&self) -> Val {
        Val::F32(*self)
    }
    fn from_val(val: &Val) -> Result<Self, BridgeError> {
        match val {
            Val::F32(v) => Ok(*v),
            _ => Err(mismatch(Self::TYPE, val)),
        }
    }
}

impl WasmVal for f64 {
    const TYPE: ValType = ValType::F64;
    fn to_val(&self) -> Val {
        Val::F64(*self)
    }
    fn from_val(val: &Val) -> Result<Self, BridgeError> {
        match val {
            Val::F64(v) => Ok(*v),
            _ => Err(mismatch(Self::TYPE, val)),
        }
    }
}

/// Convert Rust values into a list of core values.
pub trait IntoVals {
    fn types() -> Vec<ValType>;
    fn to_vals(&self) -> Vec<Val>;
}

/// Convert a list of core values back into Rust values.
pub trait FromVals: Sized {
    fn types() -> Vec<ValType>;
    fn from_vals(vals: &[Val]) -> Result<Self, BridgeError>;
}

impl IntoVals for () {
    fn types() -> Vec<ValType> {
        vec![]
    }
    fn to_vals(&self) -> Vec<Val> {
        vec![]
    }
}

impl FromVals for () {
    fn types() -> Vec<ValType> {
        vec![]
    }
    fn from_vals(vals: &[Val]) -> Result<Self, BridgeError> {
        if !vals.is_empty() {
            return Err(BridgeError::SignatureMismatch {
                import: "<values>".into(),
                expected: "0 values".into(),
                found: format!("{} values", vals.len()),
            });
        }
        Ok(())
    }
}

macro_rules! impl_val_tuples {
    ($(($($T:ident),+)),* $(,)?) => {
        $(
            impl<$($T: WasmVal),+> IntoVals for ($($T,)+) {
                fn types() -> Vec<ValType> {
                    vec![$($T::TYPE),+]
                }

                #[allow(non_snake_case)]
                fn to_vals(&self) -> Vec<Val> {
                    let ($($T,)+) = self;
                    vec![$($T.to_val()),+]
                }
            }

            impl<$($T: WasmVal),+> FromVals for ($($T,)+) {
                fn types() -> Vec<ValType> {
                    vec![$($T::TYPE),+]
                }

                fn from_vals(vals: &[Val]) -> Result<Self, BridgeError> {
                    impl_val_tuples!(@destructure vals, $($T),+)
                }
            }
        )*
    };

    (@destructure $vals:ident, $($T:ident),+) => {{
        let expected = impl_val_tuples!(@count $($T),+);
        if $vals.len() != expected {
            return Err(BridgeError::SignatureMismatch {
                import: "<values>".into(),
                expected: format!("{} values", expected),
                found: format!("{} values", $vals.len()),
            });
        }
        let mut _i = 0;
        Ok(($({
            let v = $T::from_val(&$vals[_i])?;
            _i += 1;
            v
        },)+))
    }};

    (@count $($T:ident),+) => {
        <[()]>::len(&[$(impl_val_tuples!(@unit $T)),+])
    };

    (@unit $T:ident) => { () };
}

impl_val_tuples!(
    (A),
    (A, B),
    (A, B, C),
    (A, B, C, D),
    (A, B, C, D, E),
    (A, B, C, D, E, F),
    (A, B, C, D, E, F, G),
    (A, B, C, D, E, F, G, H),
    (A, B, C, D, E, F, G, H, I),
    (A, B, C, D, E, F, G, H, I, J),
);
