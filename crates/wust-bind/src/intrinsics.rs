//! Built-in host functions every linked module can import.
//!
//! These are the fixed `__wbindgen_*` surface: handle bookkeeping, value
//! inspection, string passing, errors and closure drops. Span results are
//! written as two 32-bit words `(ptr, len)` at a caller-supplied address.

use crate::bridge::Bridge;
use crate::error::HostError;
use crate::heap::Handle;
use crate::host::JsValue;
use crate::linker::Linker;

/// Register every intrinsic under the linker's import module.
pub fn register(linker: &mut Linker) {
    let m = linker.import_module().to_string();

    linker
        .func_wrap(&m, "__wbindgen_object_drop_ref", |bridge, (h,): (Handle,)| {
            Ok(bridge.drop_object(h)?)
        })
        .func_wrap(&m, "__wbindgen_object_clone_ref", |bridge, (h,): (Handle,)| {
            Ok((bridge.clone_object(h)?,))
        })
        .func_wrap(&m, "__wbindgen_string_new", |bridge, (ptr, len): (u32, u32)| {
            let s = bridge.read_str(ptr, len)?;
            Ok((bridge.add_object(JsValue::from(s)),))
        })
        .func_wrap(&m, "__wbindgen_string_get", |bridge, (ret, h): (u32, Handle)| {
            let value = bridge.get_object(h)?;
            Ok(bridge.write_opt_str(ret, value.as_str())?)
        })
        .func_wrap(&m, "__wbindgen_number_new", |bridge, (n,): (f64,)| {
            Ok((bridge.add_object(JsValue::Number(n)),))
        })
        .func_wrap(&m, "__wbindgen_number_get", |bridge, (ret, h): (u32, Handle)| {
            let n = bridge.get_object(h)?.as_f64();
            // Flag word, padding, then the f64: all 16 bytes must fit.
            bridge.check_range(ret, 16)?;
            bridge.write_at::<f64>(ret + 8, &[n.unwrap_or(0.0)])?;
            Ok(bridge.write_at::<i32>(ret, &[n.is_some() as i32])?)
        })
        .func_wrap(&m, "__wbindgen_boolean_get", |bridge, (h,): (Handle,)| {
            let flag = match bridge.get_object(h)?.as_bool() {
                Some(b) => b as i32,
                None => 2,
            };
            Ok((flag,))
        })
        .func_wrap(&m, "__wbindgen_is_undefined", |bridge, (h,): (Handle,)| {
            Ok((bridge.get_object(h)?.is_undefined(),))
        })
        .func_wrap(&m, "__wbindgen_is_null", |bridge, (h,): (Handle,)| {
            Ok((bridge.get_object(h)?.is_null(),))
        })
        .func_wrap(&m, "__wbindgen_is_object", |bridge, (h,): (Handle,)| {
            Ok((bridge.get_object(h)?.is_object(),))
        })
        .func_wrap(&m, "__wbindgen_is_function", |bridge, (h,): (Handle,)| {
            Ok((bridge.get_object(h)?.is_function(),))
        })
        .func_wrap(&m, "__wbindgen_is_string", |bridge, (h,): (Handle,)| {
            Ok((bridge.get_object(h)?.is_string(),))
        })
        .func_wrap(&m, "__wbindgen_debug_string", |bridge, (ret, h): (u32, Handle)| {
            let rendered = bridge.get_object(h)?.debug_string();
            bridge.check_range(ret, 8)?;
            let encoded = bridge.pass_str(&rendered)?;
            Ok(bridge.write_span(ret, encoded.span)?)
        })
        .func_wrap(&m, "__wbindgen_error_new", |bridge, (ptr, len): (u32, u32)| {
            let message = bridge.read_str(ptr, len)?;
            Ok((bridge.add_object(JsValue::error(message)),))
        })
        .func_wrap(&m, "__wbindgen_throw", |bridge: &Bridge, (ptr, len): (u32, u32)| {
            let message = bridge.read_str(ptr, len)?;
            Err::<(), _>(HostError::error(message))
        })
        .func_wrap(&m, "__wbindgen_rethrow", |bridge: &Bridge, (h,): (Handle,)| {
            Err::<(), _>(HostError::Thrown(bridge.take_object(h)?))
        })
        .func_wrap(&m, "__wbindgen_cb_drop", |bridge, (h,): (Handle,)| {
            Ok((bridge.drop_closure(h)?,))
        })
        .func_wrap(&m, "__wbindgen_exn_take", |bridge, (): ()| {
            Ok((bridge.take_exception_handle(),))
        });
}
