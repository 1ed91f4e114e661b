//! Static view of a module binary: what it imports and what it exports.

use tracing::debug;
use wasmparser::{ExternalKind, Parser, Payload, TypeRef};

use crate::error::BridgeError;
use crate::linker::Signature;
use crate::value::ValType;

/// A function the module imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncImport {
    pub module: String,
    pub name: String,
    pub sig: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportKind {
    Func(Signature),
    Memory,
    Table,
    Global,
    Tag,
}

impl ExportKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ExportKind::Func(_) => "func",
            ExportKind::Memory => "memory",
            ExportKind::Table => "table",
            ExportKind::Global => "global",
            ExportKind::Tag => "tag",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestExport {
    pub name: String,
    pub kind: ExportKind,
}

/// Imports and exports of a parsed module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestInterface {
    imports: Vec<FuncImport>,
    /// Non-function imports as `(module, name, kind)`.
    other_imports: Vec<(String, String, &'static str)>,
    exports: Vec<GuestExport>,
}

fn parse_error(e: wasmparser::BinaryReaderError) -> BridgeError {
    BridgeError::Link(format!("malformed module: {e}"))
}

fn signature(ty: &wasmparser::FuncType) -> Result<Signature, BridgeError> {
    let convert = |types: &[wasmparser::ValType]| {
        types
            .iter()
            .map(|t| ValType::try_from(*t))
            .collect::<Result<Vec<_>, _>>()
    };
    Ok(Signature::new(convert(ty.params())?, convert(ty.results())?))
}

impl GuestInterface {
    /// Parse a binary module.
    pub fn parse(bytes: &[u8]) -> Result<Self, BridgeError> {
        let mut types: Vec<Option<Signature>> = Vec::new();
        // Type index of every function, imports first.
        let mut func_types: Vec<u32> = Vec::new();
        let mut pending_imports: Vec<(String, String, u32)> = Vec::new();
        let mut raw_exports: Vec<(String, ExternalKind, u32)> = Vec::new();
        let mut interface = GuestInterface::default();

        for payload in Parser::new(0).parse_all(bytes) {
            match payload.map_err(parse_error)? {
                Payload::TypeSection(reader) => {
                    for ty in reader.into_iter_err_on_gc_types() {
                        let ty = ty.map_err(parse_error)?;
                        // Types with v128 or reference params never reach the host boundary.
                        types.push(signature(&ty).ok());
                    }
                }
                Payload::ImportSection(reader) => {
                    for import in reader {
                        let import = import.map_err(parse_error)?;
                        let kind = match import.ty {
                            TypeRef::Func(idx) => {
                                func_types.push(idx);
                                pending_imports.push((import.module.to_string(), import.name.to_string(), idx));
                                continue;
                            }
                            TypeRef::Memory(_) => "memory",
                            TypeRef::Table(_) => "table",
                            TypeRef::Global(_) => "global",
                            _ => "tag",
                        };
                        interface
                            .other_imports
                            .push((import.module.to_string(), import.name.to_string(), kind));
                    }
                }
                Payload::FunctionSection(reader) => {
                    for idx in reader {
                        func_types.push(idx.map_err(parse_error)?);
                    }
                }
                Payload::ExportSection(reader) => {
                    for export in reader {
                        let export = export.map_err(parse_error)?;
                        raw_exports.push((export.name.to_string(), export.kind, export.index));
                    }
                }
                _ => {}
            }
        }

        let lookup = |type_idx: u32, what: &str| -> Result<Signature, BridgeError> {
            types
                .get(type_idx as usize)
                .cloned()
                .flatten()
                .ok_or_else(|| BridgeError::Link(format!("{what} has a type the host cannot call")))
        };

        for (module, name, idx) in pending_imports {
            let sig = lookup(idx, &format!("import {module}.{name}"))?;
            interface.imports.push(FuncImport { module, name, sig });
        }
        for (name, kind, index) in raw_exports {
            let kind = match kind {
                ExternalKind::Func => {
                    let type_idx = func_types.get(index as usize).copied().ok_or_else(|| {
                        BridgeError::Link(format!("export {name} names missing function {index}"))
                    })?;
                    // Internal exports may use types the host never calls.
                    ExportKind::Func(lookup(type_idx, &name).unwrap_or_default())
                }
                ExternalKind::Memory => ExportKind::Memory,
                ExternalKind::Table => ExportKind::Table,
                ExternalKind::Global => ExportKind::Global,
                _ => ExportKind::Tag,
            };
            interface.exports.push(GuestExport { name, kind });
        }

        debug!(
            imports = interface.imports.len(),
            exports = interface.exports.len(),
            "parsed module interface"
        );
        Ok(interface)
    }

    /// Parse a module given as text or binary.
    pub fn parse_any(bytes: &[u8]) -> Result<Self, BridgeError> {
        let binary = wat::parse_bytes(bytes).map_err(|e| BridgeError::Link(e.to_string()))?;
        Self::parse(&binary)
    }

    pub fn func_imports(&self) -> &[FuncImport] {
        &self.imports
    }

    pub fn other_imports(&self) -> &[(String, String, &'static str)] {
        &self.other_imports
    }

    pub fn exports(&self) -> &[GuestExport] {
        &self.exports
    }

    pub fn export(&self, name: &str) -> Option<&ExportKind> {
        self.exports.iter().find(|e| e.name == name).map(|e| &e.kind)
    }

    /// Function imports from `module`.
    pub fn imports_from<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a FuncImport> + 'a {
        self.imports.iter().filter(move |i| i.module == module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_imports_and_exports() {
        let wasm = wat::parse_str(
            r#"(module
                (import "wbg" "__wbindgen_object_drop_ref" (func (param i32)))
                (import "env" "base" (global i32))
                (memory (export "memory") 1)
                (func (export "__wbindgen_malloc") (param i32) (result i32) i32.const 8)
                (table (export "__wbindgen_export_2") 1 funcref))"#,
        )
        .unwrap();
        let interface = GuestInterface::parse(&wasm).unwrap();
        assert_eq!(interface.func_imports().len(), 1);
        assert_eq!(interface.func_imports()[0].sig, Signature::new([ValType::I32], []));
        assert_eq!(interface.other_imports(), &[("env".into(), "base".into(), "global")]);
        assert_eq!(interface.export("memory"), Some(&ExportKind::Memory));
        assert_eq!(
            interface.export("__wbindgen_malloc"),
            Some(&ExportKind::Func(Signature::new([ValType::I32], [ValType::I32])))
        );
        assert_eq!(interface.export("__wbindgen_export_2"), Some(&ExportKind::Table));
    }

    #[test]
    fn text_and_binary_parse_alike() {
        let text = b"(module (func (export \"f\") (param f64)))";
        let binary = wat::parse_bytes(text).unwrap();
        assert_eq!(
            GuestInterface::parse_any(text).unwrap(),
            GuestInterface::parse(&binary).unwrap()
        );
    }

    #[test]
    fn garbage_is_a_link_error() {
        assert!(matches!(
            GuestInterface::parse(b"\0asm\x02\0\0\0"),
            Err(BridgeError::Link(_))
        ));
    }
}
