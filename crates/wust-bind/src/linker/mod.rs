//! Named import registry for linking a module to the host.
//!
//! The [`Linker`] collects host functions keyed by `(module, name)` along
//! with their core signatures, validates a module's declared imports and
//! exports against them, and produces a live [`Bridge`] on instantiation.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::bridge::Bridge;
use crate::closure::ClosureAbi;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, HostError};
use crate::guest::Guest;
use crate::interface::GuestInterface;
use crate::value::{FromVals, IntoVals, Val, ValType, type_list};

/// A host function callable from the module.
pub type HostFunc = Rc<dyn Fn(&Bridge, &[Val]) -> Result<Vec<Val>, HostError>>;

/// Core function signature at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl Signature {
    pub fn new(params: impl Into<Vec<ValType>>, results: impl Into<Vec<ValType>>) -> Self {
        Signature {
            params: params.into(),
            results: results.into(),
        }
    }

    /// The signature of a typed host function taking `P` and returning `R`.
    pub fn of<P: FromVals, R: IntoVals>() -> Self {
        Signature::new(<P as FromVals>::types(), <R as IntoVals>::types())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", type_list(&self.params), type_list(&self.results))
    }
}

/// One registered import.
#[derive(Clone)]
pub(crate) struct Import {
    pub(crate) sig: Signature,
    pub(crate) func: HostFunc,
}

pub(crate) type ImportMap = HashMap<String, HashMap<String, Import>>;

/// Outcome of checking a module against a linker.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkReport {
    pub resolved: Vec<String>,
    pub problems: Vec<BridgeError>,
}

impl LinkReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// A named import registry that resolves a module's imports.
///
/// # Examples
///
/// ```ignore
/// let mut linker = Linker::with_intrinsics(BridgeConfig::default());
/// linker.func_wrap("wbg", "answer", |_bridge, (): ()| Ok((42i32,)));
/// let bridge = linker.instantiate(guest)?;
/// ```
pub struct Linker {
    config: BridgeConfig,
    imports: ImportMap,
}

impl Default for Linker {
    fn default() -> Self {
        Linker::new(BridgeConfig::default())
    }
}

impl Linker {
    /// Create an empty linker.
    pub fn new(config: BridgeConfig) -> Self {
        Linker {
            config,
            imports: HashMap::new(),
        }
    }

    /// Create a linker with the built-in `__wbindgen_*` functions registered.
    pub fn with_intrinsics(config: BridgeConfig) -> Self {
        let mut linker = Linker::new(config);
        crate::intrinsics::register(&mut linker);
        linker
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The configured import module name.
    pub fn import_module(&self) -> &str {
        &self.config.import_module
    }

    /// Register an untyped host function.
    pub fn func(
        &mut self,
        module: &str,
        name: &str,
        sig: Signature,
        f: impl Fn(&Bridge, &[Val]) -> Result<Vec<Val>, HostError> + 'static,
    ) -> &mut Self {
        self.imports.entry(module.to_string()).or_default().insert(
            name.to_string(),
            Import {
                sig,
                func: Rc::new(f),
            },
        );
        self
    }

    /// Register a typed host function. Parameters and results convert
    /// through the tuple traits in [`crate::value`].
    pub fn func_wrap<P, R>(
        &mut self,
        module: &str,
        name: &str,
        f: impl Fn(&Bridge, P) -> Result<R, HostError> + 'static,
    ) -> &mut Self
    where
        P: FromVals + 'static,
        R: IntoVals + 'static,
    {
        self.func(module, name, Signature::of::<P, R>(), move |bridge, args| {
            let params = P::from_vals(args)?;
            Ok(f(bridge, params)?.to_vals())
        })
    }

    /// Register a typed host function under the error bridge.
    ///
    /// A host exception is captured into the bridge's error slot and the
    /// module sees the zero value for every declared result. Contract
    /// violations still propagate.
    pub fn fallible<P, R>(
        &mut self,
        module: &str,
        name: &str,
        f: impl Fn(&Bridge, P) -> Result<R, HostError> + 'static,
    ) -> &mut Self
    where
        P: FromVals + 'static,
        R: IntoVals + 'static,
    {
        let zeros: Vec<Val> = <R as IntoVals>::types().into_iter().map(Val::zero_for).collect();
        self.func(module, name, Signature::of::<P, R>(), move |bridge, args| {
            let params = P::from_vals(args)?;
            match f(bridge, params) {
                Ok(results) => Ok(results.to_vals()),
                Err(HostError::Thrown(exn)) => {
                    bridge.capture(exn);
                    Ok(zeros.clone())
                }
                Err(err @ HostError::Bridge(_)) => Err(err),
            }
        })
    }

    /// Register a closure constructor `name(a, b, _) -> handle` in the
    /// import module. The returned handle owns a trampoline that invokes
    /// `adapter` and releases through destructor `dtor`.
    pub fn closure_wrapper(&mut self, name: &str, dtor: u32, adapter: u32, abi: ClosureAbi) -> &mut Self {
        let module = self.config.import_module.clone();
        self.func_wrap(&module, name, move |bridge, (a, b, _unused): (u32, u32, i32)| {
            let func = bridge.make_closure(a, b, dtor, adapter, abi.clone());
            Ok((bridge.add_object(func.into()),))
        })
    }

    /// Check whether an import is already registered.
    pub fn has(&self, module: &str, name: &str) -> bool {
        self.get(module, name).is_some()
    }

    pub(crate) fn get(&self, module: &str, name: &str) -> Option<&Import> {
        self.imports.get(module)?.get(name)
    }

    /// Signatures of every registered import, sorted by module then name.
    pub fn registered(&self) -> Vec<(String, String, Signature)> {
        let mut out: Vec<_> = self
            .imports
            .iter()
            .flat_map(|(module, funcs)| {
                funcs
                    .iter()
                    .map(move |(name, import)| (module.clone(), name.clone(), import.sig.clone()))
            })
            .collect();
        out.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        out
    }

    /// Validate a parsed module against this linker without stopping at
    /// the first problem.
    ///
    /// 1. Every function import from the configured import module must be
    ///    registered with an identical signature. Imports from other
    ///    modules are left to the embedder.
    /// 2. The memory and allocator exports must exist with the right kind.
    /// 3. The start and destructor-table exports, when present, must be a
    ///    function and a table.
    pub fn report(&self, interface: &GuestInterface) -> LinkReport {
        let mut report = LinkReport::default();
        for import in interface.imports_from(&self.config.import_module) {
            match self.get(&import.module, &import.name) {
                None => report.problems.push(BridgeError::UnknownImport {
                    module: import.module.clone(),
                    name: import.name.clone(),
                }),
                Some(found) if found.sig != import.sig => {
                    report.problems.push(BridgeError::SignatureMismatch {
                        import: format!("{}.{}", import.module, import.name),
                        expected: import.sig.to_string(),
                        found: found.sig.to_string(),
                    })
                }
                Some(_) => report.resolved.push(format!("{}.{}", import.module, import.name)),
            }
        }

        let mut check_export = |name: &str, want: &str, required: bool| {
            match interface.export(name) {
                Some(kind) if kind.describe() == want => {}
                Some(kind) => report.problems.push(BridgeError::Link(format!(
                    "export {name} is a {}, expected a {want}",
                    kind.describe()
                ))),
                None if required => {
                    report.problems.push(BridgeError::Link(format!("missing {want} export {name}")))
                }
                None => {}
            }
        };
        check_export(&self.config.memory_export, "memory", true);
        for name in self.config.required_funcs() {
            check_export(name, "func", true);
        }
        check_export(&self.config.start_export, "func", false);
        check_export(&self.config.destructor_table_export, "table", false);
        report
    }

    /// Validate a parsed module against this linker.
    pub fn check(&self, interface: &GuestInterface) -> Result<(), BridgeError> {
        let report = self.report(interface);
        match report.problems.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Link `guest` against the registered imports.
    pub fn instantiate(&self, guest: Rc<dyn Guest>) -> Bridge {
        debug!(
            import_module = %self.config.import_module,
            imports = self.imports.values().map(HashMap::len).sum::<usize>(),
            "linking module"
        );
        Bridge::new(self.config.clone(), guest, self.imports.clone())
    }
}
