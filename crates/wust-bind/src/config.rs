//! Names and sizes the bridge links against.

/// Import module and export names for one linked module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Module name under which host functions are imported.
    pub import_module: String,
    pub malloc_export: String,
    pub realloc_export: String,
    pub free_export: String,
    pub start_export: String,
    pub memory_export: String,
    /// Table export holding closure destructors.
    pub destructor_table_export: String,
    /// Slots to reserve in the handle table up front.
    pub initial_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            import_module: "wbg".into(),
            malloc_export: "__wbindgen_malloc".into(),
            realloc_export: "__wbindgen_realloc".into(),
            free_export: "__wbindgen_free".into(),
            start_export: "__wbindgen_start".into(),
            memory_export: "memory".into(),
            destructor_table_export: "__wbindgen_export_2".into(),
            initial_capacity: 128,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_import_module(mut self, name: impl Into<String>) -> Self {
        self.import_module = name.into();
        self
    }

    pub fn with_allocator(
        mut self,
        malloc: impl Into<String>,
        realloc: impl Into<String>,
        free: impl Into<String>,
    ) -> Self {
        self.malloc_export = malloc.into();
        self.realloc_export = realloc.into();
        self.free_export = free.into();
        self
    }

    pub fn with_start(mut self, name: impl Into<String>) -> Self {
        self.start_export = name.into();
        self
    }

    pub fn with_memory(mut self, name: impl Into<String>) -> Self {
        self.memory_export = name.into();
        self
    }

    pub fn with_destructor_table(mut self, name: impl Into<String>) -> Self {
        self.destructor_table_export = name.into();
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Function exports the module must provide.
    pub fn required_funcs(&self) -> [&str; 3] {
        [
            self.malloc_export.as_str(),
            self.realloc_export.as_str(),
            self.free_export.as_str(),
        ]
    }
}
