//! `console.log` / `console.error` for the module.
//!
//! Message spans are module-allocated and handed to the host, so the host
//! frees them after reading, whether or not they decoded.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{error, info};

use crate::bridge::Bridge;
use crate::error::HostError;
use crate::linker::Linker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Log,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub level: Level,
    pub text: String,
}

/// Records every line the module prints.
#[derive(Debug, Clone, Default)]
pub struct Console {
    lines: Rc<RefCell<Vec<ConsoleLine>>>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `console_log` and `console_error` in the import module.
    pub fn register(&self, linker: &mut Linker) {
        let m = linker.import_module().to_string();
        for (name, level) in [("console_log", Level::Log), ("console_error", Level::Error)] {
            let console = self.clone();
            linker.func_wrap(&m, name, move |bridge, (ptr, len): (u32, u32)| {
                console.print(bridge, level, ptr, len)
            });
        }
    }

    fn print(&self, bridge: &Bridge, level: Level, ptr: u32, len: u32) -> Result<(), HostError> {
        let text = bridge.read_str(ptr, len);
        bridge.free(ptr, len)?;
        let text = text?;
        match level {
            Level::Log => info!(target: "console", "{text}"),
            Level::Error => error!(target: "console", "{text}"),
        }
        self.lines.borrow_mut().push(ConsoleLine { level, text });
        Ok(())
    }

    pub fn lines(&self) -> Vec<ConsoleLine> {
        self.lines.borrow().clone()
    }

    /// Lines printed at `level`, text only.
    pub fn texts(&self, level: Level) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter(|line| line.level == level)
            .map(|line| line.text.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.lines.borrow_mut().clear();
    }
}
