//! The host side of the boundary: its value model and the capabilities
//! it exposes to the module.

pub mod console;
pub mod timers;
mod value;

pub use console::{Console, ConsoleLine, Level};
pub use timers::Timers;
pub use value::{JsArray, JsFunction, JsObject, JsResult, JsValue};
