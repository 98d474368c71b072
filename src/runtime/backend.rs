//! Interface to the script engine that runs the filter logic.
//!
//! The host never interprets script semantics itself. Everything it needs
//! from the engine goes through [`ScriptBackend`], and everything the engine
//! needs from the host is exposed as [`NativeFunction`]s.

use crate::runtime::error::ScriptError;
use crate::runtime::js_value::JsValue;
use std::sync::Arc;

/// Host function callable from script.
///
/// Handlers receive the call arguments and return the call result; an error
/// is raised as a script exception at the call site.
pub type NativeFunction = Arc<dyn Fn(Vec<JsValue>) -> Result<JsValue, ScriptError> + Send + Sync>;

/// Synchronous script execution context.
///
/// All calls are made from inside the engine's execution lane, one thread at a
/// time. Natives invoked by the backend may call back into it on the same
/// thread (for example a native calling a script callback during `evaluate`),
/// so implementations must not hold internal borrows across native calls.
pub trait ScriptBackend: Send {
    /// Run `source`, reporting errors against `filename`.
    fn evaluate(&self, source: &str, filename: &str) -> Result<JsValue, ScriptError>;

    /// Invoke a function value.
    fn call(&self, function: &JsValue, args: Vec<JsValue>) -> Result<JsValue, ScriptError>;

    /// Expose a host function and return the function value bound to it.
    fn register_native(&self, native: NativeFunction) -> Result<JsValue, ScriptError>;

    fn set_global(&self, name: &str, value: JsValue) -> Result<(), ScriptError>;

    fn global(&self, name: &str) -> Result<JsValue, ScriptError>;

    /// Forget a function handle the host no longer references.
    fn release_function(&self, _id: u32) -> Result<(), ScriptError> {
        Ok(())
    }

    /// Request a full garbage collection.
    fn collect_garbage(&self) {}

    /// Hint that the host is short on memory.
    fn memory_pressure(&self) {}
}
