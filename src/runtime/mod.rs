//! Host runtime for Adblock Plus filter scripts.
//!
//! The runtime is built from a few threading primitives (see [`executor`])
//! and a script engine host ([`engine`]) that serializes all script access on
//! one re-entrant lane. A [`Platform`] ties them together: it owns the timer,
//! file system and web request services, and constructs the script engine,
//! the filter engine and the updater lazily and exactly once.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod file_system;
pub mod filter_engine;
pub mod js_value;
pub mod platform;
pub mod services;
pub mod updater;
pub mod weak_values;
pub mod web_request;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use backend::{NativeFunction, ScriptBackend};
pub use config::{AppInfo, PlatformConfig};
pub use engine::{EventCallback, JsEngine, WeakJsEngine};
pub use error::{EngineError, ExecutorError, PlatformError, ScriptError, WeakValuesError};
pub use filter_engine::{FilterEngine, FilterEngineParams};
pub use js_value::JsValue;
pub use platform::{BackendFactory, Platform, PlatformBuilder};
pub use updater::Updater;
pub use weak_values::{WeakValueRegistry, WeakValuesId};
