//! abp-host
//!
//! Host layer for running Adblock Plus filter scripts: serialized execution
//! lanes, one-shot worker threads, a timer thread, weak value handles that
//! survive engine teardown safely, and lazy construction of the script and
//! filter engines.

pub mod runtime;

pub use runtime::executor::{ActiveObject, AsyncExecutor, SynchronizedTaskQueue, TimerThread};
pub use runtime::{
    AppInfo, FilterEngine, FilterEngineParams, JsEngine, JsValue, Platform, PlatformBuilder,
    PlatformConfig, PlatformError, ScriptBackend, Updater,
};
