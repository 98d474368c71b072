//! Application update checks driven by the updater scripts.

use crate::runtime::engine::JsEngine;
use crate::runtime::error::{EngineError, PlatformError};
use crate::runtime::js_value::JsValue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const UPDATE_AVAILABLE_EVENT: &str = "updateAvailable";
const UPDATE_CHECK_DONE_PREFIX: &str = "_updateCheckDone";

/// Receives the download URL of an available update.
pub type UpdateAvailableCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives the outcome of a forced update check: `None` on success, the
/// script's error message otherwise.
pub type UpdateCheckDoneCallback = Box<dyn FnOnce(Option<String>) + Send>;

struct UpdaterInner {
    engine: JsEngine,
    update_check_id: AtomicU64,
}

/// Handle to the updater scripts running on a [`JsEngine`].
#[derive(Clone)]
pub struct Updater {
    inner: Arc<UpdaterInner>,
}

impl Updater {
    /// Load the updater `scripts` through `evaluate` with the lane held.
    pub fn new<E>(engine: &JsEngine, evaluate: E, scripts: &[String]) -> Result<Self, PlatformError>
    where
        E: Fn(&str) -> Result<(), PlatformError>,
    {
        {
            let _lane = engine.lock();
            for script in scripts {
                evaluate(script)?;
            }
        }
        tracing::debug!(scripts = scripts.len(), "updater loaded");
        Ok(Self {
            inner: Arc::new(UpdaterInner {
                engine: engine.clone(),
                update_check_id: AtomicU64::new(0),
            }),
        })
    }

    pub fn js_engine(&self) -> &JsEngine {
        &self.inner.engine
    }

    /// True when both handles refer to the same updater.
    pub fn ptr_eq(&self, other: &Updater) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn set_update_available_callback(&self, callback: UpdateAvailableCallback) {
        self.inner.engine.set_event_callback(
            UPDATE_AVAILABLE_EVENT,
            Arc::new(move |params: Vec<JsValue>| {
                if let Some(url) = params.first().and_then(JsValue::as_str) {
                    callback(url);
                }
            }),
        );
    }

    pub fn remove_update_available_callback(&self) {
        self.inner.engine.remove_event_callback(UPDATE_AVAILABLE_EVENT);
    }

    /// Ask the scripts to check for updates now.
    ///
    /// When `callback` is given, a one-off event is registered and its name
    /// passed to the script, which triggers it once the check is done.
    pub fn force_update_check(
        &self,
        callback: Option<UpdateCheckDoneCallback>,
    ) -> Result<(), EngineError> {
        let engine = &self.inner.engine;
        let _lane = engine.lock();
        let function = engine.evaluate("API_UPDATER.forceUpdateCheck", "updater")?;

        let mut args = Vec::new();
        if let Some(callback) = callback {
            let id = self.inner.update_check_id.fetch_add(1, Ordering::SeqCst) + 1;
            let event_name = format!("{}{}", UPDATE_CHECK_DONE_PREFIX, id);
            let pending = Mutex::new(Some(callback));
            let weak = engine.downgrade();
            let name = event_name.clone();
            engine.set_event_callback(
                &event_name,
                Arc::new(move |params: Vec<JsValue>| {
                    let error = params.first().and_then(JsValue::as_str).map(str::to_string);
                    if let Some(callback) = pending.lock().take() {
                        callback(error);
                    }
                    if let Some(engine) = weak.upgrade() {
                        engine.remove_event_callback(&name);
                    }
                }),
            );
            args.push(JsValue::from(event_name));
        }

        engine.call(&function, args)?;
        Ok(())
    }

    pub fn pref(&self, name: &str) -> Result<JsValue, EngineError> {
        let engine = &self.inner.engine;
        let _lane = engine.lock();
        let function = engine.evaluate("API_UPDATER.getPref", "updater")?;
        engine.call(&function, vec![JsValue::from(name)])
    }

    pub fn set_pref(&self, name: &str, value: JsValue) -> Result<(), EngineError> {
        let engine = &self.inner.engine;
        let _lane = engine.lock();
        let function = engine.evaluate("API_UPDATER.setPref", "updater")?;
        engine.call(&function, vec![JsValue::from(name), value])?;
        Ok(())
    }
}
