//! Script engine host.
//!
//! A [`JsEngine`] owns one [`ScriptBackend`] behind a re-entrant execution
//! lane: only one thread runs script at a time, while natives invoked by the
//! script may call back into the engine on the same thread. Callers that need
//! several operations to run without interleaving hold [`JsEngine::lock`].
//!
//! Host natives and asynchronous completions never hold the engine strongly.
//! They capture a [`WeakJsEngine`] and carry script values through the
//! engine's [`WeakValueRegistry`], so a completion arriving after teardown is
//! a no-op.

pub mod bindings;
mod globals;

use crate::runtime::backend::{NativeFunction, ScriptBackend};
use crate::runtime::config::AppInfo;
use crate::runtime::error::{EngineError, ScriptError, WeakValuesError};
use crate::runtime::js_value::JsValue;
use crate::runtime::services::PlatformServices;
use crate::runtime::weak_values::{WeakValueRegistry, WeakValuesId};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Host callback for an event triggered from script via `_triggerEvent`.
pub type EventCallback = Arc<dyn Fn(Vec<JsValue>) + Send + Sync>;

struct EngineShared {
    lane: ReentrantMutex<Box<dyn ScriptBackend>>,
    weak_values: WeakValueRegistry,
    events: Mutex<HashMap<String, EventCallback>>,
    services: Arc<PlatformServices>,
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        let leaked = self.weak_values.invalidate();
        if leaked > 0 {
            tracing::warn!(leaked, "script engine torn down with weak values still parked");
        }
    }
}

/// Shared handle to a script engine.
#[derive(Clone)]
pub struct JsEngine {
    shared: Arc<EngineShared>,
}

/// Non-owning handle to a script engine.
#[derive(Clone)]
pub struct WeakJsEngine {
    shared: Weak<EngineShared>,
}

/// Exclusive hold on the execution lane.
///
/// While a guard is alive other threads block on every engine operation;
/// the holding thread may keep using the engine.
pub struct LaneGuard<'a> {
    _guard: ReentrantMutexGuard<'a, Box<dyn ScriptBackend>>,
}

impl JsEngine {
    /// Wrap `backend` and publish the host globals.
    pub fn new(
        backend: Box<dyn ScriptBackend>,
        app_info: &AppInfo,
        services: Arc<PlatformServices>,
    ) -> Result<Self, EngineError> {
        let engine = Self {
            shared: Arc::new(EngineShared {
                lane: ReentrantMutex::new(backend),
                weak_values: WeakValueRegistry::new(),
                events: Mutex::new(HashMap::new()),
                services,
            }),
        };
        globals::install(&engine, app_info)?;
        Ok(engine)
    }

    /// Hold the execution lane across several operations.
    pub fn lock(&self) -> LaneGuard<'_> {
        LaneGuard {
            _guard: self.shared.lane.lock(),
        }
    }

    fn backend(&self) -> ReentrantMutexGuard<'_, Box<dyn ScriptBackend>> {
        self.shared.lane.lock()
    }

    pub fn evaluate(&self, source: &str, filename: &str) -> Result<JsValue, EngineError> {
        tracing::trace!(filename, "evaluate");
        Ok(self.backend().evaluate(source, filename)?)
    }

    pub fn call(&self, function: &JsValue, args: Vec<JsValue>) -> Result<JsValue, EngineError> {
        if !function.is_function() {
            return Err(ScriptError::NotCallable.into());
        }
        Ok(self.backend().call(function, args)?)
    }

    pub fn set_global_property(&self, name: &str, value: JsValue) -> Result<(), EngineError> {
        Ok(self.backend().set_global(name, value)?)
    }

    pub fn global_property(&self, name: &str) -> Result<JsValue, EngineError> {
        Ok(self.backend().global(name)?)
    }

    /// Expose a host closure to script.
    ///
    /// The closure receives a live engine handle; if the engine is gone by
    /// the time script calls it, the call fails with
    /// [`ScriptError::EngineGone`].
    pub fn new_callback<F>(&self, callback: F) -> Result<JsValue, EngineError>
    where
        F: Fn(&JsEngine, Vec<JsValue>) -> Result<JsValue, ScriptError> + Send + Sync + 'static,
    {
        let native = self.bind_native(callback);
        Ok(self.backend().register_native(native)?)
    }

    pub(crate) fn bind_native<F>(&self, callback: F) -> NativeFunction
    where
        F: Fn(&JsEngine, Vec<JsValue>) -> Result<JsValue, ScriptError> + Send + Sync + 'static,
    {
        let weak = self.downgrade();
        Arc::new(move |args| match weak.upgrade() {
            Some(engine) => callback(&engine, args),
            None => Err(ScriptError::EngineGone),
        })
    }

    pub(crate) fn register_native(&self, native: NativeFunction) -> Result<JsValue, EngineError> {
        Ok(self.backend().register_native(native)?)
    }

    /// Tell the backend the host no longer references `function`.
    pub fn release_function(&self, function: &JsValue) -> Result<(), EngineError> {
        match function.function_id() {
            Some(id) => Ok(self.backend().release_function(id)?),
            None => Ok(()),
        }
    }

    pub fn set_event_callback(&self, name: &str, callback: EventCallback) {
        self.shared
            .events
            .lock()
            .insert(name.to_string(), callback);
    }

    pub fn remove_event_callback(&self, name: &str) {
        self.shared.events.lock().remove(name);
    }

    /// Invoke the callback registered for `name`.
    ///
    /// Returns `false` if nothing is registered. The callback runs outside
    /// the event table lock, so it may change registrations.
    pub fn trigger_event(&self, name: &str, params: Vec<JsValue>) -> bool {
        let callback = self.shared.events.lock().get(name).cloned();
        match callback {
            Some(callback) => {
                callback(params);
                true
            }
            None => {
                tracing::trace!(event = name, "no callback registered");
                false
            }
        }
    }

    pub fn store_values(&self, values: Vec<JsValue>) -> Result<WeakValuesId, EngineError> {
        Ok(self.shared.weak_values.store(values)?)
    }

    pub fn take_values(&self, id: WeakValuesId) -> Result<Vec<JsValue>, EngineError> {
        Ok(self.shared.weak_values.take(id)?)
    }

    pub fn peek_values(&self, id: WeakValuesId) -> Result<Vec<JsValue>, EngineError> {
        Ok(self.shared.weak_values.peek(id)?)
    }

    /// Number of weak value slots still parked.
    pub fn parked_values(&self) -> usize {
        self.shared.weak_values.len()
    }

    pub fn downgrade(&self) -> WeakJsEngine {
        WeakJsEngine {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn gc(&self) {
        self.backend().collect_garbage();
    }

    pub fn notify_low_memory(&self) {
        self.backend().memory_pressure();
    }

    pub(crate) fn services(&self) -> &PlatformServices {
        &self.shared.services
    }

    /// True when both handles refer to the same engine.
    pub fn ptr_eq(&self, other: &JsEngine) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl WeakJsEngine {
    pub fn upgrade(&self) -> Option<JsEngine> {
        self.shared.upgrade().map(|shared| JsEngine { shared })
    }

    /// Take parked values, treating a torn-down engine like an invalidated
    /// registry.
    pub fn take_values(&self, id: WeakValuesId) -> Result<Vec<JsValue>, EngineError> {
        match self.upgrade() {
            Some(engine) => engine.take_values(id),
            None => Err(WeakValuesError::Invalidated.into()),
        }
    }

    pub fn peek_values(&self, id: WeakValuesId) -> Result<Vec<JsValue>, EngineError> {
        match self.upgrade() {
            Some(engine) => engine.peek_values(id),
            None => Err(WeakValuesError::Invalidated.into()),
        }
    }
}
