//! Filter engine bootstrap and handle.
//!
//! The filter scripts announce readiness by triggering `_init(firstRun)`.
//! Until then the engine only holds weak references to the host, so an
//! abandoned bootstrap leaves nothing alive.

use crate::runtime::engine::{JsEngine, WeakJsEngine};
use crate::runtime::error::{EngineError, PlatformError};
use crate::runtime::js_value::JsValue;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const INIT_EVENT: &str = "_init";
const FILTER_CHANGE_EVENT: &str = "filterChange";
const DOWNLOAD_ALLOWED_EVENT: &str = "_isSubscriptionDownloadAllowed";

/// Answer to a subscription download query.
pub type DownloadAllowedResponse = Box<dyn FnOnce(bool) + Send>;

/// Decides whether subscriptions may be downloaded over the connection type
/// the script reports (`None` when no preference is set). May answer later
/// from any thread.
pub type DownloadAllowedCallback =
    Arc<dyn Fn(Option<String>, DownloadAllowedResponse) + Send + Sync>;

/// Receives `(action, item)` for every filter change.
pub type FilterChangeCallback = Arc<dyn Fn(&str, JsValue) + Send + Sync>;

/// Receives the outcome of a filter engine bootstrap.
pub type OnCreated = Box<dyn FnOnce(Result<FilterEngine, PlatformError>) + Send>;

/// Parameters for bringing up a filter engine.
#[derive(Clone, Default)]
pub struct FilterEngineParams {
    /// Published to script as `_preconfiguredPrefs`.
    pub preconfigured_prefs: IndexMap<String, JsValue>,
    /// When unset, every download is allowed.
    pub is_subscription_download_allowed: Option<DownloadAllowedCallback>,
}

impl FilterEngineParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pref(mut self, name: impl Into<String>, value: impl Into<JsValue>) -> Self {
        self.preconfigured_prefs.insert(name.into(), value.into());
        self
    }

    pub fn with_download_allowed_callback(mut self, callback: DownloadAllowedCallback) -> Self {
        self.is_subscription_download_allowed = Some(callback);
        self
    }
}

struct FilterEngineInner {
    engine: JsEngine,
    first_run: bool,
}

/// Handle to a filter engine running on a [`JsEngine`].
#[derive(Clone)]
pub struct FilterEngine {
    inner: Arc<FilterEngineInner>,
}

impl fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterEngine")
            .field("first_run", &self.inner.first_run)
            .finish_non_exhaustive()
    }
}

/// One-shot completion shared by the `_init` handler, the script loader and
/// the init timeout. The first outcome wins.
#[derive(Clone)]
struct Completion {
    on_created: Arc<Mutex<Option<OnCreated>>>,
}

impl Completion {
    fn new(on_created: OnCreated) -> Self {
        Self {
            on_created: Arc::new(Mutex::new(Some(on_created))),
        }
    }

    fn complete(&self, result: Result<FilterEngine, PlatformError>) -> bool {
        let on_created = self.on_created.lock().take();
        match on_created {
            Some(on_created) => {
                on_created(result);
                true
            }
            None => false,
        }
    }

    fn is_pending(&self) -> bool {
        self.on_created.lock().is_some()
    }
}

impl FilterEngine {
    /// Bring up a filter engine on `engine`.
    ///
    /// `evaluate` loads one script by filename. Scripts are loaded with the
    /// execution lane held, so no timer or I/O completion interleaves with
    /// them. `on_created` runs exactly once: when the scripts trigger
    /// `_init`, when loading fails, or when `init_timeout` elapses first.
    pub fn create_async<E>(
        engine: &JsEngine,
        evaluate: E,
        scripts: &[String],
        params: FilterEngineParams,
        init_timeout: Option<Duration>,
        on_created: OnCreated,
    ) where
        E: Fn(&str) -> Result<(), PlatformError>,
    {
        let completion = Completion::new(on_created);

        install_download_allowed(engine, params.is_subscription_download_allowed);
        install_init(engine, completion.clone());

        let weak = engine.downgrade();
        set_filter_change(
            engine,
            Arc::new(move |action: &str, _item: JsValue| {
                if action == "save" {
                    if let Some(engine) = weak.upgrade() {
                        engine.notify_low_memory();
                    }
                }
            }),
        );

        let loaded = {
            let _lane = engine.lock();
            load_scripts(engine, &evaluate, scripts, params.preconfigured_prefs)
        };
        if let Err(err) = loaded {
            tracing::error!(error = %err, "filter engine scripts failed to load");
            engine.remove_event_callback(INIT_EVENT);
            completion.complete(Err(err));
            return;
        }

        if let Some(timeout) = init_timeout {
            if completion.is_pending() {
                arm_init_timeout(engine, completion, timeout);
            }
        }
    }

    pub fn is_first_run(&self) -> bool {
        self.inner.first_run
    }

    pub fn js_engine(&self) -> &JsEngine {
        &self.inner.engine
    }

    /// Resolve `function_name` in script and call it with `args`.
    pub fn call(&self, function_name: &str, args: Vec<JsValue>) -> Result<JsValue, EngineError> {
        let engine = &self.inner.engine;
        let _lane = engine.lock();
        let function = engine.evaluate(function_name, function_name)?;
        engine.call(&function, args)
    }

    /// Replace the `filterChange` handler.
    pub fn set_filter_change_callback(&self, callback: FilterChangeCallback) {
        set_filter_change(&self.inner.engine, callback);
    }

    pub fn remove_filter_change_callback(&self) {
        self.inner.engine.remove_event_callback(FILTER_CHANGE_EVENT);
    }

    /// True when both handles refer to the same filter engine.
    pub fn ptr_eq(&self, other: &FilterEngine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn load_scripts<E>(
    engine: &JsEngine,
    evaluate: &E,
    scripts: &[String],
    prefs: IndexMap<String, JsValue>,
) -> Result<(), PlatformError>
where
    E: Fn(&str) -> Result<(), PlatformError>,
{
    engine.set_global_property("_preconfiguredPrefs", JsValue::Object(prefs))?;
    for script in scripts {
        evaluate(script)?;
    }
    Ok(())
}

fn install_init(engine: &JsEngine, completion: Completion) {
    let weak = engine.downgrade();
    engine.set_event_callback(
        INIT_EVENT,
        Arc::new(move |params: Vec<JsValue>| {
            let Some(engine) = weak.upgrade() else {
                return;
            };
            let first_run = params.first().and_then(JsValue::as_bool).unwrap_or(false);
            let filter_engine = FilterEngine {
                inner: Arc::new(FilterEngineInner {
                    engine: engine.clone(),
                    first_run,
                }),
            };
            if completion.complete(Ok(filter_engine)) {
                tracing::debug!(first_run, "filter engine initialized");
            }
            engine.remove_event_callback(INIT_EVENT);
        }),
    );
}

fn arm_init_timeout(engine: &JsEngine, completion: Completion, timeout: Duration) {
    let weak = engine.downgrade();
    let armed = engine.services().with_timer(|timer| {
        timer.set_timer(
            timeout,
            Box::new(move || {
                if !completion.is_pending() {
                    return;
                }
                if let Some(engine) = weak.upgrade() {
                    engine.remove_event_callback(INIT_EVENT);
                }
                if completion.complete(Err(PlatformError::InitTimeout(timeout))) {
                    tracing::warn!(?timeout, "filter engine did not initialize in time");
                }
            }),
        );
    });
    if !armed {
        tracing::debug!("no timer available, init timeout not armed");
    }
}

fn set_filter_change(engine: &JsEngine, callback: FilterChangeCallback) {
    engine.set_event_callback(
        FILTER_CHANGE_EVENT,
        Arc::new(move |params: Vec<JsValue>| {
            let mut params = params.into_iter();
            let action = params.next();
            let item = params.next().unwrap_or(JsValue::Null);
            match action.as_ref().and_then(JsValue::as_str) {
                Some(action) => callback(action, item),
                None => tracing::debug!("filterChange without an action"),
            }
        }),
    );
}

fn install_download_allowed(engine: &JsEngine, allowed: Option<DownloadAllowedCallback>) {
    let weak = engine.downgrade();
    engine.set_event_callback(
        DOWNLOAD_ALLOWED_EVENT,
        Arc::new(move |params: Vec<JsValue>| {
            let Some(engine) = weak.upgrade() else {
                return;
            };
            // [connection type or null, function(allowed)]
            let valid = params.len() == 2
                && (params[0].is_null() || params[0].as_str().is_some())
                && params[1].is_function();
            if !valid {
                tracing::warn!("{} expects a connection type and a callback", DOWNLOAD_ALLOWED_EVENT);
                return;
            }

            let Some(allowed) = allowed.as_ref() else {
                if let Err(err) = engine.call(&params[1], vec![JsValue::Bool(true)]) {
                    tracing::warn!(error = %err, "download permission callback failed");
                }
                return;
            };

            let connection_type = params[0].as_str().map(str::to_string);
            let id = match engine.store_values(params) {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(error = %err, "cannot park download permission callback");
                    return;
                }
            };
            let weak: WeakJsEngine = engine.downgrade();
            allowed(
                connection_type,
                Box::new(move |is_allowed: bool| {
                    let Some(engine) = weak.upgrade() else {
                        return;
                    };
                    let callback = match engine.take_values(id) {
                        Ok(mut values) if values.len() == 2 => values.swap_remove(1),
                        Ok(_) => return,
                        Err(err) => {
                            tracing::debug!(error = %err, "download permission answered too late");
                            return;
                        }
                    };
                    if let Err(err) = engine.call(&callback, vec![JsValue::Bool(is_allowed)]) {
                        tracing::warn!(error = %err, "download permission callback failed");
                    }
                }),
            );
        }),
    );
}
