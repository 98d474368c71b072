//! Platform: owns the host services and lazily constructs the engines.
//!
//! The script engine is built on first use and exactly once; a failure is
//! remembered. The filter engine is requested at most once as well: the first
//! request installs a shared future that every later caller awaits, whether
//! it comes through [`Platform::filter_engine_future`] or blocks in
//! [`Platform::filter_engine`]. The updater is built on first use; unlike
//! the script engine, a failed attempt is retried by the next caller.

use crate::runtime::backend::ScriptBackend;
use crate::runtime::config::PlatformConfig;
use crate::runtime::engine::JsEngine;
use crate::runtime::error::{EngineError, PlatformError, ScriptError};
use crate::runtime::executor::{OptionalAsyncExecutor, Scheduler, Timer, TimerThread};
use crate::runtime::file_system::{DefaultFileSystem, DefaultFileSystemSync, FileSystem};
use crate::runtime::filter_engine::{FilterEngine, FilterEngineParams, OnCreated};
use crate::runtime::services::PlatformServices;
use crate::runtime::updater::Updater;
use crate::runtime::web_request::{DefaultWebRequest, DummyWebRequest, WebRequest};
use futures::future::{BoxFuture, FutureExt, Shared};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Creates the script backend for the platform's engine.
pub type BackendFactory =
    Arc<dyn Fn() -> Result<Box<dyn ScriptBackend>, ScriptError> + Send + Sync>;

/// Resolves once the filter engine is ready or has failed for good.
pub type FilterEngineFuture = Shared<BoxFuture<'static, Result<FilterEngine, PlatformError>>>;

const EXECUTOR_NAME: &str = "abp-io";

/// Assembles a [`Platform`]. Services that are not supplied get defaults.
pub struct PlatformBuilder {
    config: PlatformConfig,
    executor: Arc<OptionalAsyncExecutor>,
    timer: Option<Arc<dyn Timer>>,
    file_system: Option<Arc<dyn FileSystem>>,
    web_request: Option<Arc<dyn WebRequest>>,
}

impl PlatformBuilder {
    pub fn new(config: PlatformConfig) -> Result<Self, PlatformError> {
        let executor = OptionalAsyncExecutor::new(EXECUTOR_NAME).map_err(EngineError::from)?;
        Ok(Self {
            config,
            executor: Arc::new(executor),
            timer: None,
            file_system: None,
            web_request: None,
        })
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = Some(file_system);
        self
    }

    pub fn with_web_request(mut self, web_request: Arc<dyn WebRequest>) -> Self {
        self.web_request = Some(web_request);
        self
    }

    /// Scheduler backed by the platform's executor.
    ///
    /// Work dispatched through it is drained when the platform shuts down;
    /// anything scheduled afterwards is dropped.
    pub fn default_scheduler(&self) -> Scheduler {
        self.executor.scheduler()
    }

    pub fn build(self, backend_factory: BackendFactory) -> Result<Platform, PlatformError> {
        let timer = match self.timer {
            Some(timer) => timer,
            None => Arc::new(TimerThread::new().map_err(EngineError::from)?),
        };
        let file_system = match self.file_system {
            Some(file_system) => file_system,
            None => {
                let base_path = self
                    .config
                    .base_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("."));
                Arc::new(DefaultFileSystem::new(
                    self.executor.scheduler(),
                    Arc::new(DefaultFileSystemSync::new(base_path)),
                ))
            }
        };
        let web_request = match self.web_request {
            Some(web_request) => web_request,
            None => Arc::new(DefaultWebRequest::new(
                self.executor.scheduler(),
                Arc::new(DummyWebRequest),
            )),
        };

        Ok(Platform {
            config: self.config,
            backend_factory,
            services: Arc::new(PlatformServices::new(
                Some(timer),
                Some(file_system),
                Some(web_request),
            )),
            executor: self.executor,
            js_engine: OnceCell::new(),
            filter_engine: Mutex::new(None),
            updater: OnceCell::new(),
            evaluated: Mutex::new(HashSet::new()),
        })
    }
}

/// Owner of the host services, the script engine and the filter engine.
///
/// Dropping the platform drains dispatched I/O, stops the timer (pending
/// timers never fire) and then releases the engines.
pub struct Platform {
    config: PlatformConfig,
    backend_factory: BackendFactory,
    services: Arc<PlatformServices>,
    executor: Arc<OptionalAsyncExecutor>,
    js_engine: OnceCell<Result<JsEngine, PlatformError>>,
    filter_engine: Mutex<Option<FilterEngineFuture>>,
    updater: OnceCell<Updater>,
    evaluated: Mutex<HashSet<String>>,
}

impl Platform {
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// The script engine, constructed on first call.
    pub fn js_engine(&self) -> Result<JsEngine, PlatformError> {
        self.js_engine
            .get_or_init(|| self.create_js_engine())
            .clone()
    }

    fn create_js_engine(&self) -> Result<JsEngine, PlatformError> {
        let backend = (self.backend_factory)().map_err(|err| {
            tracing::error!(error = %err, "failed to create script backend");
            err
        })?;
        let engine = JsEngine::new(backend, &self.config.app_info, self.services.clone())?;
        tracing::debug!("script engine created");
        Ok(engine)
    }

    /// Evaluate the configured script `filename`, at most once per platform.
    pub fn load_script(&self, filename: &str) -> Result<(), PlatformError> {
        let engine = self.js_engine()?;
        let _lane = engine.lock();
        if self.evaluated.lock().contains(filename) {
            return Ok(());
        }
        let source = self
            .config
            .js_sources
            .get(filename)
            .ok_or_else(|| PlatformError::UnknownScript(filename.to_string()))?;
        engine.evaluate(source, filename)?;
        self.evaluated.lock().insert(filename.to_string());
        Ok(())
    }

    /// Start building the filter engine.
    ///
    /// Only the first request has any effect; later ones, including their
    /// `on_created`, are ignored. `on_created` runs on the platform's
    /// executor.
    pub fn create_filter_engine_async(
        &self,
        params: FilterEngineParams,
        on_created: Option<OnCreated>,
    ) {
        self.start_filter_engine(params, on_created);
    }

    /// Future for the filter engine, starting construction with default
    /// parameters if nothing requested it yet. Never blocks.
    pub fn filter_engine_future(&self) -> FilterEngineFuture {
        self.start_filter_engine(FilterEngineParams::default(), None)
    }

    /// Block until the filter engine is ready.
    pub fn filter_engine(&self) -> Result<FilterEngine, PlatformError> {
        futures::executor::block_on(self.filter_engine_future())
    }

    /// The updater, loading its scripts on first call.
    pub fn updater(&self) -> Result<Updater, PlatformError> {
        let engine = self.js_engine()?;
        self.updater
            .get_or_try_init(|| {
                Updater::new(
                    &engine,
                    |filename: &str| self.load_script(filename),
                    &self.config.updater_scripts,
                )
            })
            .cloned()
    }

    fn start_filter_engine(
        &self,
        params: FilterEngineParams,
        on_created: Option<OnCreated>,
    ) -> FilterEngineFuture {
        let (future, sender) = {
            let mut slot = self.filter_engine.lock();
            if let Some(future) = slot.as_ref() {
                tracing::trace!("filter engine already requested");
                return future.clone();
            }
            let (sender, receiver) = oneshot::channel();
            let future = receiver
                .map(|received| received.unwrap_or_else(|_| Err(PlatformError::Abandoned)))
                .boxed()
                .shared();
            *slot = Some(future.clone());
            (future, sender)
        };

        let scheduler = self.executor.scheduler();
        let deliver: OnCreated = Box::new(move |result: Result<FilterEngine, PlatformError>| {
            let _ = sender.send(result.clone());
            if let Some(on_created) = on_created {
                scheduler(Box::new(move || on_created(result)));
            }
        });

        match self.js_engine() {
            Ok(engine) => FilterEngine::create_async(
                &engine,
                |filename: &str| self.load_script(filename),
                &self.config.filter_engine_scripts,
                params,
                self.config.filter_engine_init_timeout,
                deliver,
            ),
            Err(err) => deliver(Err(err)),
        }
        future
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        self.executor.invalidate();
        self.services.shutdown();
        tracing::debug!("platform shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::js_value::JsValue;
    use crate::runtime::testing::ScriptedBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const API_SOURCE: &str = "// filter api";

    fn factory(backend: &Arc<ScriptedBackend>, created: &Arc<AtomicUsize>) -> BackendFactory {
        let backend = backend.clone();
        let created = created.clone();
        Arc::new(move || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(backend.clone()) as Box<dyn ScriptBackend>)
        })
    }

    fn platform(config: PlatformConfig) -> (Platform, Arc<ScriptedBackend>, Arc<AtomicUsize>) {
        let backend = ScriptedBackend::new();
        let created = Arc::new(AtomicUsize::new(0));
        let platform = PlatformBuilder::new(config)
            .unwrap()
            .build(factory(&backend, &created))
            .unwrap();
        (platform, backend, created)
    }

    fn api_config() -> PlatformConfig {
        PlatformConfig::new().with_filter_engine_script("api.js", API_SOURCE)
    }

    fn define_api(backend: &ScriptedBackend, first_run: bool) {
        backend.define_script(API_SOURCE, move |script, _| {
            script.call_global("_triggerEvent", vec![JsValue::from("_init"), JsValue::Bool(first_run)])
        });
    }

    fn evaluations(backend: &ScriptedBackend, filename: &str) -> usize {
        backend.evaluated.lock().iter().filter(|f| *f == filename).count()
    }

    #[test]
    fn test_js_engine_created_once() {
        let (platform, _backend, created) = platform(PlatformConfig::new());
        let engines: Vec<JsEngine> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| platform.js_engine().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(engines.iter().all(|engine| engine.ptr_eq(&engines[0])));
    }

    #[test]
    fn test_js_engine_failure_is_sticky() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let failing: BackendFactory = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ScriptError::Native("backend unavailable".to_string()))
        });
        let platform = PlatformBuilder::new(PlatformConfig::new())
            .unwrap()
            .build(failing)
            .unwrap();

        assert!(platform.js_engine().is_err());
        assert!(platform.js_engine().is_err());
        assert!(platform.filter_engine().is_err());
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_script_evaluates_once() {
        let config = PlatformConfig::new().with_js_source("compat.js", "// compat");
        let (platform, backend, _created) = platform(config);
        backend.define_script("// compat", |_, _| Ok(JsValue::Null));

        platform.load_script("compat.js").unwrap();
        platform.load_script("compat.js").unwrap();
        assert_eq!(evaluations(&backend, "compat.js"), 1);

        assert_eq!(
            platform.load_script("missing.js"),
            Err(PlatformError::UnknownScript("missing.js".to_string()))
        );
    }

    #[test]
    fn test_load_script_retries_after_failure() {
        let config = PlatformConfig::new().with_js_source("flaky.js", "// flaky");
        let (platform, backend, _created) = platform(config);

        assert!(platform.load_script("flaky.js").is_err());
        backend.define_script("// flaky", |_, _| Ok(JsValue::Null));
        platform.load_script("flaky.js").unwrap();
        platform.load_script("flaky.js").unwrap();
        assert_eq!(evaluations(&backend, "flaky.js"), 2);
    }

    #[test]
    fn test_concurrent_filter_engine_is_one_instance() {
        let (platform, backend, _created) = platform(api_config());
        define_api(&backend, true);

        let engines: Vec<FilterEngine> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| platform.filter_engine().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(engines.iter().all(|engine| engine.ptr_eq(&engines[0])));
        assert!(engines[0].is_first_run());
        assert_eq!(evaluations(&backend, "api.js"), 1);
    }

    #[test]
    fn test_filter_engine_failure_propagates_without_retry() {
        let (platform, backend, _created) = platform(api_config());
        backend.define_script(API_SOURCE, |_, _| {
            Err(ScriptError::exception("api.js", "TypeError: boom"))
        });

        let first = platform.filter_engine().err().unwrap();
        let second = platform.filter_engine().err().unwrap();
        assert_eq!(first, second);
        assert_eq!(evaluations(&backend, "api.js"), 1);
    }

    #[tokio::test]
    async fn test_filter_engine_future() {
        let (platform, backend, _created) = platform(api_config());
        define_api(&backend, false);

        let filter_engine = platform.filter_engine_future().await.unwrap();
        assert!(!filter_engine.is_first_run());
        assert!(filter_engine.ptr_eq(&platform.filter_engine().unwrap()));
    }

    #[test]
    fn test_on_created_runs_on_executor_and_only_once() {
        let (platform, backend, _created) = platform(api_config());
        define_api(&backend, false);

        let (tx, rx) = mpsc::channel();
        let first_tx = tx.clone();
        platform.create_filter_engine_async(
            FilterEngineParams::new(),
            Some(Box::new(move |result: Result<FilterEngine, PlatformError>| {
                let _ = first_tx.send((thread::current().id(), result.is_ok()));
            })),
        );
        platform.create_filter_engine_async(
            FilterEngineParams::new(),
            Some(Box::new(move |result: Result<FilterEngine, PlatformError>| {
                let _ = tx.send((thread::current().id(), result.is_ok()));
            })),
        );

        let (thread_id, ok) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(ok);
        assert_ne!(thread_id, thread::current().id());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(evaluations(&backend, "api.js"), 1);
    }

    #[test]
    fn test_platform_dropped_from_on_created() {
        let (platform, backend, _created) = platform(api_config());
        define_api(&backend, false);

        let slot = Arc::new(Mutex::new(Some(platform)));
        let (tx, rx) = mpsc::channel();
        {
            let guard = slot.lock();
            let owner = slot.clone();
            guard.as_ref().unwrap().create_filter_engine_async(
                FilterEngineParams::new(),
                Some(Box::new(move |result: Result<FilterEngine, PlatformError>| {
                    let platform = owner.lock().take();
                    drop(platform);
                    let _ = tx.send(result.is_ok());
                })),
            );
        }

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        assert!(slot.lock().is_none());
    }

    #[test]
    fn test_unreachable_init_timeout_is_harmless() {
        let config = api_config().with_filter_engine_init_timeout(Duration::MAX);
        let (platform, backend, _created) = platform(config);
        define_api(&backend, true);

        assert!(platform.filter_engine().unwrap().is_first_run());
    }

    #[test]
    fn test_updater_created_once() {
        let config = PlatformConfig::new().with_updater_script("updater.js", "// updater");
        let (platform, backend, _created) = platform(config);
        backend.define_script("// updater", |_, _| Ok(JsValue::Null));

        let updaters: Vec<Updater> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| platform.updater().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(updaters.iter().all(|updater| updater.ptr_eq(&updaters[0])));
        assert!(updaters[0].js_engine().ptr_eq(&platform.js_engine().unwrap()));
        assert_eq!(evaluations(&backend, "updater.js"), 1);
    }

    #[test]
    fn test_updater_retries_after_failure() {
        let config = PlatformConfig::new().with_updater_script("updater.js", "// updater");
        let (platform, backend, _created) = platform(config);

        assert!(platform.updater().is_err());
        backend.define_script("// updater", |_, _| Ok(JsValue::Null));
        let updater = platform.updater().unwrap();
        assert!(updater.ptr_eq(&platform.updater().unwrap()));
        assert_eq!(evaluations(&backend, "updater.js"), 2);
    }

    #[test]
    fn test_preconfigured_prefs_reach_script() {
        let (platform, backend, _created) = platform(api_config());
        backend.define_script(API_SOURCE, |script, _| {
            let prefs = script.global("_preconfiguredPrefs")?;
            let first_run = prefs.get("suppress_first_run_page") == Some(&JsValue::Bool(true));
            script.call_global("_triggerEvent", vec![JsValue::from("_init"), JsValue::Bool(first_run)])
        });

        platform.create_filter_engine_async(
            FilterEngineParams::new().with_pref("suppress_first_run_page", true),
            None,
        );
        assert!(platform.filter_engine().unwrap().is_first_run());
    }

    #[test]
    fn test_teardown_releases_engine_and_abandons_timers() {
        let (platform, backend, _created) = platform(api_config());
        let fired = Arc::new(AtomicUsize::new(0));
        let late = {
            let fired = fired.clone();
            backend.function(move |_, _| {
                fired.fetch_add(1, Ordering::SeqCst);
                Ok(JsValue::Null)
            })
        };
        backend.define_script(API_SOURCE, move |script, _| {
            script.call_global("setTimeout", vec![late.clone(), JsValue::Int(60_000)])?;
            script.call_global("_triggerEvent", vec![JsValue::from("_init")])
        });

        let filter_engine = platform.filter_engine().unwrap();
        let weak = filter_engine.js_engine().downgrade();
        drop(filter_engine);
        drop(platform);

        assert!(weak.upgrade().is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_default_file_system_completes_on_executor() {
        let base = std::env::temp_dir().join(format!("abp-host-platform-{}", std::process::id()));
        std::fs::create_dir_all(&base).unwrap();
        let (platform, backend, _created) = platform(PlatformConfig::new().with_base_path(&base));

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let done = backend.function(move |_, args| {
            let _ = tx.lock().send(args);
            Ok(JsValue::Null)
        });
        backend.define_script("write", move |script, _| {
            script.call_method(
                "_fileSystem",
                "write",
                vec![JsValue::from("patterns.ini"), JsValue::from("[Subscription]"), done.clone()],
            )
        });

        platform.js_engine().unwrap().evaluate("write", "write.js").unwrap();
        let args = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(args, vec![JsValue::from("")]);
        assert_eq!(
            std::fs::read_to_string(base.join("patterns.ini")).unwrap(),
            "[Subscription]"
        );

        drop(platform);
        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn test_dummy_web_request_reports_failure() {
        let (platform, backend, _created) = platform(PlatformConfig::new());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let done = backend.function(move |_, args| {
            let _ = tx.lock().send(args);
            Ok(JsValue::Null)
        });
        backend.define_script("fetch", move |script, _| {
            script.call_method(
                "_webRequest",
                "GET",
                vec![JsValue::from("https://example.com/list.txt"), JsValue::Null, done.clone()],
            )
        });

        platform.js_engine().unwrap().evaluate("fetch", "fetch.js").unwrap();
        let args = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            args[0].get("status"),
            Some(&JsValue::Int(crate::runtime::web_request::NS_ERROR_FAILURE))
        );
    }
}
