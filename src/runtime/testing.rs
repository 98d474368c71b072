//! In-process script backend for tests.
//!
//! "Scripts" are Rust closures registered under their source text. They see
//! the backend's globals and can create and call functions, which is enough
//! to drive the host natives the way filter scripts do.

use crate::runtime::backend::{NativeFunction, ScriptBackend};
use crate::runtime::error::ScriptError;
use crate::runtime::js_value::JsValue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) type ScriptBody =
    Arc<dyn Fn(&ScriptedBackend, Vec<JsValue>) -> Result<JsValue, ScriptError> + Send + Sync>;

#[derive(Clone)]
enum Callable {
    Native(NativeFunction),
    Script(ScriptBody),
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    scripts: Mutex<HashMap<String, ScriptBody>>,
    globals: Mutex<HashMap<String, JsValue>>,
    functions: Mutex<HashMap<u32, Callable>>,
    next_function: AtomicU32,
    pub(crate) gc_requests: AtomicUsize,
    pub(crate) memory_warnings: AtomicUsize,
    pub(crate) evaluated: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register the behavior of `source`.
    pub(crate) fn define_script<F>(&self, source: &str, body: F)
    where
        F: Fn(&ScriptedBackend, Vec<JsValue>) -> Result<JsValue, ScriptError> + Send + Sync + 'static,
    {
        self.scripts.lock().insert(source.to_string(), Arc::new(body));
    }

    /// Create a script-side function.
    pub(crate) fn function<F>(&self, body: F) -> JsValue
    where
        F: Fn(&ScriptedBackend, Vec<JsValue>) -> Result<JsValue, ScriptError> + Send + Sync + 'static,
    {
        self.add_callable(Callable::Script(Arc::new(body)))
    }

    fn add_callable(&self, callable: Callable) -> JsValue {
        let id = self.next_function.fetch_add(1, Ordering::SeqCst);
        self.functions.lock().insert(id, callable);
        JsValue::Function { id }
    }

    pub(crate) fn call_global(&self, name: &str, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
        let function = self.global(name)?;
        self.call(&function, args)
    }

    /// Call `object.method(...args)` on a global object.
    pub(crate) fn call_method(
        &self,
        object: &str,
        method: &str,
        args: Vec<JsValue>,
    ) -> Result<JsValue, ScriptError> {
        let function = self
            .global(object)?
            .get(method)
            .cloned()
            .ok_or_else(|| ScriptError::Native(format!("{}.{} is not defined", object, method)))?;
        self.call(&function, args)
    }

    pub(crate) fn live_functions(&self) -> usize {
        self.functions.lock().len()
    }
}

impl ScriptBackend for ScriptedBackend {
    fn evaluate(&self, source: &str, filename: &str) -> Result<JsValue, ScriptError> {
        let body = self.scripts.lock().get(source).cloned();
        self.evaluated.lock().push(filename.to_string());
        match body {
            Some(body) => body(self, Vec::new()),
            None => Err(ScriptError::exception(
                filename,
                format!("SyntaxError: unknown script {:?}", source),
            )),
        }
    }

    fn call(&self, function: &JsValue, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
        let id = function.function_id().ok_or(ScriptError::NotCallable)?;
        let callable = self
            .functions
            .lock()
            .get(&id)
            .cloned()
            .ok_or(ScriptError::UnknownFunction(id))?;
        match callable {
            Callable::Native(native) => native(args),
            Callable::Script(body) => body(self, args),
        }
    }

    fn register_native(&self, native: NativeFunction) -> Result<JsValue, ScriptError> {
        Ok(self.add_callable(Callable::Native(native)))
    }

    fn set_global(&self, name: &str, value: JsValue) -> Result<(), ScriptError> {
        self.globals.lock().insert(name.to_string(), value);
        Ok(())
    }

    fn global(&self, name: &str) -> Result<JsValue, ScriptError> {
        Ok(self.globals.lock().get(name).cloned().unwrap_or(JsValue::Null))
    }

    fn release_function(&self, id: u32) -> Result<(), ScriptError> {
        self.functions.lock().remove(&id);
        Ok(())
    }

    fn collect_garbage(&self) {
        self.gc_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn memory_pressure(&self) {
        self.memory_warnings.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScriptBackend for Arc<ScriptedBackend> {
    fn evaluate(&self, source: &str, filename: &str) -> Result<JsValue, ScriptError> {
        self.as_ref().evaluate(source, filename)
    }

    fn call(&self, function: &JsValue, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
        self.as_ref().call(function, args)
    }

    fn register_native(&self, native: NativeFunction) -> Result<JsValue, ScriptError> {
        self.as_ref().register_native(native)
    }

    fn set_global(&self, name: &str, value: JsValue) -> Result<(), ScriptError> {
        self.as_ref().set_global(name, value)
    }

    fn global(&self, name: &str) -> Result<JsValue, ScriptError> {
        self.as_ref().global(name)
    }

    fn release_function(&self, id: u32) -> Result<(), ScriptError> {
        self.as_ref().release_function(id)
    }

    fn collect_garbage(&self) {
        self.as_ref().collect_garbage()
    }

    fn memory_pressure(&self) {
        self.as_ref().memory_pressure()
    }
}
