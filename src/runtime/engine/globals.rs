//! Host globals every engine starts with.
//!
//! - `setTimeout(callback, delay, ...args)`
//! - `_triggerEvent(name, ...args)`
//! - `_fileSystem.{read, write, move, remove, stat}`
//! - `_webRequest.GET(url, headers, callback)`
//! - `console.{log, debug, info, warn, error, trace}`
//! - `_appInfo`
//!
//! Script callbacks handed to asynchronous natives are parked in the engine's
//! weak value registry and resumed through a [`WeakJsEngine`].

use super::bindings::BindingRegistry;
use super::{JsEngine, WeakJsEngine};
use crate::runtime::config::AppInfo;
use crate::runtime::error::{EngineError, ScriptError};
use crate::runtime::file_system::StatResult;
use crate::runtime::js_value::JsValue;
use crate::runtime::web_request::ServerResponse;
use crate::runtime::weak_values::WeakValuesId;
use std::time::Duration;

pub(super) fn install(engine: &JsEngine, app_info: &AppInfo) -> Result<(), EngineError> {
    let mut registry = BindingRegistry::new();
    let natives: [(&str, fn(&JsEngine, Vec<JsValue>) -> Result<JsValue, ScriptError>); 14] = [
        ("setTimeout", set_timeout),
        ("_triggerEvent", trigger_event),
        ("_fileSystem.read", fs_read),
        ("_fileSystem.write", fs_write),
        ("_fileSystem.move", fs_move),
        ("_fileSystem.remove", fs_remove),
        ("_fileSystem.stat", fs_stat),
        ("_webRequest.GET", web_get),
        ("console.log", |_, args| console("log", args)),
        ("console.debug", |_, args| console("debug", args)),
        ("console.info", |_, args| console("info", args)),
        ("console.warn", |_, args| console("warn", args)),
        ("console.error", |_, args| console("error", args)),
        ("console.trace", |_, args| console("trace", args)),
    ];
    for (name, native) in natives {
        registry.register(name, engine.bind_native(native))?;
    }
    registry.install(engine)?;

    let app_info = serde_json::to_value(app_info)
        .and_then(serde_json::from_value::<JsValue>)
        .map_err(|e| EngineError::InvalidArguments(format!("Failed to convert app info: {}", e)))?;
    engine.set_global_property("_appInfo", app_info)
}

fn check_arity(name: &str, args: &[JsValue], min: usize) -> Result<(), ScriptError> {
    if args.len() < min {
        return Err(ScriptError::Native(format!(
            "{} requires at least {} parameters",
            name, min
        )));
    }
    Ok(())
}

fn string_arg(name: &str, args: &[JsValue], index: usize) -> Result<String, ScriptError> {
    args.get(index)
        .and_then(JsValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ScriptError::Native(format!("Argument {} to {} must be a string", index + 1, name))
        })
}

fn function_arg(name: &str, args: &[JsValue], index: usize) -> Result<JsValue, ScriptError> {
    match args.get(index) {
        Some(value) if value.is_function() => Ok(value.clone()),
        _ => Err(ScriptError::Native(format!(
            "Argument {} to {} must be a function",
            index + 1,
            name
        ))),
    }
}

fn native_error(err: EngineError) -> ScriptError {
    match err {
        EngineError::Script(err) => err,
        other => ScriptError::Native(other.to_string()),
    }
}

/// Park `values` and return the handle needed to resume later.
fn park(engine: &JsEngine, values: Vec<JsValue>) -> Result<(WeakJsEngine, WeakValuesId), ScriptError> {
    let id = engine.store_values(values).map_err(native_error)?;
    Ok((engine.downgrade(), id))
}

/// Release a parked slot whose completion will never run.
fn discard(engine: &JsEngine, id: WeakValuesId, what: &str) {
    tracing::debug!(native = what, "service unavailable, dropping callback");
    let _ = engine.take_values(id);
}

/// Resume a parked callback with `args`.
fn resume(weak: &WeakJsEngine, id: WeakValuesId, args: Vec<JsValue>, what: &str) {
    let Some(engine) = weak.upgrade() else {
        tracing::trace!(native = what, "completion arrived after engine teardown");
        return;
    };
    let callback = match engine.take_values(id) {
        Ok(values) => match values.into_iter().next() {
            Some(callback) => callback,
            None => return,
        },
        Err(err) => {
            tracing::debug!(native = what, error = %err, "parked callback unavailable");
            return;
        }
    };
    if let Err(err) = engine.call(&callback, args) {
        tracing::warn!(native = what, error = %err, "callback failed");
    }
}

fn set_timeout(engine: &JsEngine, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
    check_arity("setTimeout", &args, 2)?;
    function_arg("setTimeout", &args, 0)?;
    let delay = Duration::from_millis(args[1].as_i64().unwrap_or(0).max(0) as u64);

    let (weak, id) = park(engine, args)?;
    let scheduled = engine.services().with_timer(|timer| {
        timer.set_timer(delay, Box::new(move || call_timer_task(&weak, id)));
    });
    if !scheduled {
        discard(engine, id, "setTimeout");
    }
    Ok(JsValue::Null)
}

/// Fire a `setTimeout` entry: parked as `[callback, delay, ...args]`.
fn call_timer_task(weak: &WeakJsEngine, id: WeakValuesId) {
    let Some(engine) = weak.upgrade() else {
        return;
    };
    let mut params = match engine.take_values(id) {
        Ok(params) => params.into_iter(),
        Err(err) => {
            tracing::debug!(error = %err, "timer parameters unavailable");
            return;
        }
    };
    let Some(callback) = params.next() else {
        return;
    };
    let args: Vec<JsValue> = params.skip(1).collect();
    if let Err(err) = engine.call(&callback, args) {
        tracing::warn!(error = %err, "setTimeout callback failed");
    }
}

fn trigger_event(engine: &JsEngine, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
    check_arity("_triggerEvent", &args, 1)?;
    let name = string_arg("_triggerEvent", &args, 0)?;
    engine.trigger_event(&name, args.into_iter().skip(1).collect());
    Ok(JsValue::Null)
}

fn error_value(result: Result<(), String>) -> JsValue {
    JsValue::String(result.err().unwrap_or_default())
}

fn fs_read(engine: &JsEngine, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
    const NAME: &str = "_fileSystem.read";
    check_arity(NAME, &args, 2)?;
    let path = string_arg(NAME, &args, 0)?;
    let callback = function_arg(NAME, &args, 1)?;

    let (weak, id) = park(engine, vec![callback])?;
    let scheduled = engine.services().with_file_system(|fs| {
        fs.read(
            &path,
            Box::new(move |result: Result<Vec<u8>, String>| {
                let (content, error) = match result {
                    Ok(bytes) => (String::from_utf8_lossy(&bytes).into_owned(), String::new()),
                    Err(error) => (String::new(), error),
                };
                let result = JsValue::object([
                    ("content", JsValue::String(content)),
                    ("error", JsValue::String(error)),
                ]);
                resume(&weak, id, vec![result], NAME);
            }),
        );
    });
    if !scheduled {
        discard(engine, id, NAME);
    }
    Ok(JsValue::Null)
}

fn fs_write(engine: &JsEngine, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
    const NAME: &str = "_fileSystem.write";
    check_arity(NAME, &args, 3)?;
    let path = string_arg(NAME, &args, 0)?;
    let content = string_arg(NAME, &args, 1)?;
    let callback = function_arg(NAME, &args, 2)?;

    let (weak, id) = park(engine, vec![callback])?;
    let scheduled = engine.services().with_file_system(|fs| {
        fs.write(
            &path,
            content.into_bytes(),
            Box::new(move |result: Result<(), String>| {
                resume(&weak, id, vec![error_value(result)], NAME)
            }),
        );
    });
    if !scheduled {
        discard(engine, id, NAME);
    }
    Ok(JsValue::Null)
}

fn fs_move(engine: &JsEngine, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
    const NAME: &str = "_fileSystem.move";
    check_arity(NAME, &args, 3)?;
    let from = string_arg(NAME, &args, 0)?;
    let to = string_arg(NAME, &args, 1)?;
    let callback = function_arg(NAME, &args, 2)?;

    let (weak, id) = park(engine, vec![callback])?;
    let scheduled = engine.services().with_file_system(|fs| {
        fs.move_file(
            &from,
            &to,
            Box::new(move |result: Result<(), String>| {
                resume(&weak, id, vec![error_value(result)], NAME)
            }),
        );
    });
    if !scheduled {
        discard(engine, id, NAME);
    }
    Ok(JsValue::Null)
}

fn fs_remove(engine: &JsEngine, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
    const NAME: &str = "_fileSystem.remove";
    check_arity(NAME, &args, 2)?;
    let path = string_arg(NAME, &args, 0)?;
    let callback = function_arg(NAME, &args, 1)?;

    let (weak, id) = park(engine, vec![callback])?;
    let scheduled = engine.services().with_file_system(|fs| {
        fs.remove(
            &path,
            Box::new(move |result: Result<(), String>| {
                resume(&weak, id, vec![error_value(result)], NAME)
            }),
        );
    });
    if !scheduled {
        discard(engine, id, NAME);
    }
    Ok(JsValue::Null)
}

fn fs_stat(engine: &JsEngine, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
    const NAME: &str = "_fileSystem.stat";
    check_arity(NAME, &args, 2)?;
    let path = string_arg(NAME, &args, 0)?;
    let callback = function_arg(NAME, &args, 1)?;

    let (weak, id) = park(engine, vec![callback])?;
    let scheduled = engine.services().with_file_system(|fs| {
        fs.stat(
            &path,
            Box::new(move |result: Result<StatResult, String>| {
                let (stat, error) = match result {
                    Ok(stat) => (stat, String::new()),
                    Err(error) => (StatResult::default(), error),
                };
                let result = JsValue::object([
                    ("exists", JsValue::Bool(stat.exists)),
                    ("isFile", JsValue::Bool(stat.is_file)),
                    ("isDirectory", JsValue::Bool(stat.is_directory)),
                    ("lastModified", JsValue::Int(stat.last_modified)),
                    ("error", JsValue::String(error)),
                ]);
                resume(&weak, id, vec![result], NAME);
            }),
        );
    });
    if !scheduled {
        discard(engine, id, NAME);
    }
    Ok(JsValue::Null)
}

fn web_get(engine: &JsEngine, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
    const NAME: &str = "_webRequest.GET";
    check_arity(NAME, &args, 3)?;
    let url = string_arg(NAME, &args, 0)?;
    let headers = match &args[1] {
        JsValue::Object(map) => map
            .iter()
            .filter_map(|(name, value)| Some((name.clone(), display_value(value)?)))
            .collect(),
        JsValue::Null => Vec::new(),
        _ => {
            return Err(ScriptError::Native(format!(
                "Argument 2 to {} must be an object",
                NAME
            )))
        }
    };
    let callback = function_arg(NAME, &args, 2)?;

    let (weak, id) = park(engine, vec![callback])?;
    let scheduled = engine.services().with_web_request(|web_request| {
        web_request.get(
            &url,
            headers,
            Box::new(move |response: ServerResponse| {
                let headers = response
                    .response_headers
                    .into_iter()
                    .map(|(name, value)| (name, JsValue::String(value)));
                let result = JsValue::object([
                    ("status", JsValue::Int(response.status)),
                    ("responseStatus", JsValue::Int(i64::from(response.response_status))),
                    ("responseText", JsValue::String(response.response_text)),
                    ("responseHeaders", JsValue::object(headers)),
                ]);
                resume(&weak, id, vec![result], NAME);
            }),
        );
    });
    if !scheduled {
        discard(engine, id, NAME);
    }
    Ok(JsValue::Null)
}

fn display_value(value: &JsValue) -> Option<String> {
    match value {
        JsValue::String(s) => Some(s.clone()),
        JsValue::Bool(b) => Some(b.to_string()),
        JsValue::Int(i) => Some(i.to_string()),
        JsValue::Float(f) => Some(f.to_string()),
        JsValue::Null => Some("null".to_string()),
        JsValue::Function { .. } => Some("[function]".to_string()),
        JsValue::Array(_) | JsValue::Object(_) => serde_json::to_string(value).ok(),
    }
}

fn console(method: &str, args: Vec<JsValue>) -> Result<JsValue, ScriptError> {
    let message = args
        .iter()
        .filter_map(display_value)
        .collect::<Vec<_>>()
        .join(" ");
    match method {
        "error" => tracing::error!(source = "console", "{}", message),
        "warn" => tracing::warn!(source = "console", "{}", message),
        "debug" => tracing::debug!(source = "console", "{}", message),
        "trace" => tracing::trace!(source = "console", "{}", message),
        _ => tracing::info!(source = "console", "{}", message),
    }
    Ok(JsValue::Null)
}
