//! Registry of host functions published to script.
//!
//! Bindings are registered by name before installation. A dotted name such as
//! `_fileSystem.read` becomes a method on a global object; a plain name
//! becomes a global function.

use super::JsEngine;
use crate::runtime::backend::NativeFunction;
use crate::runtime::error::EngineError;
use crate::runtime::js_value::JsValue;
use indexmap::IndexMap;

/// Metadata for a registered binding.
#[derive(Clone)]
pub struct Binding {
    /// Binding ID (registration order)
    pub id: u32,
    /// Name as seen from script
    pub name: String,
    /// Handler function
    pub handler: NativeFunction,
}

/// Registry of bindings, kept in registration order.
#[derive(Default)]
pub struct BindingRegistry {
    bindings: IndexMap<String, Binding>,
    next_id: u32,
}

impl BindingRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding.
    ///
    /// Returns the binding ID, or an error if the name is malformed or taken.
    pub fn register(&mut self, name: &str, handler: NativeFunction) -> Result<u32, EngineError> {
        let segments: Vec<&str> = name.split('.').collect();
        if segments.len() > 2 || segments.iter().any(|s| s.is_empty()) {
            return Err(EngineError::InvalidArguments(format!(
                "Binding name '{}' must be 'name' or 'object.name'",
                name
            )));
        }
        if self.bindings.contains_key(name) {
            return Err(EngineError::InvalidArguments(format!(
                "Binding '{}' is already registered",
                name
            )));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.bindings.insert(
            name.to_string(),
            Binding {
                id,
                name: name.to_string(),
                handler,
            },
        );
        Ok(id)
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Publish every binding as a global on `engine`.
    pub fn install(&self, engine: &JsEngine) -> Result<(), EngineError> {
        let mut objects: IndexMap<&str, IndexMap<String, JsValue>> = IndexMap::new();
        for binding in self.bindings.values() {
            let function = engine.register_native(binding.handler.clone())?;
            match binding.name.split_once('.') {
                Some((object, member)) => {
                    objects
                        .entry(object)
                        .or_default()
                        .insert(member.to_string(), function);
                }
                None => engine.set_global_property(&binding.name, function)?,
            }
        }
        for (object, members) in objects {
            engine.set_global_property(object, JsValue::Object(members))?;
        }
        Ok(())
    }
}
