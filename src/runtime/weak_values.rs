//! Registry of script values parked across asynchronous boundaries.
//!
//! A completion that needs script state later (a timer callback, an I/O
//! callback) stores the values here and keeps only the returned
//! [`WeakValuesId`]. The id confers no ownership. Slots are released by
//! [`WeakValueRegistry::take`], or all at once when the owning engine is torn
//! down, after which every operation reports [`WeakValuesError::Invalidated`].
//!
//! The registry has its own lock, separate from the engine's execution lane.

use crate::runtime::error::WeakValuesError;
use crate::runtime::js_value::JsValue;
use parking_lot::Mutex;
use slab::Slab;
use std::fmt;

/// Opaque handle to a stored value list.
///
/// Slab keys are reused, so each id also carries the generation of the slot
/// it was issued for. A stale id never resolves to a newer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakValuesId {
    key: usize,
    generation: u64,
}

impl fmt::Display for WeakValuesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.key, self.generation)
    }
}

struct Slot {
    generation: u64,
    values: Vec<JsValue>,
}

struct RegistryState {
    slots: Slab<Slot>,
    next_generation: u64,
    invalidated: bool,
}

pub struct WeakValueRegistry {
    state: Mutex<RegistryState>,
}

impl WeakValueRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                slots: Slab::new(),
                next_generation: 0,
                invalidated: false,
            }),
        }
    }

    /// Park `values` in a new slot.
    pub fn store(&self, values: Vec<JsValue>) -> Result<WeakValuesId, WeakValuesError> {
        let mut state = self.state.lock();
        if state.invalidated {
            return Err(WeakValuesError::Invalidated);
        }
        let generation = state.next_generation;
        state.next_generation += 1;
        let key = state.slots.insert(Slot { generation, values });
        Ok(WeakValuesId { key, generation })
    }

    /// Read the values without releasing the slot.
    pub fn peek(&self, id: WeakValuesId) -> Result<Vec<JsValue>, WeakValuesError> {
        let state = self.state.lock();
        if state.invalidated {
            return Err(WeakValuesError::Invalidated);
        }
        match state.slots.get(id.key) {
            Some(slot) if slot.generation == id.generation => Ok(slot.values.clone()),
            _ => Err(unknown(id)),
        }
    }

    /// Release the slot and hand back its values.
    ///
    /// A second take of the same id fails with [`WeakValuesError::Unknown`].
    pub fn take(&self, id: WeakValuesId) -> Result<Vec<JsValue>, WeakValuesError> {
        let mut state = self.state.lock();
        if state.invalidated {
            return Err(WeakValuesError::Invalidated);
        }
        let issued = state
            .slots
            .get(id.key)
            .map_or(false, |slot| slot.generation == id.generation);
        if !issued {
            return Err(unknown(id));
        }
        Ok(state.slots.remove(id.key).values)
    }

    /// Drop every live slot and refuse all further operations.
    ///
    /// Returns the number of slots that were still live.
    pub fn invalidate(&self) -> usize {
        let mut state = self.state.lock();
        state.invalidated = true;
        let live = state.slots.len();
        state.slots.clear();
        live
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.lock().invalidated
    }
}

impl Default for WeakValueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown(id: WeakValuesId) -> WeakValuesError {
    tracing::warn!(%id, "weak values used after take");
    WeakValuesError::Unknown(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_store_peek_take() {
        let registry = WeakValueRegistry::new();
        let id = registry
            .store(vec![JsValue::Int(1), JsValue::from("two")])
            .unwrap();
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.peek(id).unwrap().len(), 2);
        assert_eq!(registry.peek(id).unwrap()[1], JsValue::from("two"));
        assert_eq!(registry.len(), 1);

        let values = registry.take(id).unwrap();
        assert_eq!(values, vec![JsValue::Int(1), JsValue::from("two")]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_double_take_is_an_error() {
        let registry = WeakValueRegistry::new();
        let id = registry.store(vec![JsValue::Null]).unwrap();
        registry.take(id).unwrap();

        assert_eq!(registry.take(id), Err(WeakValuesError::Unknown(id)));
        assert_eq!(registry.peek(id), Err(WeakValuesError::Unknown(id)));
    }

    #[test]
    fn test_stale_id_does_not_resolve_reused_slot() {
        let registry = WeakValueRegistry::new();
        let stale = registry.store(vec![JsValue::Int(1)]).unwrap();
        registry.take(stale).unwrap();

        let fresh = registry.store(vec![JsValue::Int(2)]).unwrap();
        assert_ne!(stale, fresh);
        assert_eq!(registry.take(stale), Err(WeakValuesError::Unknown(stale)));
        assert_eq!(registry.take(fresh).unwrap(), vec![JsValue::Int(2)]);
    }

    #[test]
    fn test_invalidate_reclaims_live_slots() {
        let registry = WeakValueRegistry::new();
        let first = registry.store(vec![JsValue::Int(1)]).unwrap();
        let _second = registry.store(vec![JsValue::Int(2)]).unwrap();

        assert_eq!(registry.invalidate(), 2);
        assert!(registry.is_invalidated());
        assert!(registry.is_empty());
        assert_eq!(registry.take(first), Err(WeakValuesError::Invalidated));
        assert_eq!(registry.peek(first), Err(WeakValuesError::Invalidated));
        assert_eq!(
            registry.store(vec![JsValue::Null]),
            Err(WeakValuesError::Invalidated)
        );
    }

    #[test]
    fn test_concurrent_store_and_take() {
        let registry = Arc::new(WeakValueRegistry::new());
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let id = registry.store(vec![JsValue::Int(worker * 1000 + i)]).unwrap();
                        assert_eq!(
                            registry.take(id).unwrap(),
                            vec![JsValue::Int(worker * 1000 + i)]
                        );
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
