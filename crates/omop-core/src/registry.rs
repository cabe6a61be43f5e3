//! Per-run result registry.
//!
//! Each step stores its return value under its key once it finishes.
//! Later steps read values eagerly with [`ResultRegistry::get`] or through
//! a [`LazyValue`] handle that resolves when it is read, so a step built
//! before its producer has run still sees the freshest value.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// What a step returns: an optional affected-row count and an optional payload.
#[derive(Clone, Default)]
pub struct StepValue {
    rows: Option<u64>,
    payload: Option<Rc<dyn Any>>,
}

impl StepValue {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn rows(count: u64) -> Self {
        Self {
            rows: Some(count),
            payload: None,
        }
    }

    pub fn with_payload<T: Any>(mut self, payload: T) -> Self {
        self.payload = Some(Rc::new(payload));
        self
    }

    pub fn row_count(&self) -> Option<u64> {
        self.rows
    }

    pub fn payload<T: Any>(&self) -> Option<Rc<T>> {
        self.payload
            .as_ref()
            .and_then(|payload| Rc::clone(payload).downcast::<T>().ok())
    }
}

impl fmt::Debug for StepValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepValue")
            .field("rows", &self.rows)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultRegistry {
    inner: Rc<RefCell<BTreeMap<String, StepValue>>>,
}

impl ResultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: StepValue) {
        self.inner.borrow_mut().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<StepValue> {
        self.inner.borrow().get(key).cloned()
    }

    pub fn get_as<T: Any>(&self, key: &str) -> Option<Rc<T>> {
        self.get(key).and_then(|value| value.payload::<T>())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.borrow().keys().cloned().collect()
    }

    /// A handle that reads `key` when it is resolved, not when it is created.
    pub fn lazy(&self, key: &str) -> LazyValue {
        LazyValue {
            registry: self.clone(),
            key: key.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LazyValue {
    registry: ResultRegistry,
    key: String,
}

impl LazyValue {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> Option<StepValue> {
        self.registry.get(&self.key)
    }

    pub fn get_as<T: Any>(&self) -> Option<Rc<T>> {
        self.registry.get_as::<T>(&self.key)
    }
}
