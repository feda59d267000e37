//! Function table: the mapping from a capability's `function_impl` key to
//! the callable that executes it.
//!
//! Capability bodies are never evaluated from text. A function-call
//! capability names an entry here, and the registry looks it up at
//! invocation time.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::utilities::errors::BoxError;

/// Arguments of one invocation, as decoded from the model's JSON.
pub type Arguments = Map<String, Value>;

/// Type alias for a capability callable.
pub type CapabilityFn = Arc<dyn Fn(&Arguments) -> Result<Value, BoxError> + Send + Sync>;

/// Thread-safe table of callables keyed by implementation name.
///
/// Cloning is cheap and clones share entries.
#[derive(Clone, Default)]
pub struct FunctionTable {
    entries: Arc<DashMap<String, CapabilityFn>>,
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("keys", &self.keys())
            .finish()
    }
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callable operating on raw arguments. Replaces any
    /// previous entry under the same key.
    pub fn register<F>(&self, key: impl Into<String>, func: F)
    where
        F: Fn(&Arguments) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let key = key.into();
        if self.entries.insert(key.clone(), Arc::new(func)).is_some() {
            log::warn!("Function '{}' already registered, replacing", key);
        }
    }

    /// Register a callable taking a deserializable argument struct.
    ///
    /// Arguments that do not deserialize into `A` fail the invocation
    /// before `func` runs.
    pub fn register_typed<A, R, F>(&self, key: impl Into<String>, func: F)
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        self.register(key, move |args: &Arguments| {
            let typed: A = serde_json::from_value(Value::Object(args.clone()))
                .map_err(|e| -> BoxError { format!("invalid arguments: {}", e).into() })?;
            let output = func(typed)?;
            Ok(serde_json::to_value(output)?)
        });
    }

    pub fn get(&self, key: &str) -> Option<CapabilityFn> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
