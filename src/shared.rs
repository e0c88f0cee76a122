//! Shared context threaded through a flow execution.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;

use crate::task::TaskError;

/// A typed name for a value stored in [`SharedData`].
///
/// Declaring keys as constants keeps the type of each slot in one place:
///
/// ```rust
/// use taskflow::{Key, SharedData};
///
/// const AGE: Key<u32> = Key::new("age");
///
/// let mut shared = SharedData::new();
/// shared.insert_key(&AGE, 25).unwrap();
/// assert_eq!(shared.get_key(&AGE).unwrap(), 25);
/// ```
pub struct Key<T> {
    name: &'static str,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.name).finish()
    }
}

/// Open, string-keyed state shared by every task in a flow.
///
/// Values are stored as JSON. Tasks read whatever keys they need and
/// write their own results back, by default under their own name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedData {
    values: Map<String, Value>,
}

impl SharedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build shared data from a JSON object. Non-object values yield an error.
    pub fn from_value(value: Value) -> Result<Self, TaskError> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            other => Err(TaskError::permanent(anyhow::anyhow!(
                "shared data must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Raw access to a value.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Deserialize the value stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, TaskError> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| TaskError::MissingKey(key.to_string()))?;
        T::deserialize(value).map_err(|source| TaskError::Shared {
            key: key.to_string(),
            source,
        })
    }

    /// Like [`get`](Self::get) but a missing key is `Ok(None)`.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, TaskError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|source| TaskError::Shared {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Serialize `value` and store it under `key`, replacing any previous value.
    ///
    /// Nothing is written when serialization fails.
    pub fn insert<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), TaskError> {
        let value = serde_json::to_value(value).map_err(|source| TaskError::Shared {
            key: key.to_string(),
            source,
        })?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn insert_value(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    pub fn get_key<T: DeserializeOwned>(&self, key: &Key<T>) -> Result<T, TaskError> {
        self.get(key.name)
    }

    pub fn insert_key<T: Serialize>(&mut self, key: &Key<T>, value: T) -> Result<(), TaskError> {
        self.insert(key.name, &value)
    }

    /// Remove a key, returning its old value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Returns true if the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterate over the keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the context and return it as a JSON object.
    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

impl From<Map<String, Value>> for SharedData {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}
