//! Run-scoped variable store.

use crate::error::{RestelError, Result};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Ordered mapping of variable name to value, owned by one run.
///
/// Merges never overwrite: a key can be bound once per run.
#[derive(Debug, Clone, Serialize)]
pub struct TestContext {
    run: String,
    values: IndexMap<String, Value>,
}

impl TestContext {
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            values: IndexMap::new(),
        }
    }

    /// Name of the execution this context belongs to.
    pub fn run_name(&self) -> &str {
        &self.run
    }

    /// Merge `entries` into the store.
    ///
    /// Fails with [`RestelError::NameCollision`] when a key is already
    /// bound or repeats within `entries`. Nothing is inserted unless
    /// every key is free.
    pub fn put_all<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let staged: Vec<(String, Value)> = entries.into_iter().collect();
        let mut seen = HashSet::with_capacity(staged.len());
        for (key, _) in &staged {
            if self.values.contains_key(key) || !seen.insert(key.as_str()) {
                return Err(RestelError::NameCollision {
                    key: key.clone(),
                    run: self.run.clone(),
                });
            }
        }
        self.values.extend(staged);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        self.values.get(name).ok_or_else(|| self.unbound(name))
    }

    /// Remove a binding, keeping the insertion order of the rest.
    pub fn remove(&mut self, name: &str) -> Result<Value> {
        match self.values.shift_remove(name) {
            Some(value) => Ok(value),
            None => Err(self.unbound(name)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    fn unbound(&self, name: &str) -> RestelError {
        RestelError::UnboundVariable {
            name: name.to_string(),
            run: self.run.clone(),
        }
    }
}
