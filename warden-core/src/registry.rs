//! Function registry
//!
//! Raw function references cannot cross a process boundary, so every work
//! function is registered under a [`FunctionName`]. The parent and its child
//! processes run the same executable and therefore build the same registry;
//! a [`Task`](crate::Task) only names the function it wants.
//!
//! The registry is built during initialisation (mutable) and used afterwards
//! through `Arc` (immutable), so no locking is involved.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::task::{FunctionName, TaskArgs};

/// A unit of work that can be executed inside a worker process
pub trait WorkFunction: Send + Sync {
    fn call(&self, args: TaskArgs<'_>) -> anyhow::Result<JsonValue>;
}

impl<F> WorkFunction for F
where
    F: Fn(TaskArgs<'_>) -> anyhow::Result<JsonValue> + Send + Sync,
{
    fn call(&self, args: TaskArgs<'_>) -> anyhow::Result<JsonValue> {
        self(args)
    }
}

/// Registry of work functions (name -> function)
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: BTreeMap<FunctionName, Arc<dyn WorkFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    /// Register a work function under `name`
    pub fn register<F>(&mut self, name: &str, function: F) -> Result<(), RegistryError>
    where
        F: WorkFunction + 'static,
    {
        let name = FunctionName::new(name)?;
        if self.functions.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        self.functions.insert(name, Arc::new(function));
        Ok(())
    }

    /// Builder-style registration
    pub fn with<F>(mut self, name: &str, function: F) -> Result<Self, RegistryError>
    where
        F: WorkFunction + 'static,
    {
        self.register(name, function)?;
        Ok(self)
    }

    pub fn get(&self, name: &FunctionName) -> Option<Arc<dyn WorkFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &FunctionName) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&FunctionName> {
        self.functions.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
