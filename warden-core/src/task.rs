//! Task domain model and related types

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::CoreError;

/// Name under which a work function is registered (newtype pattern for type safety)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionName(String);

impl FunctionName {
    /// Create a function name, rejecting empty strings
    pub fn new(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::EmptyFunctionName);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for FunctionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An immutable unit of work.
///
/// Arguments are normalised to JSON when the task is built, so a task only ever
/// carries plain transferable data. Two tasks with the same function name,
/// positional arguments and named arguments are equal and hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    func: FunctionName,
    #[serde(default)]
    args: Vec<JsonValue>,
    #[serde(default)]
    kwargs: BTreeMap<String, JsonValue>,
}

impl Task {
    /// Create a task from already-encoded arguments
    pub fn new(
        func: FunctionName,
        args: Vec<JsonValue>,
        kwargs: BTreeMap<String, JsonValue>,
    ) -> Self {
        Self { func, args, kwargs }
    }

    /// Start building a task for the named function
    pub fn builder(func: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(func)
    }

    pub fn func(&self) -> &FunctionName {
        &self.func
    }

    pub fn args(&self) -> &[JsonValue] {
        &self.args
    }

    pub fn kwargs(&self) -> &BTreeMap<String, JsonValue> {
        &self.kwargs
    }

    /// Borrow the arguments in the form handed to a work function
    pub fn task_args(&self) -> TaskArgs<'_> {
        TaskArgs {
            args: &self.args,
            kwargs: &self.kwargs,
        }
    }
}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.func.hash(state);
        self.args.len().hash(state);
        for arg in &self.args {
            hash_json(arg, state);
        }
        self.kwargs.len().hash(state);
        for (name, value) in &self.kwargs {
            name.hash(state);
            hash_json(value, state);
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} args, {} kwargs)",
            self.func,
            self.args.len(),
            self.kwargs.len()
        )
    }
}

// Object keys are visited in sorted order so the hash agrees with `Value`'s
// order-insensitive equality whatever map backend serde_json was built with.
fn hash_json<H: Hasher>(value: &JsonValue, state: &mut H) {
    match value {
        JsonValue::Null => 0u8.hash(state),
        JsonValue::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        JsonValue::Number(n) => {
            2u8.hash(state);
            n.to_string().hash(state);
        }
        JsonValue::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        JsonValue::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_json(item, state);
            }
        }
        JsonValue::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                key.hash(state);
                hash_json(&map[key.as_str()], state);
            }
        }
    }
}

/// Builder for constructing tasks.
///
/// Every argument goes through `serde_json::to_value` here. Rich domain objects
/// are reduced to plain JSON at construction time and an argument that cannot be
/// encoded is rejected immediately.
#[derive(Debug)]
pub struct TaskBuilder {
    func: String,
    args: Vec<JsonValue>,
    kwargs: BTreeMap<String, JsonValue>,
}

impl TaskBuilder {
    pub fn new(func: impl Into<String>) -> Self {
        Self {
            func: func.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Append a positional argument
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, CoreError> {
        let encoded = serde_json::to_value(value).map_err(|source| CoreError::Encode {
            name: format!("args[{}]", self.args.len()),
            source,
        })?;
        self.args.push(encoded);
        Ok(self)
    }

    /// Set a named argument, replacing any previous value under the same name
    pub fn kwarg<T: Serialize + ?Sized>(
        mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        let encoded = serde_json::to_value(value).map_err(|source| CoreError::Encode {
            name: name.clone(),
            source,
        })?;
        self.kwargs.insert(name, encoded);
        Ok(self)
    }

    pub fn build(self) -> Result<Task, CoreError> {
        Ok(Task {
            func: FunctionName::new(self.func)?,
            args: self.args,
            kwargs: self.kwargs,
        })
    }
}

/// Borrowed view of a task's arguments, handed to work functions
#[derive(Debug, Clone, Copy)]
pub struct TaskArgs<'a> {
    args: &'a [JsonValue],
    kwargs: &'a BTreeMap<String, JsonValue>,
}

impl<'a> TaskArgs<'a> {
    pub fn positional(&self) -> &'a [JsonValue] {
        self.args
    }

    pub fn named(&self) -> &'a BTreeMap<String, JsonValue> {
        self.kwargs
    }

    /// Decode the positional argument at `index`
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("missing positional argument {}", index))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("invalid positional argument {}: {}", index, e))
    }

    /// Decode a required named argument
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .kwargs
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("missing keyword argument '{}'", name))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("invalid keyword argument '{}': {}", name, e))
    }

    /// Decode an optional named argument, falling back to `default` when absent
    pub fn kwarg_or<T: DeserializeOwned>(&self, name: &str, default: T) -> anyhow::Result<T> {
        match self.kwargs.get(name) {
            Some(_) => self.kwarg(name),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(task: &Task) -> u64 {
        let mut hasher = DefaultHasher::new();
        task.hash(&mut hasher);
        hasher.finish()
    }

    #[derive(Serialize)]
    struct ContentPolicy {
        name: String,
        switches: Vec<(String, bool)>,
    }

    #[test]
    fn test_equal_tasks_hash_identically() {
        let a = Task::builder("double").arg(&5).unwrap().kwarg("n", &2).unwrap().build().unwrap();
        let b = Task::builder("double").arg(&5).unwrap().kwarg("n", &2).unwrap().build().unwrap();

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_changing_any_component_breaks_equality() {
        let base = Task::builder("double").arg(&5).unwrap().kwarg("n", &2).unwrap().build().unwrap();

        let other_func = Task::builder("triple").arg(&5).unwrap().kwarg("n", &2).unwrap().build().unwrap();
        let other_args = Task::builder("double").arg(&6).unwrap().kwarg("n", &2).unwrap().build().unwrap();
        let other_kwargs = Task::builder("double").arg(&5).unwrap().kwarg("n", &3).unwrap().build().unwrap();

        assert_ne!(base, other_func);
        assert_ne!(base, other_args);
        assert_ne!(base, other_kwargs);
    }

    #[test]
    fn test_kwarg_order_does_not_matter() {
        let a = Task::builder("f").kwarg("x", &1).unwrap().kwarg("y", &2).unwrap().build().unwrap();
        let b = Task::builder("f").kwarg("y", &2).unwrap().kwarg("x", &1).unwrap().build().unwrap();

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_nested_object_hash_is_key_order_insensitive() {
        let a = Task::new(
            FunctionName::new("f").unwrap(),
            vec![json!({"a": 1, "b": [1, 2]})],
            BTreeMap::new(),
        );
        let b = Task::new(
            FunctionName::new("f").unwrap(),
            vec![json!({"b": [1, 2], "a": 1})],
            BTreeMap::new(),
        );
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_rich_argument_is_normalised_at_construction() {
        let policy = ContentPolicy {
            name: "strict".to_string(),
            switches: vec![("macros".to_string(), false)],
        };
        let task = Task::builder("sanitise")
            .kwarg("content_management_policy", &policy)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            task.kwargs()["content_management_policy"],
            json!({"name": "strict", "switches": [["macros", false]]})
        );
    }

    #[test]
    fn test_unencodable_argument_is_rejected() {
        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "tuple keys are not valid JSON object keys");

        let err = Task::builder("f").kwarg("bad", &bad).unwrap_err();
        assert!(matches!(err, CoreError::Encode { ref name, .. } if name == "bad"));
    }

    #[test]
    fn test_empty_function_name_is_rejected() {
        assert!(matches!(
            Task::builder("  ").build(),
            Err(CoreError::EmptyFunctionName)
        ));
    }

    #[test]
    fn test_task_args_decoding() {
        let task = Task::builder("f")
            .arg(&7)
            .unwrap()
            .kwarg("label", "seven")
            .unwrap()
            .build()
            .unwrap();
        let args = task.task_args();

        assert_eq!(args.arg::<i64>(0).unwrap(), 7);
        assert_eq!(args.kwarg::<String>("label").unwrap(), "seven");
        assert_eq!(args.kwarg_or::<u32>("n", 2).unwrap(), 2);
        assert!(args.arg::<i64>(1).is_err());
        assert!(args.kwarg::<i64>("label").is_err());
    }

    #[test]
    fn test_task_serialization_shape() {
        let task = Task::builder("double").arg(&1).unwrap().build().unwrap();
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value, json!({"func": "double", "args": [1], "kwargs": {}}));

        let back: Task = serde_json::from_value(json!({"func": "double", "args": [1]})).unwrap();
        assert_eq!(back, task);
    }
}
