//! Result size guard
//!
//! Results travel upstream over pipes with finite OS buffers. Before a result is
//! sent, its estimated footprint is bounded: the largest removable attributes
//! are replaced by [`Deleted`](crate::result::Deleted) until the estimate fits.
//! Receivers must therefore expect some attributes to arrive deleted.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::mem::size_of;

use crate::error::SizeGuardError;
use crate::result::{Deleted, Field, TaskResult};

/// Default transmission budget for a single result, in bytes
pub const DEFAULT_MAX_RESULT_BYTES: usize = 8192;

const SCALAR_SIZE: usize = size_of::<u64>();
const STRING_OVERHEAD: usize = size_of::<String>();

/// Estimates the deep footprint of one borrowed JSON tree.
///
/// Sizes are memoised per node, so asking for the size of a subtree after
/// sizing its parent costs a lookup. Every value passed in must outlive the
/// estimator, which keeps node addresses unique for as long as they are cached.
#[derive(Debug)]
pub struct SizeEstimator<'a> {
    root: &'a JsonValue,
    cache: HashMap<*const JsonValue, usize>,
}

impl<'a> SizeEstimator<'a> {
    pub fn new(root: &'a JsonValue) -> Self {
        Self {
            root,
            cache: HashMap::new(),
        }
    }

    /// Size of the whole tree
    pub fn total(&mut self) -> usize {
        let root = self.root;
        self.estimate(root)
    }

    /// Size of `value`, normally a node of the root tree
    pub fn estimate(&mut self, value: &'a JsonValue) -> usize {
        let key = value as *const JsonValue;
        if let Some(size) = self.cache.get(&key) {
            return *size;
        }

        let size = match value {
            JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) => SCALAR_SIZE,
            JsonValue::String(s) => STRING_OVERHEAD + s.len(),
            JsonValue::Array(items) => items.iter().map(|item| self.estimate(item)).sum(),
            JsonValue::Object(map) => map
                .iter()
                .map(|(k, v)| STRING_OVERHEAD + k.len() + self.estimate(v))
                .sum(),
        };

        self.cache.insert(key, size);
        size
    }
}

/// Estimate the footprint of any serializable value
pub fn estimate_size<T: Serialize + ?Sized>(value: &T) -> Result<usize, serde_json::Error> {
    let json = serde_json::to_value(value)?;
    Ok(SizeEstimator::new(&json).total())
}

/// A type whose direct attributes can be dropped to fit a size budget
pub trait SizeBounded: Serialize {
    /// Removable attributes, in declaration order
    fn removable_attributes(&self) -> &'static [&'static str];

    /// Replace the named attribute with the deleted marker
    fn delete_attribute(&mut self, name: &str);
}

impl SizeBounded for TaskResult {
    fn removable_attributes(&self) -> &'static [&'static str] {
        &["task", "result", "exception"]
    }

    fn delete_attribute(&mut self, name: &str) {
        match name {
            "task" => *self.task_field_mut() = Field::Deleted(Deleted),
            "result" => *self.result_field_mut() = Field::Deleted(Deleted),
            "exception" => *self.exception_field_mut() = Field::Deleted(Deleted),
            _ => {}
        }
    }
}

/// Shrink `obj` until its estimated size is at most `target_size`.
///
/// The largest removable attribute goes first; ties keep declaration order.
/// Returns the names of the deleted attributes. If deleting every removable
/// attribute is not enough, the object is left with all of them deleted and
/// [`SizeGuardError::Irreducible`] is returned.
pub fn bound_size<T: SizeBounded>(
    obj: &mut T,
    target_size: usize,
) -> Result<Vec<&'static str>, SizeGuardError> {
    let snapshot = serde_json::to_value(&*obj).map_err(SizeGuardError::Serialize)?;
    let mut estimator = SizeEstimator::new(&snapshot);
    let mut total = estimator.total();

    if total <= target_size {
        return Ok(Vec::new());
    }

    let mut candidates: Vec<(usize, &'static str, usize)> = obj
        .removable_attributes()
        .iter()
        .enumerate()
        .filter_map(|(index, name)| {
            snapshot
                .get(*name)
                .map(|value| (index, *name, estimator.estimate(value)))
        })
        .collect();
    candidates.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));

    let mut deleted = Vec::new();
    for (_, name, size) in candidates {
        if total <= target_size {
            break;
        }
        obj.delete_attribute(name);
        total = total.saturating_sub(size);
        deleted.push(name);
    }

    if total > target_size {
        return Err(SizeGuardError::Irreducible {
            size: total,
            target: target_size,
            deleted,
        });
    }

    if !deleted.is_empty() {
        tracing::debug!(?deleted, target_size, "Dropped oversized attributes");
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::TaskFailure;
    use crate::task::Task;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Debug, Serialize)]
    struct Record {
        first: Field<String>,
        second: Field<String>,
        label: String,
    }

    impl SizeBounded for Record {
        fn removable_attributes(&self) -> &'static [&'static str] {
            &["first", "second"]
        }

        fn delete_attribute(&mut self, name: &str) {
            match name {
                "first" => self.first = Field::Deleted(Deleted),
                "second" => self.second = Field::Deleted(Deleted),
                _ => {}
            }
        }
    }

    fn small_task() -> Task {
        Task::builder("f").arg(&1).unwrap().build().unwrap()
    }

    #[test]
    fn test_estimator_sums_containers() {
        let value = json!({"n": 1, "s": "abc", "a": [1, 2], "o": {"k": "v"}});
        let mut estimator = SizeEstimator::new(&value);

        assert_eq!(estimator.estimate(&value["n"]), SCALAR_SIZE);
        assert_eq!(estimator.estimate(&value["s"]), STRING_OVERHEAD + 3);
        assert_eq!(estimator.estimate(&value["a"]), 2 * SCALAR_SIZE);
        assert_eq!(estimator.estimate(&value["o"]), (STRING_OVERHEAD + 1) * 2);
        assert_eq!(
            estimator.total(),
            4 * (STRING_OVERHEAD + 1) + SCALAR_SIZE + STRING_OVERHEAD + 3 + 2 * SCALAR_SIZE
                + (STRING_OVERHEAD + 1) * 2
        );
    }

    #[test]
    fn test_estimator_memoises_subtrees() {
        let value = json!({"a": ["x", "y"], "b": 1});
        let mut estimator = SizeEstimator::new(&value);
        let total = estimator.total();
        let cached = estimator.cache.len();

        let inner = estimator.estimate(&value["a"]);
        assert_eq!(estimator.cache.len(), cached);
        assert!(inner < total);
    }

    #[test]
    fn test_short_lived_values_are_sized_independently() {
        let cases = [
            ("1", SCALAR_SIZE),
            ("\"abc\"", STRING_OVERHEAD + 3),
            ("[1, 2]", 2 * SCALAR_SIZE),
            ("{\"k\": \"v\"}", (STRING_OVERHEAD + 1) * 2),
            ("true", SCALAR_SIZE),
        ];
        for (text, expected) in cases {
            // Each value is dropped before the next is parsed
            let value: JsonValue = serde_json::from_str(text).unwrap();
            assert_eq!(estimate_size(&value).unwrap(), expected, "{text}");
            assert_eq!(SizeEstimator::new(&value).total(), expected, "{text}");
        }
    }

    #[test]
    fn test_small_result_is_untouched() {
        let mut result = TaskResult::success(small_task(), json!(10));
        let before = result.clone();

        let deleted = bound_size(&mut result, DEFAULT_MAX_RESULT_BYTES).unwrap();
        assert!(deleted.is_empty());
        assert_eq!(result, before);
    }

    #[test]
    fn test_oversized_result_is_deleted() {
        let mut result = TaskResult::success(small_task(), json!("A".repeat(8193)));

        let deleted = bound_size(&mut result, DEFAULT_MAX_RESULT_BYTES).unwrap();

        assert_eq!(deleted, vec!["result"]);
        assert!(result.result_field().is_deleted());
        assert_eq!(result.task(), Some(&small_task()));
        assert!(result.is_success());
        assert!(estimate_size(&result).unwrap() <= DEFAULT_MAX_RESULT_BYTES);
    }

    #[test]
    fn test_oversized_task_kwarg_deletes_task() {
        let task = Task::builder("f")
            .kwarg("blob", &"A".repeat(10_000))
            .unwrap()
            .build()
            .unwrap();
        let mut result = TaskResult::success(task, json!(true));

        let deleted = bound_size(&mut result, DEFAULT_MAX_RESULT_BYTES).unwrap();

        assert_eq!(deleted, vec!["task"]);
        assert!(result.task_field().is_deleted());
        assert_eq!(result.result(), Some(&json!(true)));
    }

    #[test]
    fn test_oversized_exception_is_deleted() {
        let mut result =
            TaskResult::failure(small_task(), TaskFailure::raised("E".repeat(20_000)));

        let deleted = bound_size(&mut result, DEFAULT_MAX_RESULT_BYTES).unwrap();

        assert_eq!(deleted, vec!["exception"]);
        assert!(result.exception_field().is_deleted());
        assert!(!result.is_success());
    }

    #[test]
    fn test_largest_attribute_goes_first() {
        let mut record = Record {
            first: Field::Present("a".repeat(100)),
            second: Field::Present("b".repeat(500)),
            label: "keep".to_string(),
        };

        let deleted = bound_size(&mut record, 300).unwrap();

        assert_eq!(deleted, vec!["second"]);
        assert!(!record.first.is_deleted());
        assert!(record.second.is_deleted());
        assert_eq!(record.label, "keep");
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let mut record = Record {
            first: Field::Present("a".repeat(200)),
            second: Field::Present("b".repeat(200)),
            label: "keep".to_string(),
        };

        let deleted = bound_size(&mut record, 400).unwrap();

        assert_eq!(deleted, vec!["first"]);
        assert!(record.first.is_deleted());
        assert!(!record.second.is_deleted());
    }

    #[test]
    fn test_irreducible_object_is_an_error() {
        let mut record = Record {
            first: Field::Present("a".repeat(10)),
            second: Field::Present("b".repeat(10)),
            label: "L".repeat(1000),
        };

        let err = bound_size(&mut record, 100).unwrap_err();
        match err {
            SizeGuardError::Irreducible { target, deleted, .. } => {
                assert_eq!(target, 100);
                assert_eq!(deleted.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
