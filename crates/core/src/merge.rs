//! Merges a parent dev-container configuration document into a child under
//! per-key [`ExtendBehavior`] policies.
//!
//! There is no teacher equivalent of this module (`ExtendBehavior` does not
//! exist anywhere in the inherited repository); it is grounded stylistically
//! on `build/metadata.rs`'s `merge_labels`: a pure function over plain data,
//! no side effects, no internal mutability.

use crate::errors::EngineError;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;

/// Per-key merge policy. Keys absent from the behavior table default to
/// [`ExtendBehavior::Replace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendBehavior {
    /// Child's value wins outright (including "absent" removing the key).
    Replace,
    /// Parent's value wins; child is ignored.
    Skip,
    /// Both values must be arrays; result is their parent-first deduplicated union.
    Merge,
}

fn behavior_for<'a>(
    behaviors: &'a HashMap<String, ExtendBehavior>,
    key: &str,
) -> &'a ExtendBehavior {
    behaviors.get(key).unwrap_or(&ExtendBehavior::Replace)
}

/// Merges `parent` and `child`, both of which must be JSON objects, per
/// `behaviors`. Pure function: neither input is mutated.
///
/// # Errors
///
/// Returns [`EngineError::MergeType`] if a key bound to
/// [`ExtendBehavior::Merge`] holds a non-array value on either side.
pub fn merge_configs(
    parent: &Value,
    child: &Value,
    behaviors: &HashMap<String, ExtendBehavior>,
) -> Result<Value, EngineError> {
    let parent_obj = parent
        .as_object()
        .ok_or_else(|| EngineError::MergeType {
            key: "<root>".to_string(),
            message: "parent document is not a JSON object".to_string(),
        })?;
    let child_obj = child.as_object().ok_or_else(|| EngineError::MergeType {
        key: "<root>".to_string(),
        message: "child document is not a JSON object".to_string(),
    })?;

    // Stable union order: every parent key first (in its own order), then
    // any child-only keys in the order they appear in the child.
    let mut ordered_keys: IndexMap<&str, ()> = IndexMap::new();
    for key in parent_obj.keys() {
        ordered_keys.insert(key.as_str(), ());
    }
    for key in child_obj.keys() {
        ordered_keys.insert(key.as_str(), ());
    }

    let mut result = serde_json::Map::new();
    for key in ordered_keys.keys() {
        let behavior = behavior_for(behaviors, key);
        tracing::trace!(key = %key, behavior = ?behavior, "merge decision");

        match behavior {
            ExtendBehavior::Replace => {
                // Per spec: the result always reflects the child's side. A key the
                // child doesn't mention is removed even if the parent had it.
                if let Some(v) = child_obj.get(*key) {
                    result.insert((*key).to_string(), v.clone());
                }
            }
            ExtendBehavior::Skip => {
                // Parent's value wins; the child is ignored outright, including
                // when the parent doesn't have the key either.
                if let Some(v) = parent_obj.get(*key) {
                    result.insert((*key).to_string(), v.clone());
                }
            }
            ExtendBehavior::Merge => {
                let merged = merge_arrays(key, parent_obj.get(*key), child_obj.get(*key))?;
                result.insert((*key).to_string(), merged);
            }
        }
    }

    Ok(Value::Object(result))
}

fn merge_arrays(
    key: &str,
    parent: Option<&Value>,
    child: Option<&Value>,
) -> Result<Value, EngineError> {
    let mut seen: Vec<Value> = Vec::new();

    let mut push_all = |values: &[Value], seen: &mut Vec<Value>| {
        for v in values {
            if !seen.contains(v) {
                seen.push(v.clone());
            }
        }
    };

    if let Some(p) = parent {
        let arr = p.as_array().ok_or_else(|| EngineError::MergeType {
            key: key.to_string(),
            message: "MERGE behavior requires an array on the parent side".to_string(),
        })?;
        push_all(arr, &mut seen);
    }
    if let Some(c) = child {
        let arr = c.as_array().ok_or_else(|| EngineError::MergeType {
            key: key.to_string(),
            message: "MERGE behavior requires an array on the child side".to_string(),
        })?;
        push_all(arr, &mut seen);
    }

    Ok(Value::Array(seen))
}
