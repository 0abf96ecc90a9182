//! Reducer policies and merge application.
//!
//! Every state key carries one [`ReducerPolicy`], fixed when the graph is
//! compiled. Partial updates from a superstep are merged sequentially, in
//! deterministic order, through the policy of each touched key — this is
//! what keeps concurrent branch writes race-free and reproducible.
//!
//! Merge failures are fatal: [`ReducerConflictError`] aborts the run.

mod registry;

pub use registry::ReducerRegistry;

use miette::Diagnostic;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// How partial updates land in a state key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReducerPolicy {
    /// Last writer in merge order wins. Default for undeclared keys.
    Overwrite,
    /// Object union. Two writes to the same subkey within one barrier are a
    /// conflict; across barriers a subkey may be rewritten.
    MergeBySubkey,
    /// Ordered accumulation into an array. Array updates extend, any other
    /// value pushes one element.
    Append,
    /// Numeric addition, integer-preserving when both sides are integers.
    Increment,
}

impl std::fmt::Display for ReducerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReducerPolicy::Overwrite => "overwrite",
            ReducerPolicy::MergeBySubkey => "merge-by-subkey",
            ReducerPolicy::Append => "append",
            ReducerPolicy::Increment => "increment",
        };
        write!(f, "{name}")
    }
}

/// Fatal merge-contract violations.
#[derive(Debug, Error, Diagnostic)]
pub enum ReducerConflictError {
    /// A node produced an update for a key it never declared as a write.
    #[error("node {node} wrote undeclared key '{key}'")]
    #[diagnostic(
        code(loomflow::reducers::undeclared_key),
        help("Add the key to the node's writes() declaration or drop the update.")
    )]
    UndeclaredKey { node: String, key: String },

    /// Two writers in the same barrier supplied the same subkey of a
    /// merge-by-subkey key.
    #[error("merge-by-subkey collision on '{key}.{subkey}'")]
    #[diagnostic(
        code(loomflow::reducers::subkey_collision),
        help("Writers into a merge-by-subkey key must supply disjoint subkeys per step.")
    )]
    SubkeyCollision { key: String, subkey: String },

    /// An update (or the stored value) has the wrong JSON shape for the
    /// key's policy.
    #[error("reducer type mismatch on '{key}': expected {expected}")]
    #[diagnostic(code(loomflow::reducers::type_mismatch))]
    TypeMismatch { key: String, expected: &'static str },
}

/// Apply one update to one channel value under the given policy.
///
/// `seen_subkeys` tracks subkeys already written to this key within the
/// current barrier. Returns `true` if the stored value changed.
pub(crate) fn apply_policy(
    policy: ReducerPolicy,
    key: &str,
    stored: &mut Value,
    update: &Value,
    seen_subkeys: &mut FxHashSet<String>,
) -> Result<bool, ReducerConflictError> {
    match policy {
        ReducerPolicy::Overwrite => {
            if stored == update {
                Ok(false)
            } else {
                *stored = update.clone();
                Ok(true)
            }
        }
        ReducerPolicy::MergeBySubkey => {
            let incoming = update
                .as_object()
                .ok_or(ReducerConflictError::TypeMismatch {
                    key: key.to_string(),
                    expected: "object update",
                })?;
            if stored.is_null() {
                *stored = Value::Object(serde_json::Map::new());
            }
            let target = stored
                .as_object_mut()
                .ok_or(ReducerConflictError::TypeMismatch {
                    key: key.to_string(),
                    expected: "object value",
                })?;
            let mut changed = false;
            // Sort subkeys so identical barriers replay identically.
            let mut pairs: Vec<_> = incoming.iter().collect();
            pairs.sort_by(|(a, _), (b, _)| a.cmp(b));
            for (subkey, value) in pairs {
                if !seen_subkeys.insert(subkey.clone()) {
                    return Err(ReducerConflictError::SubkeyCollision {
                        key: key.to_string(),
                        subkey: subkey.clone(),
                    });
                }
                let previous = target.insert(subkey.clone(), value.clone());
                changed |= previous.as_ref() != Some(value);
            }
            Ok(changed)
        }
        ReducerPolicy::Append => {
            if stored.is_null() {
                *stored = Value::Array(Vec::new());
            }
            let target = stored
                .as_array_mut()
                .ok_or(ReducerConflictError::TypeMismatch {
                    key: key.to_string(),
                    expected: "array value",
                })?;
            match update {
                Value::Array(items) => {
                    if items.is_empty() {
                        return Ok(false);
                    }
                    target.extend(items.iter().cloned());
                }
                other => target.push(other.clone()),
            }
            Ok(true)
        }
        ReducerPolicy::Increment => {
            let delta = update
                .as_f64()
                .ok_or(ReducerConflictError::TypeMismatch {
                    key: key.to_string(),
                    expected: "numeric update",
                })?;
            let current = if stored.is_null() {
                0.0
            } else {
                stored
                    .as_f64()
                    .ok_or(ReducerConflictError::TypeMismatch {
                        key: key.to_string(),
                        expected: "numeric value",
                    })?
            };
            // Preserve integer representation when both sides are integral.
            let next = if let (Some(cur), Some(inc)) = (
                stored.as_i64().or(if stored.is_null() { Some(0) } else { None }),
                update.as_i64(),
            ) {
                Value::from(cur + inc)
            } else {
                let sum = current + delta;
                let number = serde_json::Number::from_f64(sum).ok_or(
                    ReducerConflictError::TypeMismatch {
                        key: key.to_string(),
                        expected: "finite numeric result",
                    },
                )?;
                Value::Number(number)
            };
            let changed = *stored != next;
            *stored = next;
            Ok(changed)
        }
    }
}
