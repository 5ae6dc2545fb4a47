//! Field-by-field comparison of record snapshots.
//!
//! Used to render what a [`RecordVersion`](crate::version::RecordVersion)
//! changed. Pure and stateless.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::record::EDITABLE_FIELDS;

/// The status of one field in a diff comparison.
///
/// - `Added`     -- empty before, set after.
/// - `Removed`   -- set before, empty after.
/// - `Changed`   -- set on both sides with different values.
/// - `Unchanged` -- identical on both sides (including both empty).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Added,
    Removed,
    Changed,
    Unchanged,
}

impl DiffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
        }
    }

    fn between(before: Option<&str>, after: Option<&str>) -> Self {
        match (before, after) {
            (None, None) => Self::Unchanged,
            (None, Some(_)) => Self::Added,
            (Some(_), None) => Self::Removed,
            (Some(b), Some(a)) if a == b => Self::Unchanged,
            (Some(_), Some(_)) => Self::Changed,
        }
    }
}

impl std::fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One editable field across a version's `before` and `after` snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDiff {
    pub field: &'static str,
    pub before: Option<String>,
    pub after: Option<String>,
    pub status: DiffStatus,
}

/// Decode a snapshot that may be an object or a JSON string holding one.
///
/// Older rows were double-encoded, so string unwrapping is attempted twice.
/// Anything that is not an object after that is treated as empty.
pub fn snapshot_object(value: &Value) -> Map<String, Value> {
    let mut current = value.clone();
    for _ in 0..2 {
        match current {
            Value::String(text) => match serde_json::from_str::<Value>(&text) {
                Ok(inner) => current = inner,
                Err(_) => return Map::new(),
            },
            _ => break,
        }
    }
    match current {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Read one field as text; null, empty and missing are all `None`.
fn field_text(map: &Map<String, Value>, field: &str) -> Option<String> {
    match map.get(field)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Compare the six editable fields of two snapshots, in display order.
pub fn diff_versions(before: &Value, after: &Value) -> Vec<FieldDiff> {
    let before = snapshot_object(before);
    let after = snapshot_object(after);
    EDITABLE_FIELDS
        .iter()
        .map(|&field| {
            let b = field_text(&before, field);
            let a = field_text(&after, field);
            FieldDiff {
                field,
                status: DiffStatus::between(b.as_deref(), a.as_deref()),
                before: b,
                after: a,
            }
        })
        .collect()
}

/// Only the fields whose value differs.
pub fn changed_fields(before: &Value, after: &Value) -> Vec<FieldDiff> {
    diff_versions(before, after)
        .into_iter()
        .filter(|d| d.status != DiffStatus::Unchanged)
        .collect()
}
