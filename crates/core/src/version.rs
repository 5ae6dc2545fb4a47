//! Append-only edit log entries for a record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::{diff_versions, FieldDiff};
use crate::types::{deserialize_id, DbId, Timestamp};

/// One entry in a record's edit history.
///
/// `before` and `after` are opaque to the client; the server sends them as
/// JSON strings or objects. Only `reason` may change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordVersion {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: DbId,
    #[serde(default)]
    pub record_id: DbId,
    pub changed_at: Timestamp,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub before: Value,
    #[serde(default)]
    pub after: Value,
}

impl RecordVersion {
    pub fn diff(&self) -> Vec<FieldDiff> {
        diff_versions(&self.before, &self.after)
    }
}

/// Order versions newest first: by `changed_at`, then by id for ties.
pub fn sort_newest_first(versions: &mut [RecordVersion]) {
    versions.sort_by(|a, b| {
        b.changed_at
            .cmp(&a.changed_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// What a rollback to a given version is expected to do.
///
/// The server decides; this only predicts its observed behaviour so a
/// caller can label the action before issuing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackKind {
    /// Target is the newest version: its `before` state comes back.
    Undo,
    /// Target is older: its `after` state comes back.
    Restore,
}

impl RollbackKind {
    /// Predict the rollback kind for `version_id` within `history`.
    /// Returns `None` if the version is not in the history.
    pub fn predict(version_id: DbId, history: &[RecordVersion]) -> Option<Self> {
        if !history.iter().any(|v| v.id == version_id) {
            return None;
        }
        let has_newer = history.iter().any(|v| v.id > version_id);
        Some(if has_newer { Self::Restore } else { Self::Undo })
    }

    /// Label the server records as the new version's reason.
    pub fn reason(&self, version_id: DbId) -> String {
        match self {
            Self::Undo => format!("Undo (Revert) Change #{version_id}"),
            Self::Restore => format!("Restore to State #{version_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn version(id: DbId, secs: i64) -> RecordVersion {
        RecordVersion {
            id,
            record_id: 1,
            changed_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            reason: String::new(),
            before: Value::Null,
            after: Value::Null,
        }
    }

    #[test]
    fn parses_server_version() {
        let v: RecordVersion = serde_json::from_value(serde_json::json!({
            "id": 4,
            "record_id": 2,
            "before": "{\"phone\":\"138\"}",
            "after": "{\"phone\":\"13800000000\"}",
            "changed_at": "2026-03-01T10:00:00Z",
            "reason": "typo"
        }))
        .unwrap();
        assert_eq!(v.diff()[1].after.as_deref(), Some("13800000000"));
    }

    #[test]
    fn sorts_newest_first_with_id_tiebreak() {
        let mut list = vec![version(1, 0), version(3, 10), version(2, 10)];
        sort_newest_first(&mut list);
        let ids: Vec<_> = list.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn predicts_undo_for_latest_and_restore_for_older() {
        let history = vec![version(5, 0), version(9, 5)];
        assert_eq!(RollbackKind::predict(9, &history), Some(RollbackKind::Undo));
        assert_eq!(RollbackKind::predict(5, &history), Some(RollbackKind::Restore));
        assert_eq!(RollbackKind::predict(7, &history), None);
        assert_eq!(RollbackKind::Undo.reason(9), "Undo (Revert) Change #9");
    }
}
