//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を Phantom type パターンでラップしています。
//! - 時刻でソート可能（生成順 = 辞書順）
//! - 複数ワーカープロセスで調整なしに生成可能
//! - `TaskId` と `CompetitionId` はコンパイル時に区別される
//!
//! 文字列表現はプレフィックス付き（`task-01H…`）で、API のレスポンスや
//! SharedStore のキーにそのまま使います。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"task-", "comp-", "job-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when a prefixed id string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id {input:?}: expected prefix {expected_prefix:?} followed by a ULID")]
pub struct ParseIdError {
    pub input: String,
    pub expected_prefix: &'static str,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            input: s.to_string(),
            expected_prefix: T::prefix(),
        };
        let raw = s.strip_prefix(T::prefix()).ok_or_else(err)?;
        let ulid = Ulid::from_string(raw).map_err(|_| err())?;
        Ok(Self::from_ulid(ulid))
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Competition {}

impl IdMarker for Competition {
    fn prefix() -> &'static str {
        "comp-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// Identifier of an admitted Task.
pub type TaskId = Id<Task>;

/// Identifier of an admitted Competition (one tournament round).
pub type CompetitionId = Id<Competition>;

/// Identifier of a QueueJob (one unit of work on a named queue).
pub type JobId = Id<Job>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefix() {
        let ulid = Ulid::new();
        assert!(TaskId::from_ulid(ulid).to_string().starts_with("task-"));
        assert!(CompetitionId::from_ulid(ulid).to_string().starts_with("comp-"));
        assert!(JobId::from_ulid(ulid).to_string().starts_with("job-"));
    }

    #[test]
    fn parse_rejects_foreign_prefix() {
        let task = TaskId::from_ulid(Ulid::new());
        let err = task.to_string().parse::<CompetitionId>().unwrap_err();
        assert_eq!(err.expected_prefix, "comp-");
    }

    #[test]
    fn serializes_as_prefixed_string() {
        let id = CompetitionId::from_ulid(Ulid::new());
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));

        let back: CompetitionId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = JobId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = JobId::from_ulid(Ulid::new());
        assert!(id1 < id2);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<Ulid>());
    }
}
