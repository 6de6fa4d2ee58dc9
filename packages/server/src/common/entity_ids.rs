//! Typed ID definitions for domain entities.
//!
//! Tasks use database-assigned integer ids (they are exposed in URLs and
//! polled by clients); queue jobs use typed UUIDs generated by the producer.

pub use super::id::Id;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a task record. Assigned by the store at creation, immutable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TaskId(i64);

impl TaskId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

/// Marker type for queue jobs.
pub struct QueueJob;

/// Identifier of a queue job.
pub type JobId = Id<QueueJob>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_round_trips_through_string() {
        let id: TaskId = "42".parse().unwrap();
        assert_eq!(id, TaskId::new(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn task_id_serializes_as_bare_integer() {
        let json = serde_json::to_string(&TaskId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn task_id_rejects_garbage() {
        assert!("abc".parse::<TaskId>().is_err());
    }
}
