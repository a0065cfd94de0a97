//! Backend Module
//!
//! The data source behind the cached endpoints. Handlers reach records by
//! table name and an equality filter; the cache never sees this layer.

mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryBackend;

// == Backend Error ==
#[derive(Error, Debug)]
pub enum BackendError {
    /// No record matched
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Record payload was rejected
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Data source could not serve the request
    #[error("Database error: {0}")]
    Unavailable(String),
}

// == Filter ==
/// Equality predicate over top-level record fields.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: BTreeMap<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `field == value` condition.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(field.into(), value.into());
        self
    }

    /// Returns true if every condition holds for `record`.
    pub fn matches(&self, record: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }
}

// == Backend Trait ==
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns all records in `table` matching `filter`.
    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, BackendError>;

    /// Stores `record` in `table` and returns it with generated fields.
    async fn insert(&self, table: &str, record: Value) -> Result<Value, BackendError>;

    /// Removes the record with `id` if it also matches `filter`.
    async fn delete(&self, table: &str, id: &str, filter: &Filter) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches() {
        let record = json!({"user_id": "A", "status": "open", "priority": 2});

        assert!(Filter::new().matches(&record));
        assert!(Filter::new().eq("user_id", "A").matches(&record));
        assert!(Filter::new().eq("user_id", "A").eq("priority", 2).matches(&record));
        assert!(!Filter::new().eq("user_id", "B").matches(&record));
        assert!(!Filter::new().eq("missing", "x").matches(&record));
    }
}
