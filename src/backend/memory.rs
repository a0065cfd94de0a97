//! In-memory backend used by the server binary and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{Backend, BackendError, Filter};

/// Tables of JSON records held in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts each record of `records` into `table`.
    pub async fn seed(&self, table: &str, records: Vec<Value>) -> Result<(), BackendError> {
        for record in records {
            self.insert(table, record).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, BackendError> {
        let tables = self.tables.read().await;
        let rows: Vec<Value> = tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        Ok(rows)
    }

    async fn insert(&self, table: &str, record: Value) -> Result<Value, BackendError> {
        let Value::Object(mut fields) = record else {
            return Err(BackendError::InvalidRecord(
                "record must be a JSON object".to_string(),
            ));
        };

        fields
            .entry("id")
            .or_insert_with(|| Value::from(Uuid::new_v4().to_string()));
        fields.insert(
            "created_at".to_string(),
            Value::from(chrono::Utc::now().to_rfc3339()),
        );
        let record = Value::Object(fields);

        let mut tables = self.tables.write().await;
        tables
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        debug!(table, "Inserted record");

        Ok(record)
    }

    async fn delete(&self, table: &str, id: &str, filter: &Filter) -> Result<(), BackendError> {
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| BackendError::NotFound(format!("{} {}", table, id)))?;

        let position = rows
            .iter()
            .position(|r| r.get("id").and_then(Value::as_str) == Some(id) && filter.matches(r))
            .ok_or_else(|| BackendError::NotFound(format!("{} {}", table, id)))?;

        rows.remove(position);
        Ok(())
    }
}
