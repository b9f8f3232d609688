// src/store/memory.rs
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{now_millis, resolve_server_values, validate_path, DocumentStore, StoreResult};
use crate::errors::StoreError;

/// Document store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored document, keyed by path
    pub async fn snapshot(&self) -> BTreeMap<String, Value> {
        self.documents.lock().await.clone()
    }

    /// Paths stored below `prefix`
    pub async fn paths_under(&self, prefix: &str) -> Vec<String> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.documents
            .lock()
            .await
            .keys()
            .filter(|path| path.starts_with(&prefix))
            .cloned()
            .collect()
    }
}

fn prepare(path: &str, mut value: Value) -> StoreResult<Value> {
    validate_path(path)?;
    resolve_server_values(&mut value, now_millis());
    Ok(value)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        validate_path(path)?;
        Ok(self.documents.lock().await.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> StoreResult<()> {
        let value = prepare(path, value)?;
        self.documents.lock().await.insert(path.to_string(), value);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> StoreResult<()> {
        let Value::Object(fields) = prepare(path, fields)? else {
            return Err(StoreError::InvalidUpdate(path.to_string()));
        };

        let mut documents = self.documents.lock().await;
        match documents.get_mut(path) {
            Some(Value::Object(existing)) => existing.extend(fields),
            _ => {
                documents.insert(path.to_string(), Value::Object(fields));
            }
        }
        Ok(())
    }

    async fn set_if_absent(&self, path: &str, value: Value) -> StoreResult<bool> {
        let value = prepare(path, value)?;
        let mut documents = self.documents.lock().await;
        if documents.contains_key(path) {
            return Ok(false);
        }
        documents.insert(path.to_string(), value);
        Ok(true)
    }

    async fn increment(&self, path: &str, field: &str, delta: i64) -> StoreResult<i64> {
        validate_path(path)?;
        let not_a_counter = || StoreError::NotACounter {
            path: path.to_string(),
            field: field.to_string(),
        };

        let mut documents = self.documents.lock().await;
        let document = documents
            .entry(path.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        let Value::Object(fields) = document else {
            return Err(not_a_counter());
        };

        let current = match fields.get(field) {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_i64().ok_or_else(not_a_counter)?,
        };
        let next = current + delta;
        fields.insert(field.to_string(), Value::from(next));
        Ok(next)
    }
}
