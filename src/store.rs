//! Document store
//!
//! The store addresses JSON documents by `/`-separated paths. Overwrites and
//! merges are last-writer-wins; counters are incremented atomically by the
//! store itself.

mod documents;
mod memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::info;

use crate::{
    config::StoreConfig,
    errors::{IngestError, StoreError},
};

pub use documents::*;
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed JSON document storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the document at `path`
    async fn get(&self, path: &str) -> StoreResult<Option<Value>>;

    /// Overwrite the document at `path`
    async fn set(&self, path: &str, value: Value) -> StoreResult<()>;

    /// Merge the top-level fields of `fields` into the document at `path`
    async fn update(&self, path: &str, fields: Value) -> StoreResult<()>;

    /// Write the document only if `path` is vacant, returning whether it was written
    async fn set_if_absent(&self, path: &str, value: Value) -> StoreResult<bool>;

    /// Atomically add `delta` to an integer field, returning the new value
    async fn increment(&self, path: &str, field: &str, delta: i64) -> StoreResult<i64>;
}

/// Reject empty paths, empty segments and reserved characters
pub(crate) fn validate_path(path: &str) -> StoreResult<()> {
    let valid = !path.is_empty()
        && path.split('/').all(|segment| {
            !segment.is_empty()
                && !segment
                    .chars()
                    .any(|c| matches!(c, '.' | '#' | '$' | '[' | ']'))
        });
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

/// Replace server timestamp placeholders with `now_millis`
pub(crate) fn resolve_server_values(value: &mut Value, now_millis: i64) {
    if matches!(value, Value::Object(map) if ServerValue::is_timestamp(map)) {
        *value = Value::from(now_millis);
        return;
    }
    match value {
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| resolve_server_values(v, now_millis)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| resolve_server_values(v, now_millis)),
        _ => {}
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Open the store named by a connection target
///
/// - `postgres://...` or `postgresql://...` opens a [`PgStore`]
/// - `memory:` opens an empty [`MemoryStore`]
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, IngestError> {
    let target = config.target()?;

    if target.starts_with("postgres://") || target.starts_with("postgresql://") {
        let store = PgStore::connect(target).await?;
        info!(kind = "postgres", "Connected to document store");
        Ok(Arc::new(store))
    } else if target.starts_with("memory:") {
        info!(kind = "memory", "Using in-memory document store");
        Ok(Arc::new(MemoryStore::new()))
    } else {
        let scheme = target.split(':').next().unwrap_or_default();
        Err(IngestError::UnsupportedStoreTarget(scheme.to_string()))
    }
}

/// Store handle that is opened on first use and reused afterwards
pub struct StoreConnection {
    config: StoreConfig,
    store: OnceCell<Arc<dyn DocumentStore>>,
}

impl StoreConnection {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            store: OnceCell::new(),
        }
    }

    /// Wrap an already open store
    pub fn from_store(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            config: StoreConfig::default(),
            store: OnceCell::new_with(Some(store)),
        }
    }

    /// Return the open store, connecting first if needed
    ///
    /// A failed attempt leaves the handle unconnected so a later call retries.
    pub async fn get_or_connect(&self) -> Result<Arc<dyn DocumentStore>, IngestError> {
        self.store
            .get_or_try_init(|| connect(&self.config))
            .await
            .cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.store.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_store_paths() {
        assert!(validate_path("devices/AA/status").is_ok());
        assert!(validate_path("raw/pubsub/abc_def").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("devices//status").is_err());
        assert!(validate_path("/devices").is_err());
        assert!(validate_path("devices/a.b").is_err());
        assert!(validate_path("devices/a[0]").is_err());
    }

    #[test]
    fn resolve_nested_server_values() {
        let mut value = json!({
            "at": {".sv": "timestamp"},
            "nested": {"list": [{".sv": "timestamp"}, 1]},
            "other": {".sv": "increment"},
        });
        resolve_server_values(&mut value, 1_700_000_000_000);
        assert_eq!(
            value,
            json!({
                "at": 1_700_000_000_000i64,
                "nested": {"list": [1_700_000_000_000i64, 1]},
                "other": {".sv": "increment"},
            })
        );
    }

    #[tokio::test]
    async fn missing_target_is_a_configuration_error() {
        let connection = StoreConnection::new(StoreConfig { url: None });
        assert!(matches!(
            connection.get_or_connect().await,
            Err(IngestError::MissingStoreTarget)
        ));
        assert!(!connection.is_connected());

        let connection = StoreConnection::new(StoreConfig {
            url: Some("  ".to_string()),
        });
        assert!(matches!(
            connection.get_or_connect().await,
            Err(IngestError::MissingStoreTarget)
        ));
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let connection = StoreConnection::new(StoreConfig {
            url: Some("https://example.firebaseio.com".to_string()),
        });
        match connection.get_or_connect().await {
            Err(IngestError::UnsupportedStoreTarget(scheme)) => assert_eq!(scheme, "https"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn connection_is_reused() {
        let connection = StoreConnection::new(StoreConfig {
            url: Some("memory:".to_string()),
        });
        let first = connection.get_or_connect().await.unwrap();
        first.set("devices/AA", json!({"a": 1})).await.unwrap();

        let second = connection.get_or_connect().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            second.get("devices/AA").await.unwrap(),
            Some(json!({"a": 1}))
        );
    }
}
