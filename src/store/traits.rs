use anyhow::Result;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::model::Id;

/// Equality filter applied by `find`
pub type Filter = Map<String, Value>;

/// Record storage the `db.*` actions delegate to
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    /// Multi-row query; an empty filter matches every record of the resource
    async fn find(&self, resource: &str, filter: &Filter) -> Result<Vec<Value>>;
    /// Single-row lookup by id
    async fn find_one(&self, resource: &str, id: &str) -> Result<Option<Value>>;
    /// Persist a new record and return its id
    async fn insert(&self, resource: &str, data: Value) -> Result<Id>;
    async fn update(&self, resource: &str, id: &str, data: Value) -> Result<()>;
    async fn delete(&self, resource: &str, id: &str) -> Result<()>;
}

/// Key/value cache the `cache.*` actions delegate to
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    /// Store `value`; `None` uses the store's default time-to-live
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;
}
