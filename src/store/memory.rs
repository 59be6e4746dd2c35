use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::model::{generate_id, Id};
use crate::store::traits::{Filter, Persistence};

/// Reference persistence: every query comes back empty and writes are accepted and dropped
#[derive(Debug, Clone, Default)]
pub struct NullPersistence;

#[async_trait::async_trait]
impl Persistence for NullPersistence {
    async fn find(&self, resource: &str, _filter: &Filter) -> Result<Vec<Value>> {
        log::debug!("find on {} ignored: no persistence configured", resource);
        Ok(Vec::new())
    }

    async fn find_one(&self, _resource: &str, _id: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn insert(&self, resource: &str, _data: Value) -> Result<Id> {
        log::debug!("insert on {} ignored: no persistence configured", resource);
        Ok(generate_id())
    }

    async fn update(&self, _resource: &str, _id: &str, _data: Value) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _resource: &str, _id: &str) -> Result<()> {
        Ok(())
    }
}

/// In-process tables keyed by resource name, records kept in id order
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    tables: RwLock<HashMap<String, BTreeMap<Id, Value>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, resource: &str) -> usize {
        self.tables
            .read()
            .get(resource)
            .map(|t| t.len())
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Persistence for MemoryPersistence {
    async fn find(&self, resource: &str, filter: &Filter) -> Result<Vec<Value>> {
        let tables = self.tables.read();
        let Some(table) = tables.get(resource) else {
            return Ok(Vec::new());
        };

        Ok(table
            .values()
            .filter(|record| matches_filter(record, filter))
            .cloned()
            .collect())
    }

    async fn find_one(&self, resource: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .tables
            .read()
            .get(resource)
            .and_then(|t| t.get(id))
            .cloned())
    }

    async fn insert(&self, resource: &str, data: Value) -> Result<Id> {
        let Value::Object(mut record) = data else {
            return Err(anyhow!("{} records must be JSON objects", resource));
        };

        let id = match record.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => generate_id(),
        };
        record.insert("id".to_string(), Value::String(id.clone()));

        let mut tables = self.tables.write();
        let table = tables.entry(resource.to_string()).or_default();
        if table.contains_key(&id) {
            return Err(anyhow!("{} record {} already exists", resource, id));
        }
        table.insert(id.clone(), Value::Object(record));
        Ok(id)
    }

    async fn update(&self, resource: &str, id: &str, data: Value) -> Result<()> {
        let Value::Object(changes) = data else {
            return Err(anyhow!("{} updates must be JSON objects", resource));
        };

        let mut tables = self.tables.write();
        if let Some(Value::Object(record)) = tables.get_mut(resource).and_then(|t| t.get_mut(id)) {
            for (key, value) in changes {
                if key != "id" {
                    record.insert(key, value);
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, resource: &str, id: &str) -> Result<()> {
        if let Some(table) = self.tables.write().get_mut(resource) {
            table.remove(id);
        }
        Ok(())
    }
}

fn matches_filter(record: &Value, filter: &Filter) -> bool {
    filter.iter().all(|(field, expected)| {
        let actual = record.get(field).unwrap_or(&Value::Null);
        loosely_equal(actual, expected)
    })
}

/// Equality that lets `"30"` from a query string match a stored `30`
fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::String(s), Value::Number(_) | Value::Bool(_)) => *s == expected.to_string(),
        (Value::Number(_) | Value::Bool(_), Value::String(s)) => actual.to_string() == *s,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_null_persistence_is_inert() {
        let store = NullPersistence;
        assert!(store.find("users", &Filter::new()).await.unwrap().is_empty());
        assert!(store.find_one("users", "1").await.unwrap().is_none());
        assert!(!store.insert("users", json!({})).await.unwrap().is_empty());
        store.update("users", "1", json!({})).await.unwrap();
        store.delete("users", "1").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_crud() {
        let store = MemoryPersistence::new();

        let id = store.insert("users", json!({"name": "Ada"})).await.unwrap();
        let record = store.find_one("users", &id).await.unwrap().unwrap();
        assert_eq!(record["name"], json!("Ada"));
        assert_eq!(record["id"], json!(id));

        store
            .update("users", &id, json!({"name": "Grace", "id": "ignored"}))
            .await
            .unwrap();
        let record = store.find_one("users", &id).await.unwrap().unwrap();
        assert_eq!(record["name"], json!("Grace"));
        assert_eq!(record["id"], json!(id));

        store.delete("users", &id).await.unwrap();
        assert!(store.find_one("users", &id).await.unwrap().is_none());
        assert_eq!(store.count("users"), 0);
    }

    #[tokio::test]
    async fn test_memory_find_with_filter() {
        let store = MemoryPersistence::new();
        store
            .insert("users", json!({"id": "a", "role": "admin", "age": 30}))
            .await
            .unwrap();
        store
            .insert("users", json!({"id": "b", "role": "viewer", "age": 41}))
            .await
            .unwrap();

        let all = store.find("users", &Filter::new()).await.unwrap();
        assert_eq!(all.len(), 2);

        let mut filter = Filter::new();
        filter.insert("role".into(), json!("admin"));
        let admins = store.find("users", &filter).await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0]["id"], json!("a"));

        let mut filter = Filter::new();
        filter.insert("age".into(), json!("41"));
        let by_age = store.find("users", &filter).await.unwrap();
        assert_eq!(by_age[0]["id"], json!("b"));

        assert!(store.find("orders", &Filter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_insert_rejects_duplicates_and_non_objects() {
        let store = MemoryPersistence::new();
        store.insert("users", json!({"id": "a"})).await.unwrap();
        assert!(store.insert("users", json!({"id": "a"})).await.is_err());
        assert!(store.insert("users", json!("nope")).await.is_err());
    }
}
