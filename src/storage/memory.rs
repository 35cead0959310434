use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::KeyValueStore;
use crate::error::{AppError, AppResult};

/// Process-local store. State is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_or_create(&self, key: &str, value: &str) -> AppResult<String> {
        let mut entries = self.entries.write().await;
        Ok(entries
            .entry(key.to_string())
            .or_insert_with(|| value.to_string())
            .clone())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> AppResult<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn increment(&self, key: &str, by: i64) -> AppResult<i64> {
        let mut entries = self.entries.write().await;
        let current = match entries.get(key) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                AppError::Internal(anyhow::anyhow!("value at {} is not an integer", key))
            })?,
            None => 0,
        };
        let next = current + by;
        entries.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
