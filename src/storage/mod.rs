pub mod locks;
pub mod memory;
pub mod redis;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::RenderedSticker;

/// Keyed string store behind quota records and pack metadata.
///
/// Values are opaque strings (JSON in practice). Every mutation that depends
/// on the previous value goes through [`KeyValueStore::compare_and_set`], so
/// concurrent writers never lose updates.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> AppResult<()>;

    /// Stores `value` if the key is absent and returns whatever is stored.
    async fn get_or_create(&self, key: &str, value: &str) -> AppResult<String>;

    /// Writes `value` only if the current value equals `expected`
    /// (`None` meaning absent). Returns whether the write happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> AppResult<bool>;

    async fn increment(&self, key: &str, by: i64) -> AppResult<i64>;

    async fn delete(&self, key: &str) -> AppResult<()>;
}

pub type DynStore = Arc<dyn KeyValueStore>;

const MAX_CAS_ATTEMPTS: usize = 16;

pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> AppResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Read-modify-write of a JSON record under compare-and-set.
///
/// `init` builds the record when the key is absent. `mutate` may fail to
/// abort the update; nothing is written in that case.
pub async fn update_json<T, I, F>(
    store: &dyn KeyValueStore,
    key: &str,
    init: I,
    mut mutate: F,
) -> AppResult<T>
where
    T: Serialize + DeserializeOwned,
    I: Fn() -> T,
    F: FnMut(&mut T) -> AppResult<()>,
{
    for _ in 0..MAX_CAS_ATTEMPTS {
        let raw = store.get(key).await?;
        let mut record = match &raw {
            Some(raw) => serde_json::from_str(raw)?,
            None => init(),
        };

        mutate(&mut record)?;

        let updated = serde_json::to_string(&record)?;
        if store.compare_and_set(key, raw.as_deref(), &updated).await? {
            return Ok(record);
        }
        tracing::debug!(key, "Concurrent update, retrying");
    }

    Err(AppError::Internal(anyhow::anyhow!(
        "too much contention updating {}",
        key
    )))
}

/// Pack as reported by the upstream store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamPack {
    pub name: String,
    pub title: String,
    pub sticker_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    PackInvalid,
    PackFull,
    EmojiInvalid,
    OwnerInvalid,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// Worth retrying: rate limiting, timeouts, 5xx, dropped connections.
    #[error("transient upstream failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    /// Will not succeed without different input.
    #[error("terminal upstream failure ({kind:?}): {message}")]
    Terminal { kind: TerminalKind, message: String },
}

impl UpstreamError {
    pub fn transient(message: impl Into<String>) -> Self {
        UpstreamError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn terminal(kind: TerminalKind, message: impl Into<String>) -> Self {
        UpstreamError::Terminal {
            kind,
            message: message.into(),
        }
    }
}

/// The remote store that owns sticker packs.
#[async_trait]
pub trait PackStore: Send + Sync {
    /// `Ok(None)` when no pack with that name exists.
    async fn get_pack(&self, name: &str) -> Result<Option<UpstreamPack>, UpstreamError>;

    /// Creates the pack seeded with `sticker`.
    async fn create_pack(
        &self,
        owner: i64,
        name: &str,
        title: &str,
        sticker: &RenderedSticker,
        emoji: &str,
    ) -> Result<(), UpstreamError>;

    async fn add_sticker(
        &self,
        owner: i64,
        name: &str,
        sticker: &RenderedSticker,
        emoji: &str,
    ) -> Result<(), UpstreamError>;
}
