use std::future::Future;
use std::sync::Arc;

use chrono::Utc;

use super::retry::{RetryDecision, RetryError, RetryPolicy};
use crate::config::PackConfig;
use crate::error::{AppError, AppResult};
use crate::models::{manual_attach_link, RenderedSticker, StickerPack, UserPacks};
use crate::storage::{
    load_json, update_json, DynStore, PackStore, TerminalKind, UpstreamError, UpstreamPack,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The pack was created upstream, seeded with the given sticker.
    Created,
    /// The pack already existed; nothing was uploaded.
    Existing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached { sticker_count: u32 },
    /// Upstream kept failing transiently; the user has to add the sticker by
    /// hand.
    Deferred { manual_link: String },
}

/// Keeps local pack metadata in step with the upstream pack store.
pub struct PackManager {
    store: DynStore,
    upstream: Arc<dyn PackStore>,
    config: PackConfig,
    retry: RetryPolicy,
}

fn pack_key(name: &str) -> String {
    format!("pack:{}", name)
}

fn owner_key(owner: i64) -> String {
    format!("packs:{}", owner)
}

fn classify(err: &UpstreamError) -> RetryDecision {
    match err {
        UpstreamError::Transient { retry_after, .. } => RetryDecision::Retry(*retry_after),
        UpstreamError::Terminal { .. } => RetryDecision::Stop,
    }
}

fn terminal_error(kind: TerminalKind, message: String) -> AppError {
    match kind {
        TerminalKind::PackInvalid | TerminalKind::OwnerInvalid => AppError::PackInvalid,
        TerminalKind::PackFull => AppError::PackFull,
        TerminalKind::EmojiInvalid | TerminalKind::Other => AppError::Upstream(message),
    }
}

impl PackManager {
    pub fn new(store: DynStore, upstream: Arc<dyn PackStore>, config: PackConfig) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            store,
            upstream,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    /// Runs one upstream call under the retry policy, each attempt bounded by
    /// the attempt timeout.
    async fn call<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryError<UpstreamError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let timeout = self.config.attempt_timeout;
        self.retry
            .run(
                operation,
                |_| {
                    let attempt = op();
                    async move {
                        match tokio::time::timeout(timeout, attempt).await {
                            Ok(result) => result,
                            Err(_) => Err(UpstreamError::transient("attempt timed out")),
                        }
                    }
                },
                classify,
            )
            .await
    }

    /// Makes sure the pack exists upstream. Idempotent: an existing pack is
    /// left untouched, a missing one is created seeded with `first_sticker`.
    pub async fn ensure_pack(
        &self,
        owner: i64,
        name: &str,
        title: &str,
        first_sticker: &RenderedSticker,
        emoji: &str,
    ) -> AppResult<EnsureOutcome> {
        let existing = match self.call("get_pack", || self.upstream.get_pack(name)).await {
            Ok(existing) => existing,
            Err(e) => return Err(self.upstream_failure(name, e)),
        };

        if let Some(pack) = existing {
            self.record_upstream(owner, &pack).await?;
            tracing::debug!(pack = %name, owner, "Pack already exists");
            return Ok(EnsureOutcome::Existing);
        }

        if let Err(e) = self
            .call("create_pack", || {
                self.upstream
                    .create_pack(owner, name, title, first_sticker, emoji)
            })
            .await
        {
            return Err(self.upstream_failure(name, e));
        }

        self.record_upstream(
            owner,
            &UpstreamPack {
                name: name.to_string(),
                title: title.to_string(),
                sticker_count: 1,
            },
        )
        .await?;
        tracing::info!(pack = %name, owner, "Pack created");
        Ok(EnsureOutcome::Created)
    }

    /// Adds a sticker to an existing pack.
    ///
    /// A locally full pack fails with [`AppError::PackFull`] before any
    /// network call. The slot is reserved through compare-and-set before the
    /// upload and released again if the upload does not go through.
    pub async fn attach(
        &self,
        owner: i64,
        name: &str,
        sticker: &RenderedSticker,
        emoji: &str,
    ) -> AppResult<AttachOutcome> {
        let key = pack_key(name);

        let local = load_json::<StickerPack>(self.store.as_ref(), &key).await?;
        if let Some(local) = &local {
            if local.is_full() {
                tracing::info!(pack = %name, count = local.sticker_count, "Pack is full");
                return Err(AppError::PackFull);
            }
        }

        // A pack with no local record is always looked up so its metadata
        // and owner index entry come from upstream.
        if self.config.verify_before_attach || local.is_none() {
            match self.call("get_pack", || self.upstream.get_pack(name)).await {
                Ok(Some(pack)) => {
                    let local = self.record_upstream(owner, &pack).await?;
                    if local.is_full() {
                        return Err(AppError::PackFull);
                    }
                }
                Ok(None) => {
                    tracing::warn!(pack = %name, "Pack no longer exists upstream");
                    self.store.delete(&key).await?;
                    return Err(AppError::PackInvalid);
                }
                Err(RetryError::Exhausted { last, .. }) => {
                    tracing::warn!(pack = %name, "Could not verify pack: {}", last);
                    return Ok(self.deferred(name));
                }
                Err(RetryError::Stopped(e)) => return Err(self.terminal(name, e).await?),
            }
        }

        let capacity = self.config.capacity;
        let reserved = update_json(
            self.store.as_ref(),
            &key,
            || new_pack(owner, name, name, 0, capacity),
            |pack| {
                if pack.is_full() {
                    return Err(AppError::PackFull);
                }
                pack.sticker_count += 1;
                pack.updated_at = Utc::now();
                Ok(())
            },
        )
        .await?;

        let result = self
            .call("add_sticker", || {
                self.upstream.add_sticker(owner, name, sticker, emoji)
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(pack = %name, count = reserved.sticker_count, "Sticker attached");
                Ok(AttachOutcome::Attached {
                    sticker_count: reserved.sticker_count,
                })
            }
            Err(e) => {
                self.release_slot(name).await?;
                match e {
                    RetryError::Exhausted { attempts, last } => {
                        tracing::warn!(pack = %name, attempts, "Attach deferred: {}", last);
                        Ok(self.deferred(name))
                    }
                    RetryError::Stopped(e) => Err(self.terminal(name, e).await?),
                }
            }
        }
    }

    /// Packs the user owns, from local metadata.
    pub async fn list_packs(&self, owner: i64) -> AppResult<Vec<StickerPack>> {
        let index: UserPacks = load_json(self.store.as_ref(), &owner_key(owner))
            .await?
            .unwrap_or_default();

        let mut packs = Vec::with_capacity(index.names.len());
        for name in &index.names {
            if let Some(pack) = load_json(self.store.as_ref(), &pack_key(name)).await? {
                packs.push(pack);
            }
        }
        Ok(packs)
    }

    fn deferred(&self, name: &str) -> AttachOutcome {
        AttachOutcome::Deferred {
            manual_link: manual_attach_link(name),
        }
    }

    fn upstream_failure(&self, name: &str, err: RetryError<UpstreamError>) -> AppError {
        match err {
            RetryError::Exhausted { last, .. } => AppError::UpstreamExhausted(last.to_string()),
            RetryError::Stopped(UpstreamError::Terminal { kind, message }) => {
                tracing::warn!(pack = %name, ?kind, "Upstream rejected pack operation: {}", message);
                terminal_error(kind, message)
            }
            RetryError::Stopped(e) => AppError::Upstream(e.to_string()),
        }
    }

    /// Maps a terminal upstream failure, fixing up local metadata on the way.
    async fn terminal(&self, name: &str, err: UpstreamError) -> AppResult<AppError> {
        let (kind, message) = match err {
            UpstreamError::Terminal { kind, message } => (kind, message),
            other => return Ok(AppError::Upstream(other.to_string())),
        };
        tracing::warn!(pack = %name, ?kind, "Upstream rejected sticker: {}", message);

        match kind {
            TerminalKind::PackFull => {
                let key = pack_key(name);
                if load_json::<StickerPack>(self.store.as_ref(), &key).await?.is_some() {
                    let capacity = self.config.capacity;
                    update_json(
                        self.store.as_ref(),
                        &key,
                        || new_pack(0, name, name, capacity, capacity),
                        |pack| {
                            pack.sticker_count = pack.capacity;
                            Ok(())
                        },
                    )
                    .await?;
                }
            }
            TerminalKind::PackInvalid => self.store.delete(&pack_key(name)).await?,
            _ => {}
        }
        Ok(terminal_error(kind, message))
    }

    async fn release_slot(&self, name: &str) -> AppResult<()> {
        let capacity = self.config.capacity;
        update_json(
            self.store.as_ref(),
            &pack_key(name),
            || new_pack(0, name, name, 0, capacity),
            |pack| {
                pack.sticker_count = pack.sticker_count.saturating_sub(1);
                Ok(())
            },
        )
        .await?;
        Ok(())
    }

    /// Writes the upstream view of a pack into local metadata and the owner
    /// index.
    async fn record_upstream(&self, owner: i64, upstream: &UpstreamPack) -> AppResult<StickerPack> {
        let capacity = self.config.capacity;
        let pack = update_json(
            self.store.as_ref(),
            &pack_key(&upstream.name),
            || new_pack(owner, &upstream.name, &upstream.title, 0, capacity),
            |pack| {
                pack.sticker_count = upstream.sticker_count.min(pack.capacity);
                pack.title = upstream.title.clone();
                pack.updated_at = Utc::now();
                Ok(())
            },
        )
        .await?;

        update_json(
            self.store.as_ref(),
            &owner_key(owner),
            UserPacks::default,
            |index| {
                if !index.names.contains(&upstream.name) {
                    index.names.push(upstream.name.clone());
                }
                Ok(())
            },
        )
        .await?;

        Ok(pack)
    }
}

fn new_pack(owner: i64, name: &str, title: &str, count: u32, capacity: u32) -> StickerPack {
    let now = Utc::now();
    StickerPack {
        owner,
        name: name.to_string(),
        title: title.to_string(),
        sticker_count: count,
        capacity,
        created_at: now,
        updated_at: now,
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockPackStore;
    use super::*;
    use crate::models::StickerFormat;
    use crate::storage::memory::MemoryStore;
    use crate::storage::KeyValueStore;
    use std::time::Duration;

    const PACK: &str = "fun_1_by_demo_bot";

    fn sticker() -> RenderedSticker {
        RenderedSticker::new(b"RIFF\0\0\0\0WEBPVP8L".to_vec(), StickerFormat::WebP)
    }

    fn config(verify: bool) -> PackConfig {
        PackConfig {
            capacity: 5,
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            attempt_timeout: Duration::from_secs(1),
            deadline: Duration::from_secs(5),
            verify_before_attach: verify,
            ..PackConfig::default()
        }
    }

    fn manager(upstream: Arc<MockPackStore>, verify: bool) -> (PackManager, DynStore) {
        let store: DynStore = Arc::new(MemoryStore::new());
        (PackManager::new(store.clone(), upstream, config(verify)), store)
    }

    async fn seed_local(store: &DynStore, count: u32) {
        let pack = new_pack(1, PACK, "Fun", count, 5);
        store
            .set(&pack_key(PACK), &serde_json::to_string(&pack).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ensure_pack_creates_once_then_no_ops() {
        let upstream = Arc::new(MockPackStore::default());
        let (manager, _) = manager(upstream.clone(), true);

        let first = manager.ensure_pack(1, PACK, "Fun", &sticker(), "😊").await.unwrap();
        assert_eq!(first, EnsureOutcome::Created);
        let (get_before, _, _) = upstream.calls();

        let second = manager.ensure_pack(1, PACK, "Fun", &sticker(), "😊").await.unwrap();
        assert_eq!(second, EnsureOutcome::Existing);

        let (get, create, add) = upstream.calls();
        assert_eq!(create, 1);
        assert_eq!(get - get_before, 1, "second ensure is a single lookup");
        assert_eq!(add, 0);

        let packs = manager.list_packs(1).await.unwrap();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].sticker_count, 1);
    }

    #[tokio::test]
    async fn full_pack_fails_without_network_calls() {
        let upstream = Arc::new(MockPackStore::with_pack(PACK, 5));
        let (manager, store) = manager(upstream.clone(), true);
        seed_local(&store, 5).await;

        let result = manager.attach(1, PACK, &sticker(), "😊").await;
        assert!(matches!(result, Err(AppError::PackFull)));
        assert_eq!(upstream.network_calls(), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let upstream = Arc::new(MockPackStore::with_pack(PACK, 1));
        upstream.fail_adds([
            UpstreamError::transient("429"),
            UpstreamError::transient("timeout"),
        ]);
        let (manager, store) = manager(upstream.clone(), false);
        seed_local(&store, 1).await;

        let outcome = manager.attach(1, PACK, &sticker(), "😊").await.unwrap();
        assert_eq!(outcome, AttachOutcome::Attached { sticker_count: 2 });
        assert_eq!(upstream.calls().2, 3);
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let upstream = Arc::new(MockPackStore::with_pack(PACK, 1));
        *upstream.add_always.lock().unwrap() = Some(UpstreamError::terminal(
            TerminalKind::EmojiInvalid,
            "STICKER_EMOJI_INVALID",
        ));
        let (manager, store) = manager(upstream.clone(), false);
        seed_local(&store, 1).await;

        let result = manager.attach(1, PACK, &sticker(), "x").await;
        assert!(matches!(result, Err(AppError::Upstream(_))));
        assert_eq!(upstream.calls().2, 1);

        let local: StickerPack = load_json(store.as_ref(), &pack_key(PACK)).await.unwrap().unwrap();
        assert_eq!(local.sticker_count, 1, "reserved slot is released");
    }

    #[tokio::test]
    async fn exhausted_retries_defer_to_manual_attach() {
        let upstream = Arc::new(MockPackStore::with_pack(PACK, 1));
        *upstream.add_always.lock().unwrap() = Some(UpstreamError::transient("429"));
        let (manager, store) = manager(upstream.clone(), false);
        seed_local(&store, 1).await;

        let outcome = manager.attach(1, PACK, &sticker(), "😊").await.unwrap();
        assert_eq!(
            outcome,
            AttachOutcome::Deferred {
                manual_link: format!("https://t.me/addstickers/{}", PACK)
            }
        );
        assert_eq!(upstream.calls().2, 3);

        let local: StickerPack = load_json(store.as_ref(), &pack_key(PACK)).await.unwrap().unwrap();
        assert_eq!(local.sticker_count, 1);
    }

    #[tokio::test]
    async fn verification_catches_missing_and_full_packs() {
        let upstream = Arc::new(MockPackStore::default());
        let (manager, store) = manager(upstream.clone(), true);
        seed_local(&store, 1).await;

        let result = manager.attach(1, PACK, &sticker(), "😊").await;
        assert!(matches!(result, Err(AppError::PackInvalid)));
        assert_eq!(upstream.calls(), (1, 0, 0));

        // Upstream count is ahead of the local one.
        upstream.packs.lock().unwrap().insert(PACK.to_string(), 5);
        seed_local(&store, 2).await;
        let result = manager.attach(1, PACK, &sticker(), "😊").await;
        assert!(matches!(result, Err(AppError::PackFull)));
        assert_eq!(upstream.calls().2, 0);
    }

    #[tokio::test]
    async fn unknown_pack_is_seeded_from_upstream_without_verification() {
        let upstream = Arc::new(MockPackStore::with_pack(PACK, 2));
        let (manager, store) = manager(upstream.clone(), false);

        let outcome = manager.attach(1, PACK, &sticker(), "😊").await.unwrap();
        assert_eq!(outcome, AttachOutcome::Attached { sticker_count: 3 });
        assert_eq!(upstream.calls(), (1, 0, 1));

        let packs = manager.list_packs(1).await.unwrap();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].name, PACK);
        assert_eq!(packs[0].sticker_count, 3);

        // Known locally now: no further lookups.
        manager.attach(1, PACK, &sticker(), "😊").await.unwrap();
        assert_eq!(upstream.calls(), (1, 0, 2));

        let result = manager.attach(1, "gone_1_by_demo_bot", &sticker(), "😊").await;
        assert!(matches!(result, Err(AppError::PackInvalid)));
        assert_eq!(upstream.calls().2, 2);
        assert!(store.get(&pack_key("gone_1_by_demo_bot")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_attaches_cannot_overfill() {
        let upstream = Arc::new(MockPackStore::with_pack(PACK, 4));
        let (manager, store) = manager(upstream.clone(), false);
        seed_local(&store, 4).await;
        let manager = Arc::new(manager);

        let (first, second) = (sticker(), sticker());
        let (a, b) = tokio::join!(
            manager.attach(1, PACK, &first, "😊"),
            manager.attach(1, PACK, &second, "😊"),
        );
        let attached = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Ok(AttachOutcome::Attached { .. })))
            .count();
        let full = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(AppError::PackFull)))
            .count();
        assert_eq!((attached, full), (1, 1));

        let local: StickerPack = load_json(store.as_ref(), &pack_key(PACK)).await.unwrap().unwrap();
        assert_eq!(local.sticker_count, 5);
    }
}
