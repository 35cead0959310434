use std::sync::Arc;

use crate::{
    config::TelegramConfig,
    error::{AppError, AppResult},
    models::{
        derive_pack_name, manual_attach_link, CreationMode, DialogueEvent, MenuButton,
        QuotaStatus, QuotaTier, RenderedSticker, StickerPack, StyleRequest, UserSession,
    },
    render::{EncodeProfile, Renderer},
    services::{
        packs::{AttachOutcome, EnsureOutcome, PackManager},
        quota::QuotaLedger,
        session::{Reply, SessionAction, SessionMachine, SessionStore},
    },
    storage::locks::UserLocks,
};

/// Everything sent back to the transport for one inbound event.
#[derive(Debug, Clone, Default)]
pub struct BotReply {
    pub text: String,
    pub buttons: Vec<MenuButton>,
    pub sticker: Option<RenderedSticker>,
    pub manual_attach_link: Option<String>,
}

impl From<Reply> for BotReply {
    fn from(reply: Reply) -> Self {
        Self {
            text: reply.text,
            buttons: reply.buttons,
            ..Self::default()
        }
    }
}

/// What happened to the produced sticker on the pack side.
enum Delivery {
    Attached { pack: String },
    Deferred { pack: String, manual_link: String },
}

pub struct StickersService {
    sessions: SessionStore,
    locks: UserLocks,
    machine: SessionMachine,
    quota: QuotaLedger,
    packs: PackManager,
    renderer: Renderer,
    bot_username: String,
}

fn tier_for(mode: Option<CreationMode>) -> QuotaTier {
    match mode {
        Some(CreationMode::Advanced) => QuotaTier::Limited,
        Some(CreationMode::Simple) | None => QuotaTier::Unlimited,
    }
}

impl StickersService {
    pub fn new(
        machine: SessionMachine,
        quota: QuotaLedger,
        packs: PackManager,
        renderer: Renderer,
        telegram: &TelegramConfig,
    ) -> Self {
        Self {
            sessions: SessionStore::new(),
            locks: UserLocks::new(),
            machine,
            quota,
            packs,
            renderer,
            bot_username: telegram.bot_username.clone(),
        }
    }

    /// Feeds one dialogue event through the session and runs whatever work
    /// the transition asks for.
    pub async fn handle_event(&self, user_id: i64, event: DialogueEvent) -> AppResult<BotReply> {
        let guard = self.locks.lock(user_id).await;
        let mut session = self.sessions.load(user_id).await;

        let transition = self.machine.handle(&mut session, event);

        match transition.action {
            SessionAction::None => {
                self.sessions.save(session).await;
                Ok(transition.reply.into())
            }
            SessionAction::ShowQuota => {
                self.sessions.save(session.clone()).await;
                let status = self.quota_status(user_id).await?;
                let mut reply: BotReply = self.machine.prompt(&session).into();
                reply.text = format!("{}\n{}", quota_text(&status), reply.text);
                Ok(reply)
            }
            SessionAction::Create => {
                // Leave ReadyToCreate and take the quota unit before the lock
                // is released, so a repeated create finds nothing to create.
                let snapshot = session.clone();
                let tier = tier_for(snapshot.mode);
                let request = snapshot.style_request();
                let reserved = match &request {
                    Some(_) => Some(self.quota.consume(user_id, tier).await),
                    None => None,
                };

                self.machine.complete(&mut session);
                self.sessions.save(session.clone()).await;
                let revision = session.revision;

                let error = match (request, reserved) {
                    (Some(request), Some(Ok(_))) => {
                        drop(guard);
                        return self.create(snapshot, request, tier, revision).await;
                    }
                    (_, Some(Err(e @ AppError::QuotaExceeded { .. }))) => {
                        tracing::info!(user_id, "Creation blocked by quota");
                        e
                    }
                    (_, Some(Err(e))) => return Err(e),
                    _ => AppError::Validation("Please send some text.".into()),
                };
                let mut reply: BotReply = self.machine.prompt(&session).into();
                reply.text = error.user_message();
                Ok(reply)
            }
        }
    }

    /// Quota of the limited tier, which is the one that can run out.
    pub async fn quota_status(&self, user_id: i64) -> AppResult<QuotaStatus> {
        self.quota.status(user_id, QuotaTier::Limited).await
    }

    pub async fn user_packs(&self, user_id: i64) -> AppResult<Vec<StickerPack>> {
        self.packs.list_packs(user_id).await
    }

    /// Renders a style without touching quota, session or packs.
    pub async fn preview(&self, mut request: StyleRequest) -> AppResult<RenderedSticker> {
        request.text = self.machine.validate_text(&request.text)?;
        let renderer = self.renderer.clone();
        tokio::task::spawn_blocking(move || renderer.render(&request, None, EncodeProfile::Preview))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("render task failed: {}", e)))?
    }

    /// Render and pack upload for a session already moved back to idle with
    /// its quota unit taken.
    ///
    /// A new dialogue can start while this runs; the pack outcome is only
    /// written back if the session has not moved on in the meantime.
    async fn create(
        &self,
        snapshot: UserSession,
        request: StyleRequest,
        tier: QuotaTier,
        revision: u64,
    ) -> AppResult<BotReply> {
        let user_id = snapshot.user_id;

        let renderer = self.renderer.clone();
        let photo = snapshot.pending_photo.clone();
        let sticker = match tokio::task::spawn_blocking(move || {
            renderer.render(&request, photo.as_deref(), EncodeProfile::Pack)
        })
        .await
        {
            Ok(Ok(sticker)) => sticker,
            Ok(Err(e)) => {
                self.refund(user_id, tier).await;
                return self.restore(snapshot, revision, e).await;
            }
            Err(e) => {
                self.refund(user_id, tier).await;
                let e = AppError::Internal(anyhow::anyhow!("render task failed: {}", e));
                return self.restore(snapshot, revision, e).await;
            }
        };

        let delivery = match self.deliver(&snapshot, &sticker).await {
            Ok(delivery) => delivery,
            Err(e) => {
                self.refund(user_id, tier).await;
                return match e {
                    AppError::PackFull | AppError::PackInvalid => {
                        self.pack_unusable(snapshot, revision, e).await
                    }
                    e => self.restore(snapshot, revision, e).await,
                };
            }
        };

        let status = self.quota.status(user_id, tier).await?;

        let _guard = self.locks.lock(user_id).await;
        let mut session = self.sessions.load(user_id).await;
        let pack = match &delivery {
            Delivery::Attached { pack } | Delivery::Deferred { pack, .. } => pack.clone(),
        };
        if session.revision == revision {
            session.active_pack = Some(pack);
            if session.pack_title.is_none() {
                session.pack_title = snapshot.pack_title.clone();
            }
            self.sessions.save(session.clone()).await;
        } else {
            tracing::debug!(user_id, "Session moved on during creation, not applying pack");
        }

        let mut reply: BotReply = self.machine.prompt(&session).into();
        reply.sticker = Some(sticker);
        reply.text = match &delivery {
            Delivery::Attached { pack } => format!("Sticker added to pack {}.", pack),
            Delivery::Deferred { manual_link, .. } => {
                reply.manual_attach_link = Some(manual_link.clone());
                format!(
                    "The pack service is busy. Here is your sticker; add it by hand via {}",
                    manual_link
                )
            }
        };
        if tier == QuotaTier::Limited && !status.unlimited {
            reply.text = format!("{}\n{}", reply.text, quota_text(&status));
        }
        Ok(reply)
    }

    async fn deliver(&self, session: &UserSession, sticker: &RenderedSticker) -> AppResult<Delivery> {
        let user_id = session.user_id;
        let emoji = self.packs.config().default_emoji.clone();
        let title = session
            .pack_title
            .clone()
            .unwrap_or_else(|| self.packs.config().default_title.clone());
        let pack = session
            .active_pack
            .clone()
            .unwrap_or_else(|| derive_pack_name(&title, user_id, &self.bot_username));

        let ensured = self.packs.ensure_pack(user_id, &pack, &title, sticker, &emoji).await;
        match ensured {
            Ok(EnsureOutcome::Created) => Ok(Delivery::Attached { pack }),
            Ok(EnsureOutcome::Existing) => {
                match self.packs.attach(user_id, &pack, sticker, &emoji).await? {
                    AttachOutcome::Attached { .. } => Ok(Delivery::Attached { pack }),
                    AttachOutcome::Deferred { manual_link } => {
                        Ok(Delivery::Deferred { pack, manual_link })
                    }
                }
            }
            Err(AppError::UpstreamExhausted(reason)) => {
                tracing::warn!(user_id, pack = %pack, "Pack lookup deferred: {}", reason);
                let manual_link = manual_attach_link(&pack);
                Ok(Delivery::Deferred { pack, manual_link })
            }
            Err(e) => Err(e),
        }
    }

    /// Pack is full or gone: ask for a new pack and keep the pending sticker.
    async fn pack_unusable(
        &self,
        snapshot: UserSession,
        revision: u64,
        error: AppError,
    ) -> AppResult<BotReply> {
        let _guard = self.locks.lock(snapshot.user_id).await;
        let current = self.sessions.load(snapshot.user_id).await;
        if current.revision != revision {
            return Ok(BotReply {
                text: error.user_message(),
                ..BotReply::default()
            });
        }

        let mut session = snapshot;
        session.revision = current.revision;
        self.machine.require_pack(&mut session);
        self.sessions.save(session.clone()).await;

        let mut reply: BotReply = self.machine.prompt(&session).into();
        reply.text = format!("{}\n{}", error.user_message(), reply.text);
        Ok(reply)
    }

    /// Any other failure after the reset: put the dialogue back where it was
    /// so the user can press create again.
    async fn restore(
        &self,
        snapshot: UserSession,
        revision: u64,
        error: AppError,
    ) -> AppResult<BotReply> {
        tracing::warn!(user_id = snapshot.user_id, "Sticker creation failed: {}", error);
        let _guard = self.locks.lock(snapshot.user_id).await;
        let current = self.sessions.load(snapshot.user_id).await;
        if current.revision != revision {
            return Ok(BotReply {
                text: error.user_message(),
                ..BotReply::default()
            });
        }

        let mut session = snapshot;
        session.revision = current.revision + 1;
        self.sessions.save(session.clone()).await;

        let mut reply: BotReply = self.machine.prompt(&session).into();
        reply.text = format!("{}\n{}", error.user_message(), reply.text);
        Ok(reply)
    }

    async fn refund(&self, user_id: i64, tier: QuotaTier) {
        if let Err(e) = self.quota.refund(user_id, tier).await {
            tracing::warn!(user_id, "Quota refund failed: {}", e);
        }
    }
}

fn quota_text(status: &QuotaStatus) -> String {
    if status.unlimited {
        return "You have unlimited advanced stickers.".to_string();
    }
    format!(
        "Advanced stickers left today: {} of {} (resets in {}).",
        status.remaining, status.limit, status.resets_in
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputLimits, PackConfig, QuotaConfig, RenderConfig};
    use crate::models::{QuotaRecord, SessionState};
    use crate::render::FontRegistry;
    use crate::services::packs::mock::MockPackStore;
    use crate::services::quota::{tests::FixedClock, Clock};
    use crate::storage::memory::MemoryStore;
    use crate::storage::{DynStore, KeyValueStore};
    use std::time::Duration;

    struct Harness {
        service: Arc<StickersService>,
        upstream: Arc<MockPackStore>,
        store: DynStore,
    }

    fn harness(upstream: MockPackStore) -> Harness {
        let store: DynStore = Arc::new(MemoryStore::new());
        let upstream = Arc::new(upstream);
        let pack_config = PackConfig {
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            ..PackConfig::default()
        };
        let telegram = TelegramConfig {
            bot_token: String::new(),
            bot_username: "demo_bot".into(),
            api_url: String::new(),
        };

        let service = Arc::new(StickersService::new(
            SessionMachine::new(InputLimits::default(), "demo_bot", vec![]),
            QuotaLedger::with_clock(store.clone(), QuotaConfig::default(), FixedClock::new()),
            PackManager::new(store.clone(), upstream.clone(), pack_config),
            Renderer::new(Arc::new(FontRegistry::builtin_only()), &RenderConfig::default()),
            &telegram,
        ));
        Harness {
            service,
            upstream,
            store,
        }
    }

    async fn send(h: &Harness, event: DialogueEvent) -> BotReply {
        h.service.handle_event(7, event).await.unwrap()
    }

    fn button(token: &str) -> DialogueEvent {
        DialogueEvent::Button(token.parse().unwrap())
    }

    async fn seed_quota(h: &Harness, used: u32) {
        let record = QuotaRecord {
            limited_used: used,
            ..QuotaRecord::new(7, FixedClock::new().now())
        };
        h.store
            .set("quota:7", &serde_json::to_string(&record).unwrap())
            .await
            .unwrap();
    }

    async fn ready_advanced(h: &Harness) {
        send(h, button("mode:advanced")).await;
        send(h, button("bg:transparent")).await;
        send(h, DialogueEvent::Text("Hi".into())).await;
        send(h, button("color:#000")).await;
        send(h, button("size:small")).await;
        send(h, button("pos:bottom")).await;
    }

    #[tokio::test]
    async fn simple_sticker_creates_the_first_pack() {
        let h = harness(MockPackStore::default());
        send(&h, button("mode:simple")).await;
        let reply = send(&h, DialogueEvent::Text("Hello".into())).await;

        let sticker = reply.sticker.expect("sticker delivered");
        assert!(sticker.bytes().starts_with(b"RIFF"));
        assert_eq!(h.upstream.calls(), (1, 1, 0));

        let session = h.service.sessions.load(7).await;
        assert_eq!(session.state, SessionState::Idle);
        assert_eq!(session.active_pack.as_deref(), Some("my_stickers_7_by_demo_bot"));

        // The next sticker goes into the same pack.
        send(&h, button("mode:simple")).await;
        let reply = send(&h, DialogueEvent::Text("Again".into())).await;
        assert!(reply.sticker.is_some());
        assert_eq!(h.upstream.calls().1, 1);
        assert_eq!(h.upstream.calls().2, 1);
    }

    #[tokio::test]
    async fn preview_leaves_quota_and_packs_alone() {
        let h = harness(MockPackStore::default());
        let sticker = h.service.preview(StyleRequest::new("Preview")).await.unwrap();
        assert!(sticker.bytes().starts_with(b"RIFF"));
        assert_eq!(h.upstream.network_calls(), 0);
        assert_eq!(h.service.quota_status(7).await.unwrap().used, 0);
    }

    #[tokio::test]
    async fn preview_rejects_overlong_text() {
        let h = harness(MockPackStore::default());
        let result = h.service.preview(StyleRequest::new("a".repeat(201))).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let result = h.service.preview(StyleRequest::new("   ")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(h.upstream.network_calls(), 0);
    }

    #[tokio::test]
    async fn quota_at_cap_blocks_creation_before_rendering() {
        let h = harness(MockPackStore::default());
        seed_quota(&h, 3).await;

        send(&h, button("mode:advanced")).await;
        send(&h, button("bg:solid")).await;
        send(&h, DialogueEvent::Text("سلام".into())).await;
        send(&h, button("color:#ffffff")).await;
        send(&h, button("size:medium")).await;
        send(&h, button("pos:center")).await;
        let reply = send(&h, button("create")).await;

        assert!(reply.text.contains("quota"), "got {:?}", reply.text);
        assert!(reply.sticker.is_none());
        assert_eq!(h.upstream.network_calls(), 0);
        assert_eq!(h.service.sessions.load(7).await.state, SessionState::Idle);
        assert_eq!(h.service.quota_status(7).await.unwrap().used, 3);
    }

    #[tokio::test]
    async fn advanced_sticker_consumes_quota() {
        let h = harness(MockPackStore::default());
        ready_advanced(&h).await;
        let reply = send(&h, button("create")).await;

        assert!(reply.sticker.is_some());
        assert_eq!(h.service.quota_status(7).await.unwrap().used, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn repeated_create_tap_makes_one_sticker() {
        let h = harness(MockPackStore::default());
        seed_quota(&h, 2).await;
        ready_advanced(&h).await;

        let first = {
            let service = h.service.clone();
            tokio::spawn(async move { service.handle_event(7, button("create")).await })
        };
        let second = {
            let service = h.service.clone();
            tokio::spawn(async move { service.handle_event(7, button("create")).await })
        };
        let replies = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];

        let delivered = replies.iter().filter(|r| r.sticker.is_some()).count();
        assert_eq!(delivered, 1);
        assert_eq!(h.upstream.calls().1, 1);
        assert_eq!(h.service.quota_status(7).await.unwrap().used, 3);
        assert_eq!(h.service.sessions.load(7).await.state, SessionState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn newer_dialogue_wins_over_a_slow_creation() {
        let h = harness(MockPackStore::default());
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        *h.upstream.gate.lock().unwrap() = Some(gate.clone());

        send(&h, button("mode:simple")).await;
        let creation = {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .handle_event(7, DialogueEvent::Text("Hello".into()))
                    .await
            })
        };

        // Wait until the creation is parked on the pack lookup.
        while h.upstream.calls().0 == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let reply = send(&h, button("menu")).await;
        assert!(reply.sticker.is_none());
        assert_eq!(h.service.sessions.load(7).await.state, SessionState::StyleMenu);

        gate.add_permits(10);
        let reply = creation.await.unwrap().unwrap();
        assert!(reply.sticker.is_some());
        assert_eq!(h.upstream.calls().1, 1);

        // The pack result does not overwrite the newer dialogue.
        let session = h.service.sessions.load(7).await;
        assert_eq!(session.state, SessionState::StyleMenu);
        assert!(session.active_pack.is_none());
    }

    #[tokio::test]
    async fn failed_delivery_gives_the_quota_unit_back() {
        let h = harness(MockPackStore::with_pack("my_stickers_7_by_demo_bot", 120));
        ready_advanced(&h).await;
        let reply = send(&h, button("create")).await;

        assert!(reply.sticker.is_none());
        assert_eq!(h.service.quota_status(7).await.unwrap().used, 0);
        assert_eq!(
            h.service.sessions.load(7).await.state,
            SessionState::AwaitingPackName
        );
    }

    #[tokio::test]
    async fn full_pack_asks_for_a_new_one() {
        let h = harness(MockPackStore::with_pack("my_stickers_7_by_demo_bot", 120));
        send(&h, button("mode:simple")).await;
        let reply = send(&h, DialogueEvent::Text("Hello".into())).await;

        assert!(reply.sticker.is_none());
        assert!(reply.text.contains("full"));
        let session = h.service.sessions.load(7).await;
        assert_eq!(session.state, SessionState::AwaitingPackName);
        assert_eq!(session.pending_text.as_deref(), Some("Hello"));
        assert!(session.active_pack.is_none());

        // Naming a new pack resumes the creation.
        send(&h, DialogueEvent::Text("Second".into())).await;
        let reply = send(&h, button("create")).await;
        assert!(reply.sticker.is_some());
        assert_eq!(
            h.service.sessions.load(7).await.active_pack.as_deref(),
            Some("second_7_by_demo_bot")
        );
        assert_eq!(h.service.user_packs(7).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn busy_upstream_degrades_to_manual_link() {
        let upstream = MockPackStore::with_pack("my_stickers_7_by_demo_bot", 3);
        *upstream.add_always.lock().unwrap() =
            Some(crate::storage::UpstreamError::transient("429"));
        let h = harness(upstream);

        send(&h, button("mode:simple")).await;
        let reply = send(&h, DialogueEvent::Text("Hello".into())).await;
        assert!(reply.sticker.is_some());
        assert_eq!(
            reply.manual_attach_link.as_deref(),
            Some("https://t.me/addstickers/my_stickers_7_by_demo_bot")
        );
    }
}
