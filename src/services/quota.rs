use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::QuotaConfig;
use crate::error::{AppError, AppResult};
use crate::models::{QuotaRecord, QuotaStatus, QuotaTier};
use crate::storage::{load_json, update_json, DynStore};

/// Source of "now" for window arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Per-user creation counters over a rolling window.
///
/// The window is reset lazily: whichever call first observes that the window
/// has elapsed starts a new one, through a compare-and-set update, so the
/// reset happens exactly once even with concurrent readers.
pub struct QuotaLedger {
    store: DynStore,
    config: QuotaConfig,
    clock: Arc<dyn Clock>,
}

impl QuotaLedger {
    pub fn new(store: DynStore, config: QuotaConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: DynStore, config: QuotaConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    fn key(user_id: i64) -> String {
        format!("quota:{}", user_id)
    }

    pub fn is_privileged(&self, user_id: i64) -> bool {
        self.config.privileged_users.contains(&user_id)
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.window).unwrap_or_else(|_| chrono::Duration::days(1))
    }

    fn roll_window(&self, record: &mut QuotaRecord, now: DateTime<Utc>) {
        if now - record.window_start >= self.window() {
            tracing::debug!(user_id = record.user_id, "Quota window elapsed, resetting");
            record.window_start = now;
            record.limited_used = 0;
        }
    }

    /// Loads the record, starting a new window if the current one elapsed.
    async fn current(&self, user_id: i64) -> AppResult<QuotaRecord> {
        let now = self.clock.now();
        let key = Self::key(user_id);

        let existing: Option<QuotaRecord> = load_json(self.store.as_ref(), &key).await?;
        if let Some(record) = &existing {
            if now - record.window_start < self.window() {
                return Ok(record.clone());
            }
        }

        update_json(
            self.store.as_ref(),
            &key,
            || QuotaRecord::new(user_id, now),
            |record| {
                self.roll_window(record, now);
                Ok(())
            },
        )
        .await
    }

    pub async fn can_use(&self, user_id: i64, tier: QuotaTier) -> AppResult<bool> {
        if tier == QuotaTier::Unlimited || self.is_privileged(user_id) {
            return Ok(true);
        }
        let record = self.current(user_id).await?;
        Ok(record.limited_used < self.config.daily_limit)
    }

    fn exceeded(&self, record: &QuotaRecord, now: DateTime<Utc>) -> AppError {
        let resets_in = (record.window_start + self.window() - now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        AppError::QuotaExceeded {
            resets_in: format_eta(resets_in),
        }
    }

    /// Takes one unit. The cap is checked inside the compare-and-set, so
    /// concurrent callers can never push the counter past it; at the cap this
    /// fails with [`AppError::QuotaExceeded`] and nothing is written.
    pub async fn consume(&self, user_id: i64, tier: QuotaTier) -> AppResult<QuotaStatus> {
        if tier == QuotaTier::Limited {
            let now = self.clock.now();
            let privileged = self.is_privileged(user_id);
            let limit = self.config.daily_limit;
            update_json(
                self.store.as_ref(),
                &Self::key(user_id),
                || QuotaRecord::new(user_id, now),
                |record| {
                    self.roll_window(record, now);
                    if !privileged && record.limited_used >= limit {
                        return Err(self.exceeded(record, now));
                    }
                    record.limited_used = record.limited_used.saturating_add(1);
                    Ok(())
                },
            )
            .await?;
        }
        self.status(user_id, tier).await
    }

    /// Gives back a unit taken by [`QuotaLedger::consume`] for a sticker that
    /// was never delivered.
    pub async fn refund(&self, user_id: i64, tier: QuotaTier) -> AppResult<()> {
        if tier != QuotaTier::Limited {
            return Ok(());
        }
        let now = self.clock.now();
        update_json(
            self.store.as_ref(),
            &Self::key(user_id),
            || QuotaRecord::new(user_id, now),
            |record| {
                self.roll_window(record, now);
                record.limited_used = record.limited_used.saturating_sub(1);
                Ok(())
            },
        )
        .await?;
        Ok(())
    }

    pub async fn status(&self, user_id: i64, tier: QuotaTier) -> AppResult<QuotaStatus> {
        let unlimited = tier == QuotaTier::Unlimited || self.is_privileged(user_id);
        let record = self.current(user_id).await?;
        let now = self.clock.now();

        let used = record.used(tier);
        let limit = self.config.daily_limit;
        let resets_at = record.window_start + self.window();
        let resets_in = (resets_at - now).to_std().unwrap_or(Duration::ZERO);

        Ok(QuotaStatus {
            tier,
            unlimited,
            used,
            limit,
            remaining: if unlimited {
                limit
            } else {
                limit.saturating_sub(used)
            },
            resets_in_secs: resets_in.as_secs(),
            resets_in: format_eta(resets_in),
        })
    }
}

/// Human readable time left, e.g. `2h 5m`.
pub fn format_eta(remaining: Duration) -> String {
    let total_minutes = (remaining.as_secs() + 59) / 60;
    let (hours, minutes) = (total_minutes / 60, total_minutes % 60);
    match (hours, minutes) {
        (0, 0) => "less than a minute".to_string(),
        (0, m) => format!("{}m", m),
        (h, 0) => format!("{}h", h),
        (h, m) => format!("{}h {}m", h, m),
    }
}
