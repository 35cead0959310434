use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaTier {
    /// Untracked: simple text stickers.
    Unlimited,
    /// Capped per rolling window: advanced stickers.
    Limited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub user_id: i64,
    pub window_start: DateTime<Utc>,
    pub limited_used: u32,
}

impl QuotaRecord {
    pub fn new(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            window_start: now,
            limited_used: 0,
        }
    }

    pub fn used(&self, tier: QuotaTier) -> u32 {
        match tier {
            QuotaTier::Unlimited => 0,
            QuotaTier::Limited => self.limited_used,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub tier: QuotaTier,
    pub unlimited: bool,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub resets_in_secs: u64,
    pub resets_in: String,
}
