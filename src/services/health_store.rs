use std::str::FromStr;
use std::sync::Arc;

use crate::models::{Channel, HealthRecord, HealthRecords};
use crate::services::clock::Clock;
use crate::services::storage::KvBackend;

pub const HEALTH_KEY: &str = "iptv_channel_health_v2";

/// How channels without a fresh verdict are treated by the filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HealthPolicy {
    /// Unknown or stale channels stay visible until a probe says otherwise
    #[default]
    Optimistic,
    /// Only channels with a fresh healthy verdict are shown
    Pessimistic,
}

impl FromStr for HealthPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimistic" => Ok(Self::Optimistic),
            "pessimistic" | "strict" => Ok(Self::Pessimistic),
            other => Err(format!("unknown health policy: {}", other)),
        }
    }
}

/// Persisted per-channel health verdicts
#[derive(Clone)]
pub struct HealthStore {
    backend: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    policy: HealthPolicy,
}

impl HealthStore {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        clock: Arc<dyn Clock>,
        ttl_ms: i64,
        policy: HealthPolicy,
    ) -> Self {
        Self {
            backend,
            clock,
            ttl_ms,
            policy,
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    pub fn policy(&self) -> HealthPolicy {
        self.policy
    }

    /// All records; unreadable storage reads as empty
    pub async fn load(&self) -> HealthRecords {
        match self.backend.get(HEALTH_KEY).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Discarding unparsable health records: {}", e);
                HealthRecords::new()
            }),
            Ok(None) => HealthRecords::new(),
            Err(e) => {
                tracing::warn!("Failed to read health records: {}", e);
                HealthRecords::new()
            }
        }
    }

    /// Overwrite the slot; failures are logged only
    pub async fn save(&self, records: &HealthRecords) {
        let serialized = match serde_json::to_string(records) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to serialize health records: {}", e);
                return;
            }
        };
        if let Err(e) = self.backend.set(HEALTH_KEY, serialized).await {
            tracing::error!("Failed to save health records: {}", e);
        }
    }

    /// Fresh record for `id`, if any
    pub fn fresh<'a>(&self, records: &'a HealthRecords, id: &str, now: i64) -> Option<&'a HealthRecord> {
        records.get(id).filter(|r| r.is_fresh(now, self.ttl_ms))
    }

    /// Channels the viewer should be offered right now
    pub async fn filter_healthy(&self, channels: &[Channel]) -> Vec<Channel> {
        let records = self.load().await;
        self.filter_with(&records, channels)
    }

    /// Filter against already-loaded records
    pub fn filter_with(&self, records: &HealthRecords, channels: &[Channel]) -> Vec<Channel> {
        let now = self.now_ms();
        channels
            .iter()
            .filter(|ch| match self.fresh(records, &ch.id, now) {
                Some(record) => record.healthy,
                None => self.policy == HealthPolicy::Optimistic,
            })
            .cloned()
            .collect()
    }
}
