//! DKIM public keys announced by mail signers.
//!
//! Publishers re-announce their key every refresh interval. A key that hasn't
//! been re-announced for [`EXPIRY_INTERVALS`] intervals is treated as belonging
//! to a provider that has gone away and is swept.

use crate::registry::{lock, TxtProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const EXPIRY_INTERVALS: u32 = 5;
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkimKey {
    pub public_key: String,
    pub updated_at: OffsetDateTime,
    announced: Instant,
}

#[derive(Debug)]
pub struct DkimRegistry {
    keys: Mutex<HashMap<String, DkimKey>>,
    refresh_interval: Duration,
}

impl DkimRegistry {
    #[must_use]
    pub fn new(refresh_interval: Duration) -> Self {
        DkimRegistry {
            keys: Mutex::default(),
            refresh_interval,
        }
    }

    /// Store (or replace) the key for `provider`, stamped with the current time.
    pub fn store(&self, provider: &str, public_key: &str) {
        lock(&self.keys).insert(
            provider.to_ascii_lowercase(),
            DkimKey {
                public_key: public_key.to_string(),
                updated_at: OffsetDateTime::now_utc(),
                announced: Instant::now(),
            },
        );
    }

    #[must_use]
    pub fn lookup(&self, provider: &str) -> Option<String> {
        lock(&self.keys)
            .get(provider)
            .map(|key| key.public_key.clone())
    }

    /// Providers and when they last announced, sorted by provider.
    #[must_use]
    pub fn providers(&self) -> Vec<(String, OffsetDateTime)> {
        let mut providers: Vec<_> = lock(&self.keys)
            .iter()
            .map(|(provider, key)| (provider.clone(), key.updated_at))
            .collect();
        providers.sort();
        providers
    }

    /// Remove every key older than [`EXPIRY_INTERVALS`] refresh intervals.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let max_age = self
            .refresh_interval
            .checked_mul(EXPIRY_INTERVALS)
            .unwrap_or(Duration::MAX);
        let now = Instant::now();
        let mut keys = lock(&self.keys);
        let before = keys.len();
        keys.retain(|_, key| now.duration_since(key.announced) <= max_age);
        before - keys.len()
    }

    /// Sweep every [`SWEEP_INTERVAL`] until `cancel` fires.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("DKIM sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::info!("expired {removed} DKIM key(s)");
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl TxtProvider for DkimRegistry {
    async fn txt(&self, key: &str) -> Vec<String> {
        self.lookup(key).into_iter().collect()
    }
}
