//! Pending ACME DNS-01 challenges.

use crate::config::normalize_name;
use crate::dns::message::Caa;
use crate::registry::{lock, CaaProvider, TxtProvider};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Identifies one registration, so that independent challenge requests for the
/// same domain can coexist and be removed separately.
pub type RegistrationId = u64;

/// One challenge: serve `value` at `_acme-challenge.<domain>`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Challenge {
    pub domain: String,
    pub value: String,
}

impl Challenge {
    /// The domain the challenge TXT record hangs off. Wildcard identifiers are
    /// validated at their base domain.
    #[must_use]
    pub fn base_domain(&self) -> String {
        let domain = normalize_name(&self.domain);
        match domain.strip_prefix("*.") {
            Some(base) => base.to_string(),
            None => domain,
        }
    }
}

#[derive(Debug, Default)]
pub struct AcmeRegistry {
    challenges: Mutex<HashMap<String, HashSet<(RegistrationId, String)>>>,
    next_id: AtomicU64,
    caa_issuers: Vec<String>,
}

impl AcmeRegistry {
    #[must_use]
    pub fn new(caa_issuers: Vec<String>) -> Self {
        AcmeRegistry {
            caa_issuers,
            ..AcmeRegistry::default()
        }
    }

    #[must_use]
    pub fn next_id(&self) -> RegistrationId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, id: RegistrationId, challenges: &[Challenge]) {
        let mut map = lock(&self.challenges);
        for challenge in challenges {
            map.entry(challenge.base_domain())
                .or_default()
                .insert((id, challenge.value.clone()));
        }
    }

    pub fn unregister(&self, id: RegistrationId, challenges: &[Challenge]) {
        let mut map = lock(&self.challenges);
        for challenge in challenges {
            let domain = challenge.base_domain();
            if let Some(values) = map.get_mut(&domain) {
                values.remove(&(id, challenge.value.clone()));
                if values.is_empty() {
                    map.remove(&domain);
                }
            }
        }
    }

    /// Every pending value for `domain`, across all registrations.
    #[must_use]
    pub fn query(&self, domain: &str) -> Vec<String> {
        lock(&self.challenges)
            .get(&normalize_name(domain))
            .map(|values| values.iter().map(|(_, value)| value.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of pending challenge values.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.challenges).values().map(HashSet::len).sum()
    }

    /// Register `challenges` under a fresh id. They stay registered until the
    /// returned guard is dropped.
    #[must_use]
    pub fn hold(self: &Arc<Self>, challenges: Vec<Challenge>) -> Registration {
        let id = self.next_id();
        self.register(id, &challenges);
        Registration {
            registry: Arc::clone(self),
            id,
            challenges,
        }
    }
}

/// A live registration; unregisters its challenges on drop.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<AcmeRegistry>,
    id: RegistrationId,
    challenges: Vec<Challenge>,
}

impl Registration {
    #[must_use]
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    #[must_use]
    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id, &self.challenges);
    }
}

#[async_trait::async_trait]
impl TxtProvider for AcmeRegistry {
    async fn txt(&self, key: &str) -> Vec<String> {
        self.query(key)
    }
}

/// Names with a pending challenge allow the configured issuers; everything
/// else gets nothing and falls back to the resolver's deny-all default.
#[async_trait::async_trait]
impl CaaProvider for AcmeRegistry {
    async fn caa(&self, name: &str) -> Vec<Caa> {
        if self.query(name).is_empty() {
            return Vec::new();
        }
        self.caa_issuers.iter().map(|issuer| Caa::issue(issuer)).collect()
    }
}
