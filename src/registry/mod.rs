//! Dynamic record sources consulted while answering queries.
//!
//! Two registries are provided. [`acme::AcmeRegistry`] holds pending
//! [RFC-8555][RFC-8555] [DNS-01] challenge values for exactly as long as the
//! [RPC session][crate::rpc::acme] that registered them stays open.
//! [`dkim::DkimRegistry`] caches DKIM public keys announced by mail signers and
//! forgets them once announcements stop.
//!
//! The [resolution engine][crate::dns] only sees them through the
//! [`TxtProvider`] and [`CaaProvider`] traits, so any other source can be
//! plugged in instead.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4

use crate::dns::message::Caa;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod acme;
pub mod dkim;

pub use acme::AcmeRegistry;
pub use dkim::DkimRegistry;

/// `DynTxtProvider` is a shareable handle to any [`TxtProvider`].
pub type DynTxtProvider = Arc<dyn TxtProvider>;

/// `DynCaaProvider` is a shareable handle to any [`CaaProvider`].
pub type DynCaaProvider = Arc<dyn CaaProvider>;

/// A source of TXT values by key.
#[async_trait::async_trait]
pub trait TxtProvider: Send + Sync {
    /// Get the values registered for `key` (if any). Order is unspecified.
    async fn txt(&self, key: &str) -> Vec<String>;
}

/// A source of CAA records by domain name.
#[async_trait::async_trait]
pub trait CaaProvider: Send + Sync {
    /// Get the CAA records for `name` (if any).
    async fn caa(&self, name: &str) -> Vec<Caa>;
}

// No registry operation can leave its map half-updated, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
