//! Zone Crab
//!
//! A small authoritative DNS server for private zones, with the dynamic records a
//! self-hosted mail and PKI setup needs.
//!
//! * Static `SOA`, `NS`, `A`, `CNAME`, `MX` and `TXT` records for any number of
//!   [zones][`crate::config::ZoneConfig`], served over UDP with EDNS0 support.
//! * [RFC-8555][RFC-8555] [DNS-01] challenge values, registered by ACME clients over
//!   a [private RPC channel][crate::rpc] for exactly as long as they hold the session open.
//! * DKIM public keys announced by mail signers, published at `<provider>._domainkey`.
//! * `CAA` records that only allow certificate issuance while a challenge is pending.
//! * Forwarding of everything else to upstream resolvers, for trusted networks only.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
//!
#![warn(clippy::pedantic)]

pub mod api;
pub mod config;
pub mod dns;
pub mod error;
pub mod registry;
pub mod rpc;
pub mod service;

pub use config::{Config, SharedConfig};
pub use service::Service;
