//! HTTP status API, served on the private
//! [`Config::api_bind_addr`][`crate::config::Config::api_bind_addr`].
//!
//! # API Endpoints
//!
//! ## `/healthcheck` (GET)
//!
//!   Returns HTTP 200 (OK) and the JSON body `{"ok":"healthy"}` when the service is operational.
//!
//! ## `/status` (GET)
//!
//!   Returns HTTP 200 (OK) and a JSON body describing what the server is currently serving:
//!
//!   ```json
//!   {
//!     "zones": ["example.local"],
//!     "acme": { "pending_challenges": 1 },
//!     "dkim": [ { "provider": "mail", "updated_at": "2023-05-01T12:00:00Z" } ]
//!   }
//!   ```
//!
//!   `acme` and `dkim` are `null` when the feature isn't configured. Challenge values and
//!   keys are never exposed here; query the DNS server for those.

mod model;
mod routes;
pub mod server;

pub use server::{new, AppState};
