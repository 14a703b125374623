//! Authoritative and forwarding DNS server.
//!
//! Queries arrive over UDP and are answered from the configured
//! [zones][`crate::config::ZoneConfig`] when the query name falls inside one.
//! Other queries are [forwarded][forward] to the configured upstream resolvers
//! when the client asked for recursion and its address is inside one of the
//! [`Config::forward_for`][`crate::config::Config::forward_for`] networks.
//! Everything else is REFUSED.
//!
//! Messages are encoded without name compression. Responses never exceed 512
//! bytes, or the client's advertised EDNS0 payload size (capped at 4096).
//! Records that don't fit are dropped and the TC bit is set.
//!
//! # Static Records
//!
//! E.g. with config:
//! ```json
//! {
//!   "zones": [{
//!     "domain": "example.local",
//!     "primary_ns": "ns1.example.local",
//!     "ns_admin": "hostmaster@example.local",
//!     "serial": 1,
//!     "nameservers": ["ns1.example.local", "ns2.example.local"],
//!     "a": { "www": ["10.0.0.2", "10.0.0.3"] },
//!     "cname": { "blog": "www" },
//!     "mx": { "mail.example.local": 10 }
//!   }],
//!   ...
//! }
//! ```
//!
//! A `SOA` query for `example.local` would return:
//! ```bash
//! ❯ dig @127.0.0.1 -p 5353 example.local +short SOA
//! ns1.example.local. hostmaster.example.local. 1 60 60 60 60
//! ```
//!
//! `SOA`, `NS` and `MX` are only answered at the apex. `A` and `NS` answers
//! rotate between queries so that every address gets its turn first:
//! ```bash
//! ❯ dig @127.0.0.1 -p 5353 blog.example.local +short A
//! www.example.local.
//! 10.0.0.3
//! 10.0.0.2
//! ```
//!
//! # Dynamic TXT Records
//!
//! `TXT` queries are answered from static values first. Failing that,
//! `_acme-challenge.<domain>` is answered with the [DNS-01] values pending
//! in the [ACME registry][crate::registry::acme], and
//! `<provider>._domainkey.<apex>` with the key last announced to the
//! [DKIM registry][crate::registry::dkim]:
//! ```bash
//! ❯ dig @127.0.0.1 -p 5353 mail._domainkey.example.local +short TXT
//! "v=DKIM1;k=rsa;p=MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA..."
//! ```
//!
//! # CAA
//!
//! Names with a pending ACME challenge allow the configured
//! [`AcmeConfig::caa_issuers`][`crate::config::AcmeConfig::caa_issuers`] to
//! issue. Every other name in a zone is answered with `0 issue ";"`, which
//! forbids issuance by any CA.
//!
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4

pub mod forward;
pub mod handlers;
pub mod message;
pub mod server;
pub mod wire;
pub mod zone;

pub use forward::Forwarder;
pub use handlers::{Handler, Providers};
pub use server::DnsServer;
pub use zone::ZoneStore;
