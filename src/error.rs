//! Error types.

use std::net::{IpAddr, SocketAddr};

/// Error enumerates the possible Zone Crab error states.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a configured zone or record name can't be represented on the wire:
    /// an empty or over-long (63 byte) label, or a name longer than 255 bytes.
    #[error("invalid domain name \"{0}\": {1}")]
    InvalidName(String, &'static str),

    /// Returned when two configured zones share the same apex.
    #[error("zone \"{0}\" is configured more than once")]
    DuplicateZone(String),

    /// Returned when a private listener (the [status API][crate::api] or one of the
    /// [RPC listeners][crate::rpc]) is configured on an address that is neither loopback
    /// nor inside a private network. These channels carry no authentication of their own.
    #[error("private listener bind address ({0}) must be a loopback or private IP")]
    InsecureBind(IpAddr),

    /// Returned when an ACME challenge session registers a domain that the
    /// [`AcmeConfig::acl`][`crate::config::AcmeConfig::acl`] doesn't grant to the peer's network.
    #[error("IP {0} is not authorized to register challenges for \"{1}\"")]
    AuthForbidden(IpAddr, String),

    /// Returned when a challenge value isn't a valid [RFC-8555][RFC-8555] [DNS-01]
    /// challenge response.
    ///
    /// These values MUST be a BASE64 encoded 32 byte SHA256 digest.
    ///
    /// [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
    /// [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
    #[error("TXT value for \"{0}\" is not a valid DNS-01 challenge response")]
    InvalidDNS01(String),

    /// Returned when a challenge request carries no challenges.
    #[error("challenge request is empty")]
    EmptyChallengeSet,

    /// Returned when a DKIM announcement has an empty provider or a public key that isn't
    /// standard BASE64.
    #[error("invalid DKIM announcement for provider \"{0}\"")]
    InvalidDkimKey(String),

    /// Returned to RPC clients when the listener acknowledges a request with an error.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Returned when an upstream resolver doesn't answer within the forward timeout.
    #[error("upstream {0} timed out")]
    ForwardTimeout(SocketAddr),

    /// Returned when an upstream resolver answers with SERVFAIL or REFUSED.
    #[error("upstream {0} answered with rcode {1}")]
    ForwardRejected(SocketAddr, u8),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    IO(#[from] std::io::Error),

    /// Returned when processing JSON fails: loading a [`Config`][crate::config::Config]
    /// or decoding an RPC frame.
    #[error("invalid JSON")]
    InvalidJSON(#[from] serde_json::Error),
}
