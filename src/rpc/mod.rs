//! Private RPC listeners feeding the [dynamic record registries][crate::registry].
//!
//! Both listeners speak the same framing over TCP: every message is a JSON
//! document prefixed by its 4 byte big-endian length. Each request is
//! answered with an [`Ack`][model::Ack] whose `error` field is absent on
//! success.
//!
//! Neither channel is authenticated, so both must be bound to a loopback or
//! private address.
//!
//! # ACME challenge sessions
//!
//! An ACME client opens a connection to
//! [`AcmeConfig::bind_addr`][`crate::config::AcmeConfig::bind_addr`] and sends:
//!
//! ```json
//! { "challenges": [ { "domain": "www.example.local", "value": "LPsIwTo7o8BoG0-vjCyGQGBWSVIPxI-i_X336eUOQZo" } ] }
//! ```
//!
//! Once acknowledged, `TXT` queries for `_acme-challenge.www.example.local` return
//! the value, and `CAA` queries for `www.example.local` allow the configured issuers.
//! The client keeps the connection open while the CA validates. Closing it
//! removes every challenge registered over it.
//!
//! # DKIM announcements
//!
//! A mail signer connects to
//! [`DkimConfig::bind_addr`][`crate::config::DkimConfig::bind_addr`] and sends,
//! once per [`DkimConfig::refresh_interval`][`crate::config::DkimConfig::refresh_interval`]:
//!
//! ```json
//! { "provider": "mail", "public_key": "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA..." }
//! ```
//!
//! The key is served at `mail._domainkey.<apex>` for every zone, and expires once
//! announcements have stopped for five refresh intervals. [`dkim::publish`]
//! implements the announcing side.

use crate::error::Error;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

pub mod acme;
pub mod dkim;
pub mod model;

pub use acme::AcmeListener;
pub use dkim::DkimListener;

const MAX_FRAME_LEN: usize = 64 * 1024;

/// A framed RPC connection.
pub type Connection = Framed<TcpStream, LengthDelimitedCodec>;

#[must_use]
pub fn framed(stream: TcpStream) -> Connection {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_framed(stream)
}

/// Open a connection to an RPC listener.
///
/// # Errors
///
/// [`Error::IO`] when the listener can't be reached.
pub async fn connect(addr: SocketAddr) -> Result<Connection, Error> {
    Ok(framed(TcpStream::connect(addr).await?))
}

/// Send one message.
///
/// # Errors
///
/// [`Error::IO`] when the connection fails.
pub async fn send<T: Serialize>(conn: &mut Connection, msg: &T) -> Result<(), Error> {
    let payload = serde_json::to_vec(msg)?;
    conn.send(Bytes::from(payload)).await?;
    Ok(())
}

/// Receive one message. `Ok(None)` means the peer closed the connection.
///
/// # Errors
///
/// [`Error::IO`] when the connection fails or a frame is oversized,
/// [`Error::InvalidJSON`] when a frame isn't the expected message. The
/// connection stays usable after the latter.
pub async fn recv<T: DeserializeOwned>(conn: &mut Connection) -> Result<Option<T>, Error> {
    match conn.next().await {
        None => Ok(None),
        Some(frame) => Ok(Some(serde_json::from_slice(&frame?)?)),
    }
}

/// Accept connections until `cancel` fires, running `session` for each on its own task.
async fn accept_loop<S, Fut>(
    listener: TcpListener,
    cancel: CancellationToken,
    kind: &'static str,
    session: S,
) where
    S: Fn(Connection, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            res = listener.accept() => match res {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!("{kind} RPC accept failed: {err}");
                    continue;
                }
            },
        };
        tracing::debug!("{kind} RPC connection from {peer}");
        tokio::spawn(session(framed(stream), peer));
    }
}
