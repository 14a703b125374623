use crate::config::AcmeConfig;
use crate::error::Error;
use crate::registry::acme::{AcmeRegistry, Challenge, Registration};
use crate::rpc::model::{Ack, ChallengeRequest};
use crate::rpc::{accept_loop, recv, send, Connection};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Accepts ACME challenge sessions.
pub struct AcmeListener {
    listener: TcpListener,
    config: Arc<AcmeConfig>,
    registry: Arc<AcmeRegistry>,
}

impl AcmeListener {
    pub async fn bind(config: AcmeConfig, registry: Arc<AcmeRegistry>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(AcmeListener {
            listener,
            config: Arc::new(config),
            registry,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve sessions until `cancel` fires. Open sessions are closed too,
    /// releasing their challenges.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let local_addr = self.local_addr()?;
        tracing::info!("ACME RPC listening on TCP {local_addr}");

        let AcmeListener {
            listener,
            config,
            registry,
        } = self;
        let session_cancel = cancel.clone();
        accept_loop(listener, cancel, "ACME", move |conn, peer| {
            session(
                conn,
                peer,
                Arc::clone(&config),
                Arc::clone(&registry),
                session_cancel.clone(),
            )
        })
        .await;

        tracing::info!("ACME RPC listener on TCP {local_addr} stopped");
        Ok(())
    }
}

async fn session(
    mut conn: Connection,
    peer: SocketAddr,
    config: Arc<AcmeConfig>,
    registry: Arc<AcmeRegistry>,
    cancel: CancellationToken,
) {
    // Dropping these at the end of the session unregisters everything.
    let mut held: Vec<Registration> = Vec::new();

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = recv::<ChallengeRequest>(&mut conn) => received,
        };
        let ack = match received {
            Ok(None) => break,
            Ok(Some(request)) => match check(&config, peer.ip(), &request.challenges) {
                Ok(()) => {
                    for challenge in &request.challenges {
                        tracing::info!(
                            "registered challenge from {peer} for \"{}\"",
                            challenge.domain
                        );
                    }
                    held.push(registry.hold(request.challenges));
                    Ack::ok()
                }
                Err(err) => {
                    tracing::debug!("rejected challenges from {peer}: {err}");
                    Ack::error(err)
                }
            },
            Err(err @ Error::InvalidJSON(_)) => {
                tracing::debug!("malformed challenge request from {peer}: {err}");
                Ack::error(err)
            }
            Err(err) => {
                tracing::debug!("ACME session with {peer} failed: {err}");
                break;
            }
        };
        if let Err(err) = send(&mut conn, &ack).await {
            tracing::debug!("ACME session with {peer} failed: {err}");
            break;
        }
    }

    let released: usize = held.iter().map(|guard| guard.challenges().len()).sum();
    tracing::info!("ACME session with {peer} closed, released {released} challenge(s)");
}

/// Validate a whole request. Nothing is registered unless every challenge passes.
fn check(config: &AcmeConfig, peer: IpAddr, challenges: &[Challenge]) -> Result<(), Error> {
    if challenges.is_empty() {
        return Err(Error::EmptyChallengeSet);
    }
    for challenge in challenges {
        let domain = challenge.base_domain();
        if domain.is_empty() {
            return Err(Error::InvalidName(challenge.domain.clone(), "empty domain"));
        }
        if !config.update_permitted(peer, &domain) {
            return Err(Error::AuthForbidden(peer, domain));
        }
        challenge
            .valid_dns01()
            .map_err(|_| Error::InvalidDNS01(challenge.domain.clone()))?;
    }
    Ok(())
}

/// Client side of a challenge session: registers `challenges` and keeps them
/// registered until the returned connection is dropped.
///
/// # Errors
///
/// [`Error::IO`] when the listener can't be reached,
/// [`Error::Rejected`] when the listener refuses the challenges.
pub async fn hold_challenges(
    addr: SocketAddr,
    challenges: Vec<Challenge>,
) -> Result<Connection, Error> {
    let mut conn = crate::rpc::connect(addr).await?;
    send(&mut conn, &ChallengeRequest { challenges }).await?;
    match recv::<Ack>(&mut conn).await? {
        Some(Ack { error: None }) => Ok(conn),
        Some(Ack { error: Some(err) }) => Err(Error::Rejected(err)),
        None => Err(Error::Rejected("connection closed".to_string())),
    }
}
