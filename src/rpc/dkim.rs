use crate::config::DkimConfig;
use crate::error::Error;
use crate::registry::dkim::DkimRegistry;
use crate::rpc::model::{Ack, DkimAnnounce};
use crate::rpc::{accept_loop, connect, recv, send, Connection};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Accepts DKIM key announcements.
pub struct DkimListener {
    listener: TcpListener,
    registry: Arc<DkimRegistry>,
}

impl DkimListener {
    pub async fn bind(config: &DkimConfig, registry: Arc<DkimRegistry>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(DkimListener { listener, registry })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let local_addr = self.local_addr()?;
        tracing::info!("DKIM RPC listening on TCP {local_addr}");

        let DkimListener { listener, registry } = self;
        let session_cancel = cancel.clone();
        accept_loop(listener, cancel, "DKIM", move |conn, peer| {
            session(conn, peer, Arc::clone(&registry), session_cancel.clone())
        })
        .await;

        tracing::info!("DKIM RPC listener on TCP {local_addr} stopped");
        Ok(())
    }
}

async fn session(
    mut conn: Connection,
    peer: SocketAddr,
    registry: Arc<DkimRegistry>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = recv::<DkimAnnounce>(&mut conn) => received,
        };
        let ack = match received {
            Ok(None) => break,
            Ok(Some(announce)) => match check(&announce) {
                Ok(()) => {
                    tracing::debug!("DKIM key for \"{}\" announced by {peer}", announce.provider);
                    registry.store(&announce.provider, &announce.public_key);
                    Ack::ok()
                }
                Err(err) => {
                    tracing::debug!("rejected DKIM announcement from {peer}: {err}");
                    Ack::error(err)
                }
            },
            Err(err @ Error::InvalidJSON(_)) => {
                tracing::debug!("malformed DKIM announcement from {peer}: {err}");
                Ack::error(err)
            }
            Err(err) => {
                tracing::debug!("DKIM session with {peer} failed: {err}");
                break;
            }
        };
        if let Err(err) = send(&mut conn, &ack).await {
            tracing::debug!("DKIM session with {peer} failed: {err}");
            break;
        }
    }
    // Keys outlive the session; they expire once announcements stop.
    tracing::debug!("DKIM session with {peer} closed");
}

fn check(announce: &DkimAnnounce) -> Result<(), Error> {
    let provider = &announce.provider;
    if provider.is_empty() || provider.contains('.') || provider.len() > 63 {
        return Err(Error::InvalidName(
            provider.clone(),
            "provider must be a single label",
        ));
    }
    announce
        .valid_key()
        .map_err(|_| Error::InvalidDkimKey(provider.clone()))
}

/// Announce `announce` to the listener at `addr` every `interval` until
/// `cancel` fires, over one long-lived connection.
///
/// # Errors
///
/// [`Error::IO`] when the connection fails, [`Error::Rejected`] when the
/// listener refuses the announcement.
pub async fn publish(
    addr: SocketAddr,
    announce: DkimAnnounce,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut conn = connect(addr).await?;
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        send(&mut conn, &announce).await?;
        match recv::<Ack>(&mut conn).await? {
            Some(Ack { error: None }) => {}
            Some(Ack { error: Some(err) }) => return Err(Error::Rejected(err)),
            None => return Err(Error::Rejected("connection closed".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA";

    fn announce(provider: &str, key: &str) -> DkimAnnounce {
        DkimAnnounce {
            provider: provider.to_string(),
            public_key: key.to_string(),
        }
    }

    async fn listener() -> (SocketAddr, Arc<DkimRegistry>, CancellationToken) {
        let registry = Arc::new(DkimRegistry::new(Duration::from_secs(60)));
        let config = DkimConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            refresh_interval: Duration::from_secs(60),
        };
        let listener = DkimListener::bind(&config, Arc::clone(&registry))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn(listener.run(cancel.clone()));
        (addr, registry, cancel)
    }

    #[test]
    fn check_rules() {
        assert!(check(&announce("mail", KEY)).is_ok());
        assert!(matches!(
            check(&announce("", KEY)),
            Err(Error::InvalidName(_, _))
        ));
        assert!(matches!(
            check(&announce("mail.example", KEY)),
            Err(Error::InvalidName(_, _))
        ));
        assert!(matches!(
            check(&announce("mail", "%%%")),
            Err(Error::InvalidDkimKey(_))
        ));
    }

    #[tokio::test]
    async fn announcements_are_stored_and_outlive_the_session() {
        let (addr, registry, cancel) = listener().await;

        let mut conn = connect(addr).await.unwrap();
        send(&mut conn, &announce("Mail", KEY)).await.unwrap();
        let ack: Ack = recv(&mut conn).await.unwrap().unwrap();
        assert!(ack.is_ok());
        assert_eq!(registry.lookup("mail"), Some(KEY.to_string()));

        send(&mut conn, &announce("mail", "bad key!")).await.unwrap();
        let ack: Ack = recv(&mut conn).await.unwrap().unwrap();
        assert!(!ack.is_ok());
        assert_eq!(registry.lookup("mail"), Some(KEY.to_string()));

        drop(conn);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.lookup("mail"), Some(KEY.to_string()));
        cancel.cancel();
    }

    #[tokio::test]
    async fn publish_reannounces() {
        let (addr, registry, cancel) = listener().await;
        let stop = CancellationToken::new();
        let publisher = tokio::spawn(publish(
            addr,
            announce("mail", KEY),
            Duration::from_millis(20),
            stop.clone(),
        ));

        for _ in 0..100 {
            if registry.lookup("mail").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let first = registry.providers()[0].1;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let later = registry.providers()[0].1;
        assert!(later > first);

        stop.cancel();
        publisher.await.unwrap().unwrap();
        cancel.cancel();
    }

    #[tokio::test]
    async fn publish_reports_rejection() {
        let (addr, _registry, cancel) = listener().await;
        let err = publish(
            addr,
            announce("mail", "bad key!"),
            Duration::from_secs(60),
            cancel.child_token(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
        cancel.cancel();
    }
}
