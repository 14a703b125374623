//! Wiring of every listener into one service sharing zones, registries and a
//! cancellation token.

use crate::api::{self, AppState};
use crate::config::{Config, SharedConfig};
use crate::dns::{DnsServer, Forwarder, Handler, Providers, ZoneStore};
use crate::registry::{AcmeRegistry, DkimRegistry, DynCaaProvider, DynTxtProvider};
use crate::rpc::{AcmeListener, DkimListener};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// All listeners, bound and ready to run.
pub struct Service {
    cancel: CancellationToken,
    dns: Vec<DnsServer>,
    acme: Option<AcmeListener>,
    dkim: Option<(DkimListener, Arc<DkimRegistry>)>,
    api: Option<(std::net::TcpListener, AppState)>,
}

impl Service {
    /// Load the zones and bind every configured listener. Forward workers start
    /// right away; everything stops once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Invalid zone data, or any listener failing to bind.
    pub async fn bind(config: Config, cancel: CancellationToken) -> anyhow::Result<Self> {
        let config: SharedConfig = Arc::new(config);
        let zones = Arc::new(ZoneStore::from_config(&config.zones)?);
        tracing::info!("loaded {} zone(s)", zones.len());

        let acme_registry = config
            .acme
            .as_ref()
            .map(|acme| Arc::new(AcmeRegistry::new(acme.caa_issuers.clone())));
        let dkim_registry = config
            .dkim
            .as_ref()
            .map(|dkim| Arc::new(DkimRegistry::new(dkim.refresh_interval)));

        let providers = Providers {
            acme_txt: acme_registry
                .clone()
                .map(|registry| registry as DynTxtProvider),
            acme_caa: acme_registry
                .clone()
                .map(|registry| registry as DynCaaProvider),
            dkim: dkim_registry
                .clone()
                .map(|registry| registry as DynTxtProvider),
        };
        let handler = Handler::new(Arc::clone(&zones), providers);
        let forwarder = Arc::new(Forwarder::spawn(
            &config.forwarders,
            config.forward_timeout,
            config.forward_queue_depth,
            &cancel,
        ));

        let mut dns = Vec::with_capacity(config.dns_bind_addrs.len());
        for addr in &config.dns_bind_addrs {
            dns.push(
                DnsServer::bind(
                    *addr,
                    Arc::clone(&config),
                    handler.clone(),
                    Arc::clone(&forwarder),
                )
                .await?,
            );
        }

        let acme = match (&config.acme, &acme_registry) {
            (Some(acme_config), Some(registry)) => {
                Some(AcmeListener::bind(acme_config.clone(), Arc::clone(registry)).await?)
            }
            _ => None,
        };
        let dkim = match (&config.dkim, dkim_registry.clone()) {
            (Some(dkim_config), Some(registry)) => Some((
                DkimListener::bind(dkim_config, Arc::clone(&registry)).await?,
                registry,
            )),
            _ => None,
        };

        let api = match config.api_bind_addr {
            Some(addr) => {
                let listener = std::net::TcpListener::bind(addr)?;
                listener.set_nonblocking(true)?;
                let state = AppState {
                    config: Arc::clone(&config),
                    zones,
                    acme: acme_registry,
                    dkim: dkim_registry,
                };
                Some((listener, state))
            }
            None => None,
        };

        Ok(Service {
            cancel,
            dns,
            acme,
            dkim,
            api,
        })
    }

    /// Bound DNS addresses, in configuration order.
    ///
    /// # Errors
    ///
    /// Returns an error if a socket can't report its address.
    pub fn dns_addrs(&self) -> std::io::Result<Vec<SocketAddr>> {
        self.dns.iter().map(DnsServer::local_addr).collect()
    }

    /// # Errors
    ///
    /// Returns an error if the socket can't report its address.
    pub fn acme_addr(&self) -> std::io::Result<Option<SocketAddr>> {
        self.acme.as_ref().map(AcmeListener::local_addr).transpose()
    }

    /// # Errors
    ///
    /// Returns an error if the socket can't report its address.
    pub fn dkim_addr(&self) -> std::io::Result<Option<SocketAddr>> {
        self.dkim
            .as_ref()
            .map(|(listener, _)| listener.local_addr())
            .transpose()
    }

    /// # Errors
    ///
    /// Returns an error if the socket can't report its address.
    pub fn api_addr(&self) -> std::io::Result<Option<SocketAddr>> {
        self.api
            .as_ref()
            .map(|(listener, _)| listener.local_addr())
            .transpose()
    }

    /// Run every listener until the cancellation token fires. A listener
    /// failing cancels the rest; its error is returned once all have stopped.
    ///
    /// # Errors
    ///
    /// The first error any listener stopped with.
    pub async fn run(self) -> anyhow::Result<()> {
        let Service {
            cancel,
            dns,
            acme,
            dkim,
            api,
        } = self;

        let mut tasks = JoinSet::new();
        for server in dns {
            tasks.spawn(server.run(cancel.clone()));
        }
        if let Some(listener) = acme {
            tasks.spawn(listener.run(cancel.clone()));
        }
        if let Some((listener, registry)) = dkim {
            let sweeper_cancel = cancel.clone();
            tasks.spawn(async move {
                registry.run_sweeper(sweeper_cancel).await;
                Ok::<_, anyhow::Error>(())
            });
            tasks.spawn(listener.run(cancel.clone()));
        }
        if let Some((listener, state)) = api {
            tracing::info!("API listening on {}", listener.local_addr()?);
            let server = api::new(listener, state, cancel.clone())?;
            tasks.spawn(async move { server.await.map_err(anyhow::Error::from) });
        }

        let mut first_err = None;
        while let Some(joined) = tasks.join_next().await {
            let res = joined.map_err(anyhow::Error::from).and_then(|res| res);
            if let Err(err) = res {
                tracing::error!("listener failed: {err:#}");
                cancel.cancel();
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
