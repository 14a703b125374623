use crate::api::routes;
use crate::config::SharedConfig;
use crate::dns::ZoneStore;
use crate::registry::{AcmeRegistry, DkimRegistry};
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    pub zones: Arc<ZoneStore>,
    pub acme: Option<Arc<AcmeRegistry>>,
    pub dkim: Option<Arc<DkimRegistry>>,
}

/// Serve the status API on an already bound listener until `cancel` fires.
///
/// # Errors
///
/// Returns an error when the listener can't be handed to the HTTP server.
pub fn new(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> hyper::Result<impl Future<Output = hyper::Result<()>>> {
    let server = axum::Server::from_tcp(listener)?
        .serve(routes::new(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { cancel.cancelled().await });
    Ok(server)
}
