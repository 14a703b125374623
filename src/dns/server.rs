use crate::config::SharedConfig;
use crate::dns::forward::Forwarder;
use crate::dns::handlers::Handler;
use crate::dns::message::{error_response, Request};
use crate::dns::wire::{Rcode, MAX_UDP_LEN};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// A UDP listener answering one query at a time.
pub struct DnsServer {
    socket: Arc<UdpSocket>,
    handler: Handler,
    forwarder: Arc<Forwarder>,
    config: SharedConfig,
    next_query_id: u64,
}

impl DnsServer {
    pub async fn bind(
        addr: SocketAddr,
        config: SharedConfig,
        handler: Handler,
        forwarder: Arc<Forwarder>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(DnsServer {
            socket: Arc::new(socket),
            handler,
            forwarder,
            config,
            next_query_id: 0,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        let local_addr = self.local_addr()?;
        tracing::info!("DNS listening on UDP {local_addr}");

        let mut buf = vec![0u8; MAX_UDP_LEN];
        loop {
            let (len, src) = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok(received) => received,
                    Err(err) => {
                        // ICMP errors from earlier replies surface here on some platforms.
                        tracing::warn!("DNS receive on {local_addr} failed: {err}");
                        continue;
                    }
                },
            };

            if let Some(response) = self.handle(&buf[..len], src).await {
                if let Err(err) = self.socket.send_to(&response, src).await {
                    tracing::warn!("failed to answer {src}: {err}");
                }
            }
        }

        tracing::info!("DNS listener on UDP {local_addr} stopped");
        Ok(())
    }

    /// Work out the reply to one datagram. `None` means nothing is sent now:
    /// the datagram is dropped, or a forward worker will reply later.
    async fn handle(&mut self, packet: &[u8], src: SocketAddr) -> Option<Vec<u8>> {
        let query_id = self.next_query_id;
        self.next_query_id = self.next_query_id.wrapping_add(1);

        let request = match Request::parse(packet) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!("malformed query from {src}: {err}");
                return err.rcode().and_then(|rcode| error_response(packet, rcode));
            }
        };

        let may_forward = self.config.forward_permitted(src.ip());
        if !self.handler.is_local(&request) && request.header.rd && may_forward {
            tracing::debug!(
                "forwarding {} {} for {src}",
                request.question.name,
                request.question.qtype
            );
            if self.forwarder.forward(packet, src, &self.socket) {
                return error_response(packet, Rcode::ServFail);
            }
            return None;
        }

        Some(self.handler.respond(&request, query_id, may_forward).await)
    }
}
