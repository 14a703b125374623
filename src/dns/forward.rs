//! Forwarding of out-of-zone queries to upstream resolvers.
//!
//! Every upstream gets one long-lived worker with its own connected UDP
//! socket and bounded queue. A forwarded query is offered to all workers
//! without blocking; the ones that accept it race, and a shared [`Ticket`]
//! lets exactly one reply reach the client: the first upstream answer, or
//! SERVFAIL once every accepting worker has failed.

use crate::dns::message::error_response;
use crate::dns::wire::{Header, Rcode, Reader, HEADER_LEN, MAX_UDP_LEN};
use crate::error::Error;
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Decides which single reply a forwarded query gets.
#[derive(Debug)]
struct Ticket {
    answered: AtomicBool,
    outstanding: AtomicUsize,
}

impl Ticket {
    fn new(outstanding: usize) -> Self {
        Ticket {
            answered: AtomicBool::new(false),
            outstanding: AtomicUsize::new(outstanding),
        }
    }

    /// Claim the right to reply. Succeeds once per ticket.
    fn claim(&self) -> bool {
        self.answered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record a failed or skipped attempt. Returns true when it was the last
    /// attempt standing and nobody answered, in which case the caller owns the
    /// SERVFAIL reply.
    fn fail(&self) -> bool {
        self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 && self.claim()
    }
}

#[derive(Debug)]
struct ForwardRequest {
    query: Bytes,
    client: SocketAddr,
    reply: Arc<UdpSocket>,
    ticket: Arc<Ticket>,
}

impl ForwardRequest {
    async fn send_servfail(&self) {
        if let Some(response) = error_response(&self.query, Rcode::ServFail) {
            if let Err(err) = self.reply.send_to(&response, self.client).await {
                tracing::warn!("failed to send SERVFAIL to {}: {err}", self.client);
            }
        }
    }
}

/// Handle to the forwarding workers.
#[derive(Debug)]
pub struct Forwarder {
    queues: Vec<mpsc::Sender<ForwardRequest>>,
}

impl Forwarder {
    /// Spawn one worker per upstream. Workers stop when `cancel` fires.
    #[must_use]
    pub fn spawn(
        upstreams: &[SocketAddr],
        timeout: Duration,
        queue_depth: usize,
        cancel: &CancellationToken,
    ) -> Self {
        let queues = upstreams
            .iter()
            .map(|upstream| {
                let (tx, rx) = mpsc::channel(queue_depth.max(1));
                let worker = Worker {
                    upstream: *upstream,
                    timeout,
                    socket: None,
                };
                tokio::spawn(worker.run(rx, cancel.clone()));
                tx
            })
            .collect();
        Forwarder { queues }
    }

    /// Offer `query` to every worker.
    ///
    /// Returns true when no worker will reply and the caller must send
    /// SERVFAIL itself: every queue was full, or the workers that did accept
    /// had already failed by the time the last queue was skipped.
    pub fn forward(&self, query: &[u8], client: SocketAddr, reply: &Arc<UdpSocket>) -> bool {
        let query = Bytes::copy_from_slice(query);
        let ticket = Arc::new(Ticket::new(self.queues.len()));
        if self.queues.is_empty() {
            return ticket.claim();
        }

        let mut caller_replies = false;
        for queue in &self.queues {
            let request = ForwardRequest {
                query: query.clone(),
                client,
                reply: Arc::clone(reply),
                ticket: Arc::clone(&ticket),
            };
            if queue.try_send(request).is_err() {
                tracing::debug!("forward queue full, skipping an upstream for {client}");
                caller_replies |= ticket.fail();
            }
        }
        caller_replies
    }
}

struct Worker {
    upstream: SocketAddr,
    timeout: Duration,
    socket: Option<UdpSocket>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<ForwardRequest>, cancel: CancellationToken) {
        tracing::debug!("forwarder for {} started", self.upstream);
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            self.handle(request).await;
        }
        tracing::debug!("forwarder for {} stopped", self.upstream);
    }

    async fn handle(&mut self, request: ForwardRequest) {
        if request.ticket.answered.load(Ordering::Acquire) {
            if request.ticket.fail() {
                request.send_servfail().await;
            }
            return;
        }

        match self.exchange(&request.query).await {
            Ok(response) => {
                if request.ticket.claim() {
                    if let Err(err) = request.reply.send_to(&response, request.client).await {
                        tracing::warn!("failed to relay answer to {}: {err}", request.client);
                    }
                }
            }
            Err(err) => {
                tracing::debug!("forwarding to {} failed: {err}", self.upstream);
                if request.ticket.fail() {
                    request.send_servfail().await;
                }
            }
        }
    }

    async fn connect(&self) -> Result<UdpSocket, Error> {
        let local: IpAddr = match self.upstream {
            SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        let socket = UdpSocket::bind(SocketAddr::new(local, 0)).await?;
        socket.connect(self.upstream).await?;
        Ok(socket)
    }

    /// Send `query` upstream over the worker's socket, reconnecting when the
    /// previous exchange hit an I/O error.
    async fn exchange(&mut self, query: &[u8]) -> Result<Vec<u8>, Error> {
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => self.connect().await?,
        };
        let result = self.exchange_on(&socket, query).await;
        if !matches!(result, Err(Error::IO(_))) {
            self.socket = Some(socket);
        }
        result
    }

    /// Wait for the reply carrying the query's id and question.
    async fn exchange_on(&self, socket: &UdpSocket, query: &[u8]) -> Result<Vec<u8>, Error> {
        socket.send(query).await?;

        let id = Header::id_of(query);
        let question = question_section(query);
        let mut buf = vec![0u8; MAX_UDP_LEN];
        let len = tokio::time::timeout(self.timeout, async {
            loop {
                let len = socket.recv(&mut buf).await?;
                // Late answers to earlier, timed out queries are skipped, even
                // when a later query reused their id.
                let response = &buf[..len];
                if Header::id_of(response) == id && question_section(response) == question {
                    return Ok::<_, std::io::Error>(len);
                }
            }
        })
        .await
        .map_err(|_| Error::ForwardTimeout(self.upstream))??;
        buf.truncate(len);

        let rcode = Header::decode(&buf).map_or(Rcode::FormErr as u8, |header| header.rcode);
        if rcode == Rcode::ServFail as u8 || rcode == Rcode::Refused as u8 {
            return Err(Error::ForwardRejected(self.upstream, rcode));
        }
        Ok(buf)
    }
}

/// The raw question of a single-question message, from the end of the header
/// through QTYPE and QCLASS.
fn question_section(message: &[u8]) -> Option<&[u8]> {
    let mut reader = Reader::new(message, HEADER_LEN);
    reader.read_wire_name().ok()?;
    reader.skip(4).ok()?;
    message.get(HEADER_LEN..reader.position())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::message::Request;
    use crate::dns::wire::{Question, RecordType};

    fn query(id: u16) -> Vec<u8> {
        let header = Header {
            id,
            rd: true,
            qdcount: 1,
            ..Header::default()
        };
        let mut buf = header.encode().to_vec();
        Question::new("unknown.test", RecordType::A).encode(&mut buf);
        buf
    }

    fn answer(request: &[u8], rcode: Rcode) -> Vec<u8> {
        let request = Request::parse(request).unwrap();
        let mut header = Header::response_to(&request.header);
        header.ra = true;
        header.set_rcode(rcode);
        header.qdcount = 1;
        let mut buf = header.encode().to_vec();
        request.question.encode(&mut buf);
        buf
    }

    /// A fake upstream answering every query with `rcode` after `delay`.
    async fn upstream(rcode: Rcode, delay: Duration) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_UDP_LEN];
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                tokio::time::sleep(delay).await;
                let reply = answer(&buf[..len], rcode);
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        addr
    }

    /// An address with nothing listening on it.
    async fn unreachable() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.local_addr().unwrap()
    }

    async fn client() -> (Arc<UdpSocket>, UdpSocket) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.local_addr().unwrap()).await.unwrap();
        (Arc::new(server), client)
    }

    async fn receive(client: &UdpSocket) -> Header {
        let mut buf = vec![0u8; MAX_UDP_LEN];
        let len = tokio::time::timeout(Duration::from_secs(5), client.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        Header::decode(&buf[..len]).unwrap()
    }

    async fn nothing_more(client: &UdpSocket) {
        let mut buf = vec![0u8; MAX_UDP_LEN];
        let res = tokio::time::timeout(Duration::from_millis(300), client.recv(&mut buf)).await;
        assert!(res.is_err(), "unexpected second reply");
    }

    #[test]
    fn ticket_single_reply() {
        let ticket = Ticket::new(2);
        assert!(!ticket.fail());
        assert!(ticket.fail());
        assert!(!ticket.claim());

        let ticket = Ticket::new(2);
        assert!(ticket.claim());
        assert!(!ticket.fail());
        assert!(!ticket.fail());
    }

    #[tokio::test]
    async fn first_answer_wins() {
        let fast = upstream(Rcode::NoError, Duration::ZERO).await;
        let slow = upstream(Rcode::NoError, Duration::from_millis(100)).await;
        let cancel = CancellationToken::new();
        let forwarder = Forwarder::spawn(&[slow, fast], Duration::from_secs(2), 4, &cancel);

        let (server, client) = client().await;
        let client_addr = client.local_addr().unwrap();
        assert!(!forwarder.forward(&query(0x1001), client_addr, &server));

        let header = receive(&client).await;
        assert_eq!(header.id, 0x1001);
        assert!(header.qr);
        assert_eq!(header.rcode, Rcode::NoError as u8);
        nothing_more(&client).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn unreachable_upstream_is_servfail() {
        let dead = unreachable().await;
        let cancel = CancellationToken::new();
        let forwarder = Forwarder::spawn(&[dead], Duration::from_millis(200), 4, &cancel);

        let (server, client) = client().await;
        assert!(!forwarder.forward(&query(0x2002), client.local_addr().unwrap(), &server));

        let header = receive(&client).await;
        assert_eq!(header.id, 0x2002);
        assert_eq!(header.rcode, Rcode::ServFail as u8);
        cancel.cancel();
    }

    #[tokio::test]
    async fn refusing_upstream_loses_to_working_one() {
        let refusing = upstream(Rcode::Refused, Duration::ZERO).await;
        let working = upstream(Rcode::NoError, Duration::from_millis(50)).await;
        let cancel = CancellationToken::new();
        let forwarder = Forwarder::spawn(&[refusing, working], Duration::from_secs(2), 4, &cancel);

        let (server, client) = client().await;
        assert!(!forwarder.forward(&query(0x3003), client.local_addr().unwrap(), &server));
        let header = receive(&client).await;
        assert_eq!(header.rcode, Rcode::NoError as u8);
        nothing_more(&client).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn no_upstreams_means_caller_replies() {
        let cancel = CancellationToken::new();
        let forwarder = Forwarder::spawn(&[], Duration::from_secs(1), 4, &cancel);
        let (server, client) = client().await;
        assert!(forwarder.forward(&query(1), client.local_addr().unwrap(), &server));
    }

    #[tokio::test]
    async fn stopped_worker_means_caller_replies() {
        // A cancelled token stops the worker before it drains anything.
        let cancel = CancellationToken::new();
        cancel.cancel();
        let slow = upstream(Rcode::NoError, Duration::from_secs(10)).await;
        let forwarder = Forwarder::spawn(&[slow], Duration::from_secs(1), 1, &cancel);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (server, client) = client().await;
        let client_addr = client.local_addr().unwrap();
        // The worker is gone, so the queue is closed and the offer fails.
        assert!(forwarder.forward(&query(2), client_addr, &server));
    }

    #[tokio::test]
    async fn full_queue_means_caller_replies() {
        // Receives queries and never answers, keeping the worker busy.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap();

        let cancel = CancellationToken::new();
        let forwarder = Forwarder::spawn(&[silent_addr], Duration::from_secs(10), 1, &cancel);
        let (server, client) = client().await;
        let client_addr = client.local_addr().unwrap();

        // The worker picks up the first query and waits on the upstream.
        assert!(!forwarder.forward(&query(1), client_addr, &server));
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The second fills the single queue slot.
        assert!(!forwarder.forward(&query(2), client_addr, &server));
        // The third finds the queue full while the worker is still alive.
        assert!(forwarder.forward(&query(3), client_addr, &server));

        cancel.cancel();
        drop(silent);
    }

    fn query_for(id: u16, name: &str) -> Vec<u8> {
        let header = Header {
            id,
            rd: true,
            qdcount: 1,
            ..Header::default()
        };
        let mut buf = header.encode().to_vec();
        Question::new(name, RecordType::A).encode(&mut buf);
        buf
    }

    #[test]
    fn question_section_spans_name_type_and_class() {
        let packet = query_for(7, "first.test");
        let question = question_section(&packet).unwrap();
        assert_eq!(question.len(), packet.len() - HEADER_LEN);
        assert_ne!(question_section(&query_for(7, "second.test")), Some(question));
        assert_eq!(question_section(&packet[..HEADER_LEN + 3]), None);
    }

    #[tokio::test]
    async fn late_answer_with_reused_id_is_skipped() {
        const DELAY: Duration = Duration::from_millis(300);
        const TIMEOUT: Duration = Duration::from_millis(200);

        // Answers the first query late and every later one right away.
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_UDP_LEN];
            let mut first = true;
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                if first {
                    tokio::time::sleep(DELAY).await;
                    first = false;
                }
                let reply = answer(&buf[..len], Rcode::NoError);
                let _ = socket.send_to(&reply, peer).await;
            }
        });

        let cancel = CancellationToken::new();
        let forwarder = Forwarder::spawn(&[upstream_addr], TIMEOUT, 4, &cancel);
        let (server1, client1) = client().await;
        let (server2, client2) = client().await;

        let first = query_for(0x5555, "first.test");
        assert!(!forwarder.forward(&first, client1.local_addr().unwrap(), &server1));
        // The first query times out and its client gets SERVFAIL.
        let header = receive(&client1).await;
        assert_eq!(header.rcode, Rcode::ServFail as u8);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = query_for(0x5555, "second.test");
        assert!(!forwarder.forward(&second, client2.local_addr().unwrap(), &server2));

        let mut buf = vec![0u8; MAX_UDP_LEN];
        let len = tokio::time::timeout(Duration::from_secs(5), client2.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let header = Header::decode(&buf[..len]).unwrap();
        assert_eq!(header.id, 0x5555);
        assert_eq!(header.rcode, Rcode::NoError as u8);
        let question = Question::decode(&mut Reader::new(&buf[..len], HEADER_LEN)).unwrap();
        assert_eq!(question.name, "second.test");
        nothing_more(&client2).await;
        cancel.cancel();
    }
}
