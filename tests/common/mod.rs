#![allow(dead_code)]

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trust_dns_proto::op::{Edns, Message, MessageType, OpCode, Query};
use trust_dns_proto::rr::{Name, RecordType};
use zonecrab::{Config, Service};

pub const ZONE: &str = r#"{
  "domain": "example.local",
  "primary_ns": "ns1.example.local",
  "ns_admin": "hostmaster@example.local",
  "serial": 1,
  "nameservers": ["ns1.example.local", "ns2.example.local"],
  "a": { "@": ["10.0.0.1"], "www": ["10.0.0.2", "10.0.0.3"] },
  "cname": { "blog": "www" },
  "txt": { "@": ["v=spf1 mx -all"] },
  "mx": { "mail.example.local": 10 }
}"#;

pub struct Running {
    pub dns: SocketAddr,
    pub acme: Option<SocketAddr>,
    pub dkim: Option<SocketAddr>,
    pub api: Option<SocketAddr>,
    cancel: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    pub async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("service didn't stop")
            .unwrap()
            .unwrap();
    }
}

pub async fn start(config: &str) -> Running {
    let config = Config::from_str(config).unwrap();
    let cancel = CancellationToken::new();
    let service = Service::bind(config, cancel.clone()).await.unwrap();
    Running {
        dns: service.dns_addrs().unwrap()[0],
        acme: service.acme_addr().unwrap(),
        dkim: service.dkim_addr().unwrap(),
        api: service.api_addr().unwrap(),
        cancel,
        handle: tokio::spawn(service.run()),
    }
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.local_addr().unwrap()
}

pub fn query(id: u16, name: &str, rtype: RecordType, edns: Option<u16>) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    msg.add_query(Query::query(Name::from_ascii(name).unwrap(), rtype));
    if let Some(payload) = edns {
        let mut edns = Edns::new();
        edns.set_max_payload(payload);
        msg.set_edns(edns);
    }
    msg.to_vec().unwrap()
}

pub async fn exchange(server: SocketAddr, packet: &[u8]) -> Option<Vec<u8>> {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(packet, server).await.unwrap();
    let mut buf = vec![0u8; 4096];
    match tokio::time::timeout(Duration::from_secs(3), socket.recv_from(&mut buf)).await {
        Ok(res) => {
            let (len, _) = res.unwrap();
            buf.truncate(len);
            Some(buf)
        }
        Err(_) => None,
    }
}

pub async fn ask(server: SocketAddr, name: &str, rtype: RecordType) -> Message {
    ask_with(server, name, rtype, None).await
}

pub async fn ask_with(
    server: SocketAddr,
    name: &str,
    rtype: RecordType,
    edns: Option<u16>,
) -> Message {
    let packet = query(0x4242, name, rtype, edns);
    let response = exchange(server, &packet).await.expect("no response");
    let msg = Message::from_vec(&response).unwrap();
    assert_eq!(msg.id(), 0x4242);
    assert_eq!(msg.message_type(), MessageType::Response);
    msg
}
