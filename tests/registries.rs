mod common;

use common::{ask, start, ZONE};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trust_dns_proto::op::ResponseCode;
use trust_dns_proto::rr::rdata::caa::{Property, Value};
use trust_dns_proto::rr::{RData, RecordType};
use zonecrab::registry::acme::Challenge;
use zonecrab::rpc::acme::hold_challenges;
use zonecrab::rpc::dkim::publish;
use zonecrab::rpc::model::DkimAnnounce;

const VALUE: &str = "LPsIwTo7o8BoG0-vjCyGQGBWSVIPxI-i_X336eUOQZo";
const KEY: &str = "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA";

fn config() -> String {
    format!(
        r#"{{
          "dns_bind_addrs": ["127.0.0.1:0"],
          "api_bind_addr": "127.0.0.1:0",
          "zones": [{ZONE}],
          "acme": {{ "bind_addr": "127.0.0.1:0" }},
          "dkim": {{ "bind_addr": "127.0.0.1:0" }}
        }}"#
    )
}

fn txt_values(msg: &trust_dns_proto::op::Message) -> Vec<String> {
    msg.answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::TXT(txt)) => Some(
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<String>(),
            ),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn acme_challenge_lifecycle() {
    let server = start(&config()).await;
    let acme = server.acme.unwrap();
    let name = "_acme-challenge.www.example.local.";

    let msg = ask(server.dns, name, RecordType::TXT).await;
    assert_eq!(msg.response_code(), ResponseCode::NoError);
    assert!(msg.answers().is_empty());

    let session = hold_challenges(
        acme,
        vec![Challenge {
            domain: "*.www.example.local".to_string(),
            value: VALUE.to_string(),
        }],
    )
    .await
    .unwrap();

    let msg = ask(server.dns, name, RecordType::TXT).await;
    assert_eq!(txt_values(&msg), vec![VALUE.to_string()]);

    let msg = ask(server.dns, "www.example.local.", RecordType::CAA).await;
    match msg.answers()[0].data() {
        Some(RData::CAA(caa)) => {
            assert_eq!(caa.tag(), &Property::Issue);
            match caa.value() {
                Value::Issuer(Some(issuer), _) => {
                    assert_eq!(issuer.to_ascii().trim_end_matches('.'), "letsencrypt.org");
                }
                other => panic!("unexpected CAA value {other:?}"),
            }
        }
        other => panic!("unexpected answer {other:?}"),
    }

    drop(session);
    let mut cleared = false;
    for _ in 0..100 {
        if ask(server.dns, name, RecordType::TXT).await.answers().is_empty() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleared, "challenge outlived its session");

    server.stop().await;
}

#[tokio::test]
async fn dkim_key_is_published() {
    let server = start(&config()).await;
    let stop = CancellationToken::new();
    let publisher = tokio::spawn(publish(
        server.dkim.unwrap(),
        DkimAnnounce {
            provider: "mail".to_string(),
            public_key: KEY.to_string(),
        },
        Duration::from_secs(60),
        stop.clone(),
    ));

    let name = "mail._domainkey.example.local.";
    let mut values = Vec::new();
    for _ in 0..100 {
        values = txt_values(&ask(server.dns, name, RecordType::TXT).await);
        if !values.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(values, vec![format!("v=DKIM1;k=rsa;p={KEY}")]);

    let msg = ask(server.dns, "other._domainkey.example.local.", RecordType::TXT).await;
    assert!(msg.answers().is_empty());

    stop.cancel();
    publisher.await.unwrap().unwrap();
    server.stop().await;
}

#[tokio::test]
async fn status_reports_registries() {
    let server = start(&config()).await;
    let _session = hold_challenges(
        server.acme.unwrap(),
        vec![Challenge {
            domain: "example.local".to_string(),
            value: VALUE.to_string(),
        }],
    )
    .await
    .unwrap();

    let uri: hyper::Uri = format!("http://{}/status", server.api.unwrap())
        .parse()
        .unwrap();
    let res = hyper::Client::new().get(uri).await.unwrap();
    assert_eq!(res.status(), hyper::StatusCode::OK);
    let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["zones"], serde_json::json!(["example.local"]));
    assert_eq!(status["acme"]["pending_challenges"], 1);
    assert_eq!(status["dkim"], serde_json::json!([]));

    server.stop().await;
}
