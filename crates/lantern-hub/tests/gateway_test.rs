//! Gateway ingress tests: HTTP submission through to an admin node's join.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lantern_hub::{Hub, HubConfig};
use lantern_node::{MemoryStore, Node, NodeConfig, SystemEnv};
use serde_json::json;

async fn start_hub() -> (String, String) {
    let hub = Hub::bind(HubConfig { bind_addr: "127.0.0.1:0".into(), ..HubConfig::default() })
        .await
        .expect("hub bind");
    let addr = hub.local_addr().expect("hub addr");
    tokio::spawn(hub.run());
    (format!("http://{addr}"), format!("ws://{addr}/mesh"))
}

#[tokio::test]
async fn gateway_submission_reaches_admin() {
    let (http_base, hub_url) = start_hub().await;

    let mut admin_config = NodeConfig::new(&hub_url);
    admin_config.admin = true;
    let admin =
        Node::start(SystemEnv::new(), MemoryStore::new(), admin_config).expect("admin node");

    let decrypted = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
    let sink = Arc::clone(&decrypted);
    admin.on_decrypted(move |msg| {
        sink.lock().unwrap().push((msg.from.clone(), msg.content.clone()));
    });

    // The untrusted client seals locally; the gateway sees only blobs.
    let admin_public =
        lantern_crypto::AdminPublicKey::from_base64(admin.admin_public_key().unwrap()).unwrap();
    let sealed = lantern_crypto::seal(b"supplies low at shelter 4", &admin_public).unwrap();

    // The hub keeps no history, so a submission fanned out before the admin
    // registers is lost. Resubmitting is safe: the admin dedupes on msgId.
    let client = reqwest::Client::new();
    let submission = json!({
        "encryptedPayload": sealed.payload,
        "wrappedKey": sealed.wrapped_key,
        "msgId": "00000000000000000000000000c0ffee",
        "meta": { "location": "shelter 4" },
    });

    let mut joined = false;
    for _ in 0..20 {
        let response = client
            .post(format!("{http_base}/gateway/submit"))
            .json(&submission)
            .send()
            .await
            .expect("submit");

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["msgId"], "00000000000000000000000000c0ffee");

        tokio::time::sleep(Duration::from_millis(250)).await;
        if !decrypted.lock().unwrap().is_empty() {
            joined = true;
            break;
        }
    }
    assert!(joined, "admin never joined the gateway submission");

    let seen = decrypted.lock().unwrap();
    assert_eq!(seen.as_slice(), [(
        "gateway_user".to_string(),
        "supplies low at shelter 4".to_string()
    )]);

    admin.close().await.unwrap();
}

#[tokio::test]
async fn gateway_rejects_incomplete_submissions() {
    let (http_base, _hub_url) = start_hub().await;
    let client = reqwest::Client::new();

    // Missing wrappedKey.
    let response = client
        .post(format!("{http_base}/gateway/submit"))
        .json(&json!({
            "encryptedPayload": "AAAA",
            "msgId": "00000000000000000000000000000001",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("wrappedKey"));

    // Malformed msgId.
    let response = client
        .post(format!("{http_base}/gateway/submit"))
        .json(&json!({
            "encryptedPayload": "AAAA",
            "wrappedKey": "AAAA",
            "msgId": "not-hex",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Structurally invalid blobs.
    let response = client
        .post(format!("{http_base}/gateway/submit"))
        .json(&json!({
            "encryptedPayload": "AAAA",
            "wrappedKey": "AAAA",
            "msgId": "00000000000000000000000000000002",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn gateway_page_is_served() {
    let (http_base, _hub_url) = start_hub().await;

    let response = reqwest::get(format!("{http_base}/gateway")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("/gateway/submit"));
}
