//! Gateway end-to-end over a real loopback socket: handshake, request
//! dispatch, bad tokens, unknown methods, and session event fan-out.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use bv_channel::{AgentSession, AgentTurnOutput};
use bv_domain::config::Config;
use bv_domain::error::Result;
use bv_gateway::{GatewayClient, GatewayServer};
use bv_runtime::Runtime;

struct EchoAgent;

#[async_trait::async_trait]
impl AgentSession for EchoAgent {
    async fn run_turn(
        &self,
        _session_id: &str,
        prompt: &str,
        _cancel: CancellationToken,
    ) -> Result<AgentTurnOutput> {
        Ok(AgentTurnOutput {
            tool_outputs: vec![],
            assistant_text: format!("echo: {prompt}"),
        })
    }
}

async fn start_server(
    dir: &std::path::Path,
) -> (Arc<GatewayServer>, String, String) {
    let mut config = Config::default();
    config.gateway.port = 0;
    let runtime = Arc::new(Runtime::new(dir, config).unwrap());
    let server = Arc::new(GatewayServer::new(runtime, Some(Arc::new(EchoAgent))).unwrap());
    let (addr, _handle) = server.serve().await.unwrap();
    let url = format!("ws://{addr}/ws");
    let token = server.token();
    (server, url, token)
}

#[tokio::test]
async fn handshake_health_and_unknown_method() {
    let tmp = tempfile::tempdir().unwrap();
    let (_server, url, token) = start_server(tmp.path()).await;

    let (client, hello) = GatewayClient::connect(&url, &token, "t").await.unwrap();
    assert_eq!(hello.protocol, 1);
    assert!(hello.features.methods.contains(&"sessions.subscribe".to_owned()));
    assert!(hello.policy.max_payload_bytes > 0);

    let health = client.request("health", json!({})).await.unwrap();
    assert_eq!(health["ok"], true);

    let err = client.request("bogus.method", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("MethodNotFound"), "{err}");
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let (_server, url, _token) = start_server(tmp.path()).await;

    let result = GatewayClient::connect(&url, "not-the-token", "t").await;
    let err = result.err().expect("handshake must fail");
    assert!(err.to_string().contains("Unauthorized"), "{err}");
}

#[tokio::test]
async fn invalid_params_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let (_server, url, token) = start_server(tmp.path()).await;
    let (client, _) = GatewayClient::connect(&url, &token, "t").await.unwrap();

    let err = client
        .request("sessions.open", json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("InvalidRequest"), "{err}");
}

#[tokio::test]
async fn subscribe_receives_turn_events_with_seq() {
    let tmp = tempfile::tempdir().unwrap();
    let (_server, url, token) = start_server(tmp.path()).await;
    let (client, _) = GatewayClient::connect(&url, &token, "t").await.unwrap();

    client
        .request("sessions.subscribe", json!({"sessionId": "s1"}))
        .await
        .unwrap();

    let response = client
        .request("sessions.send", json!({"sessionId": "s1", "text": "hello"}))
        .await
        .unwrap();
    assert_eq!(response["text"], "echo: hello");
    assert_eq!(response["turn"], 1);

    // start → chunk → end, with a monotonic per-connection seq.
    let mut seen = Vec::new();
    while seen.len() < 3 {
        let (event, payload, seq) = client.next_event().await.unwrap();
        if event == "tick" {
            continue;
        }
        assert_eq!(payload["sessionId"], "s1");
        seen.push((event, seq.unwrap()));
    }
    let names: Vec<&str> = seen.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(
        names,
        vec!["session.turn.start", "session.turn.chunk", "session.turn.end"]
    );
    let seqs: Vec<u64> = seen.iter().map(|(_, s)| *s).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    // Unsubscribing stops delivery.
    client
        .request("sessions.unsubscribe", json!({"sessionId": "s1"}))
        .await
        .unwrap();
    client
        .request("sessions.send", json!({"sessionId": "s1", "text": "again"}))
        .await
        .unwrap();
    // Only ticks may arrive now; a short drain proves no turn events.
    let drained = tokio::time::timeout(std::time::Duration::from_millis(200), async {
        loop {
            match client.next_event().await {
                Some((event, _, _)) if event.starts_with("session.turn") => break false,
                Some(_) => continue,
                None => break true,
            }
        }
    })
    .await;
    assert!(matches!(drained, Err(_) | Ok(true)));
}

#[tokio::test]
async fn rotate_token_invalidates_old_token() {
    let tmp = tempfile::tempdir().unwrap();
    let (server, url, token) = start_server(tmp.path()).await;
    let (client, _) = GatewayClient::connect(&url, &token, "t").await.unwrap();

    client
        .request("gateway.rotate-token", json!({}))
        .await
        .unwrap();

    // The old token no longer authenticates a fresh connection.
    let result = GatewayClient::connect(&url, &token, "t2").await;
    assert!(result.is_err());
    // The new one does.
    let (client2, _) = GatewayClient::connect(&url, &server.token(), "t3")
        .await
        .unwrap();
    let health = client2.request("health", json!({})).await.unwrap();
    assert_eq!(health["ok"], true);
    drop(client);
}
