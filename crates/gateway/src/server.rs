//! The gateway server.
//!
//! Flow per connection:
//! 1. Client connects to `ws://127.0.0.1:<port>/ws`
//! 2. Server sends `event connect.challenge { nonce, ts }`
//! 3. Client sends `req connect` with the token and the fresh nonce
//! 4. Server replies `res` with [`HelloOk`], then dispatches requests
//!    and fans out subscribed session events until the socket closes.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bv_channel::AgentSession;
use bv_domain::config::{orchestrator_dir, GatewayConfig};
use bv_domain::error::{Error, Result};
use bv_domain::trace::TraceEvent;
use bv_runtime::Runtime;

use crate::auth::{token_eq, Challenges, TokenFile};
use crate::hub::EventHub;
use crate::protocol::{
    is_known_method, validate_params_for_method, ConnectParams, ErrorCode, Features, Frame,
    HelloOk, Policy, ServerInfo, EVENTS, METHODS, PROTOCOL_VERSION,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GatewayServer {
    runtime: Arc<Runtime>,
    agent: Option<Arc<dyn AgentSession>>,
    config: GatewayConfig,
    token: RwLock<String>,
    token_file: TokenFile,
    challenges: Challenges,
    hub: Arc<EventHub>,
    shutdown: CancellationToken,
    running_turns: Mutex<std::collections::HashMap<String, CancellationToken>>,
    conn_counter: AtomicU64,
}

impl GatewayServer {
    /// Build the server; mints the token file on first use.
    pub fn new(runtime: Arc<Runtime>, agent: Option<Arc<dyn AgentSession>>) -> Result<Self> {
        let config = runtime.config().gateway.clone();
        let token_path =
            orchestrator_dir(runtime.workspace_root()).join(&config.token_file);
        let token_file = TokenFile::new(&token_path);
        let token = token_file.load_or_create()?;
        let challenges = Challenges::new(config.nonce_ttl_ms);

        Ok(Self {
            runtime,
            agent,
            config,
            token: RwLock::new(token),
            token_file,
            challenges,
            hub: Arc::new(EventHub::new()),
            shutdown: CancellationToken::new(),
            running_turns: Mutex::new(std::collections::HashMap::new()),
            conn_counter: AtomicU64::new(0),
        })
    }

    /// The current auth token (for embedding clients in-process).
    pub fn token(&self) -> String {
        self.token.read().clone()
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Request server shutdown.
    pub fn stop(&self) {
        self.hub.broadcast("shutdown", json!({"ts": Utc::now().timestamp_millis()}));
        self.shutdown.cancel();
    }

    /// Bind and serve. Rejects non-loopback hosts.
    pub async fn serve(self: &Arc<Self>) -> Result<(SocketAddr, JoinHandle<()>)> {
        let ip: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|_| Error::Config(format!("gateway.host: {}", self.config.host)))?;
        if !ip.is_loopback() {
            return Err(Error::Auth(format!(
                "gateway must bind loopback, got {ip}"
            )));
        }

        let listener = tokio::net::TcpListener::bind(SocketAddr::new(ip, self.config.port))
            .await
            .map_err(Error::Io)?;
        let addr = listener.local_addr().map_err(Error::Io)?;

        let router = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(self.clone());
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "gateway server error");
            }
        });

        tracing::info!(addr = %addr, "gateway listening");
        Ok((addr, handle))
    }
}

async fn ws_handler(
    State(server): State<Arc<GatewayServer>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(server, socket))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(server: Arc<GatewayServer>, socket: WebSocket) {
    let conn_id = server.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer task: everything outbound funnels through one channel so
    // responses and fan-out events interleave without tearing frames.
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // 1. Challenge.
    let nonce = server.challenges.issue();
    let _ = tx.send(Frame::event(
        "connect.challenge",
        json!({"nonce": nonce, "ts": Utc::now().timestamp_millis()}),
    ));

    // 2. Handshake, then request loop.
    if authenticate(&server, &mut ws_stream, &tx).await {
        server.hub.register_connection(conn_id, tx.clone());

        // Periodic tick until the connection or server goes away.
        let tick_tx = tx.clone();
        let tick_interval = server.config.tick_interval_ms.max(100);
        let ticker = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(tick_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                if tick_tx
                    .send(Frame::event(
                        "tick",
                        json!({"ts": Utc::now().timestamp_millis()}),
                    ))
                    .is_err()
                {
                    break;
                }
            }
        });

        request_loop(&server, conn_id, &mut ws_stream, &tx).await;
        ticker.abort();
    }

    server.hub.remove_connection(conn_id);
    writer.abort();
    tracing::debug!(conn_id, "gateway connection closed");
}

/// Wait for a valid `connect` request. Returns false when the client
/// fails authentication or disconnects first.
async fn authenticate(
    server: &Arc<GatewayServer>,
    ws_stream: &mut (impl StreamExt<Item = std::result::Result<Message, axum::Error>> + Unpin),
    tx: &mpsc::UnboundedSender<Frame>,
) -> bool {
    while let Some(Ok(message)) = ws_stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame = match serde_json::from_str::<Frame>(&text) {
            Ok(frame) => frame,
            Err(_) => continue,
        };
        let Frame::Req {
            id,
            trace_id,
            method,
            params,
        } = frame
        else {
            continue;
        };

        if method != "connect" {
            let _ = tx.send(Frame::err(
                &id,
                trace_id,
                ErrorCode::Unauthorized,
                "connect required before other requests",
            ));
            continue;
        }
        if let Err(message) = validate_params_for_method("connect", &params) {
            let _ = tx.send(Frame::err(
                &id,
                trace_id,
                ErrorCode::InvalidRequest,
                &message,
            ));
            continue;
        }
        let connect: ConnectParams = match serde_json::from_value(params) {
            Ok(connect) => connect,
            Err(e) => {
                let _ = tx.send(Frame::err(
                    &id,
                    trace_id,
                    ErrorCode::InvalidRequest,
                    &e.to_string(),
                ));
                continue;
            }
        };

        if connect.protocol != PROTOCOL_VERSION {
            let _ = tx.send(Frame::err(
                &id,
                trace_id,
                ErrorCode::InvalidRequest,
                &format!("unsupported protocol {}", connect.protocol),
            ));
            return false;
        }
        let token_ok = token_eq(&connect.auth.token, &server.token());
        let nonce_ok = server.challenges.validate(&connect.challenge_nonce);
        if !token_ok || !nonce_ok {
            let _ = tx.send(Frame::err(
                &id,
                trace_id,
                ErrorCode::Unauthorized,
                "invalid token or challenge",
            ));
            return false;
        }

        let hello = HelloOk {
            protocol: PROTOCOL_VERSION,
            server: ServerInfo {
                name: "brewva-gateway".to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            features: Features {
                methods: METHODS.iter().map(|m| m.to_string()).collect(),
                events: EVENTS.iter().map(|e| e.to_string()).collect(),
            },
            policy: Policy {
                max_payload_bytes: server.config.max_payload_bytes,
                tick_interval_ms: server.config.tick_interval_ms,
            },
        };
        let _ = tx.send(Frame::ok(
            &id,
            trace_id,
            serde_json::to_value(hello).unwrap_or_default(),
        ));

        TraceEvent::GatewayConnected {
            client_id: connect.client.id,
            client_version: connect.client.version,
        }
        .emit();
        return true;
    }
    false
}

async fn request_loop(
    server: &Arc<GatewayServer>,
    conn_id: u64,
    ws_stream: &mut (impl StreamExt<Item = std::result::Result<Message, axum::Error>> + Unpin),
    tx: &mpsc::UnboundedSender<Frame>,
) {
    loop {
        let message = tokio::select! {
            message = ws_stream.next() => message,
            _ = server.shutdown.cancelled() => break,
        };
        let Some(Ok(message)) = message else {
            break;
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        if text.len() > server.config.max_payload_bytes {
            let _ = tx.send(Frame::err(
                "",
                None,
                ErrorCode::InvalidRequest,
                "payload exceeds maxPayloadBytes",
            ));
            continue;
        }
        let frame = match serde_json::from_str::<Frame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = tx.send(Frame::err(
                    "",
                    None,
                    ErrorCode::InvalidRequest,
                    &format!("malformed frame: {e}"),
                ));
                continue;
            }
        };
        let Frame::Req {
            id,
            trace_id,
            method,
            params,
        } = frame
        else {
            continue;
        };

        let started = std::time::Instant::now();
        let timeout = Duration::from_millis(server.config.request_timeout_ms);
        let response = match tokio::time::timeout(
            timeout,
            dispatch(server, conn_id, tx, &id, trace_id.clone(), &method, params),
        )
        .await
        {
            Ok(frame) => frame,
            Err(_) => Frame::err(&id, trace_id, ErrorCode::Timeout, "request timed out"),
        };
        let ok = matches!(&response, Frame::Res { ok: true, .. });
        let _ = tx.send(response);

        TraceEvent::GatewayRequest {
            method,
            ok,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch(
    server: &Arc<GatewayServer>,
    conn_id: u64,
    tx: &mpsc::UnboundedSender<Frame>,
    id: &str,
    trace_id: Option<String>,
    method: &str,
    params: Value,
) -> Frame {
    if !is_known_method(method) {
        return Frame::err(
            id,
            trace_id,
            ErrorCode::MethodNotFound,
            &format!("unknown method: {method}"),
        );
    }
    if method == "connect" {
        return Frame::err(id, trace_id, ErrorCode::BadState, "already connected");
    }
    if let Err(message) = validate_params_for_method(method, &params) {
        return Frame::err(id, trace_id, ErrorCode::InvalidRequest, &message);
    }

    match method {
        "health" => Frame::ok(id, trace_id, json!({"ok": true})),

        "status.deep" => {
            let sessions = server.runtime.list_sessions().unwrap_or_default();
            Frame::ok(
                id,
                trace_id,
                json!({
                    "ok": true,
                    "workspaceRoot": server.runtime.workspace_root().display().to_string(),
                    "sessions": sessions,
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )
        }

        "sessions.open" => {
            let session_id = str_param(&params, "sessionId");
            let turn = server.runtime.current_turn(&session_id);
            Frame::ok(id, trace_id, json!({"sessionId": session_id, "turn": turn}))
        }

        "sessions.subscribe" => {
            let session_id = str_param(&params, "sessionId");
            server.hub.subscribe(&session_id, conn_id, tx.clone());
            Frame::ok(id, trace_id, json!({"subscribed": session_id}))
        }

        "sessions.unsubscribe" => {
            let session_id = str_param(&params, "sessionId");
            server.hub.unsubscribe(&session_id, conn_id);
            Frame::ok(id, trace_id, json!({"unsubscribed": session_id}))
        }

        "sessions.send" => handle_send(server, id, trace_id, &params).await,

        "sessions.abort" => {
            let session_id = str_param(&params, "sessionId");
            let cancelled = {
                let running = server.running_turns.lock();
                match running.get(&session_id) {
                    Some(token) => {
                        token.cancel();
                        true
                    }
                    None => false,
                }
            };
            Frame::ok(id, trace_id, json!({"aborted": cancelled}))
        }

        "sessions.close" => {
            let session_id = str_param(&params, "sessionId");
            server.runtime.dispose_session(&session_id, "gateway close");
            Frame::ok(id, trace_id, json!({"closed": session_id}))
        }

        "heartbeat.reload" => {
            server.hub.broadcast(
                "heartbeat.fired",
                json!({"ts": Utc::now().timestamp_millis()}),
            );
            Frame::ok(id, trace_id, json!({"reloaded": true}))
        }

        "gateway.rotate-token" => match server.token_file.rotate() {
            Ok(token) => {
                *server.token.write() = token;
                Frame::ok(id, trace_id, json!({"rotated": true}))
            }
            Err(e) => Frame::err(id, trace_id, ErrorCode::InternalError, &e.to_string()),
        },

        "gateway.stop" => {
            server.stop();
            Frame::ok(id, trace_id, json!({"stopping": true}))
        }

        _ => Frame::err(id, trace_id, ErrorCode::MethodNotFound, method),
    }
}

/// Run one agent turn for `sessions.send`, streaming lifecycle events
/// to subscribers.
async fn handle_send(
    server: &Arc<GatewayServer>,
    id: &str,
    trace_id: Option<String>,
    params: &Value,
) -> Frame {
    let session_id = str_param(params, "sessionId");
    let text = str_param(params, "text");

    let Some(agent) = server.agent.clone() else {
        return Frame::err(
            id,
            trace_id,
            ErrorCode::BadState,
            "no agent session attached",
        );
    };
    {
        let running = server.running_turns.lock();
        if running.contains_key(&session_id) {
            return Frame::err(
                id,
                trace_id,
                ErrorCode::BadState,
                "a turn is already in flight for this session",
            );
        }
    }

    let cancel = server.shutdown.child_token();
    server
        .running_turns
        .lock()
        .insert(session_id.clone(), cancel.clone());

    let turn = server.runtime.begin_turn(&session_id);
    server.hub.publish_session(
        &session_id,
        "session.turn.start",
        json!({"sessionId": session_id, "turn": turn}),
    );

    let result = agent.run_turn(&session_id, &text, cancel).await;
    server.running_turns.lock().remove(&session_id);
    server.runtime.end_turn(&session_id);

    match result {
        Ok(output) => {
            server.hub.publish_session(
                &session_id,
                "session.turn.chunk",
                json!({"sessionId": session_id, "turn": turn, "text": output.assistant_text}),
            );
            server.hub.publish_session(
                &session_id,
                "session.turn.end",
                json!({"sessionId": session_id, "turn": turn}),
            );
            Frame::ok(
                id,
                trace_id,
                json!({"turn": turn, "text": output.assistant_text}),
            )
        }
        Err(e) => {
            server.hub.publish_session(
                &session_id,
                "session.turn.error",
                json!({"sessionId": session_id, "turn": turn, "error": e.to_string()}),
            );
            Frame::err(id, trace_id, ErrorCode::InternalError, &e.to_string())
        }
    }
}

fn str_param(params: &Value, field: &str) -> String {
    params
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned()
}
