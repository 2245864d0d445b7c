//! Typed gateway client.
//!
//! Performs the challenge/response handshake and exposes a
//! request/response API over the socket. Every request is tracked by
//! id; when the socket closes, all pending requests fail with
//! `"gateway socket closed"`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use bv_domain::error::{Error, Result};

use crate::protocol::{ErrorBody, Frame, HelloOk, PROTOCOL_VERSION};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>>;

pub struct GatewayClient {
    outbound: mpsc::UnboundedSender<Frame>,
    pending: PendingMap,
    // tokio mutex: held across the recv await in `next_event`.
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    request_timeout: Duration,
}

impl GatewayClient {
    /// Connect, consume the challenge, and authenticate.
    pub async fn connect(url: &str, token: &str, client_id: &str) -> Result<(Self, HelloOk)> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Gateway(format!("connect {url}: {e}")))?;
        let (mut ws_sink, mut ws_stream) = socket.split();

        // 1. The server speaks first: connect.challenge.
        let nonce = loop {
            let Some(message) = ws_stream.next().await else {
                return Err(Error::Gateway("closed before challenge".to_owned()));
            };
            let message = message.map_err(|e| Error::Gateway(e.to_string()))?;
            if let Message::Text(text) = message {
                if let Ok(Frame::Event { event, payload, .. }) =
                    serde_json::from_str::<Frame>(&text)
                {
                    if event == "connect.challenge" {
                        break payload
                            .get("nonce")
                            .and_then(|n| n.as_str())
                            .unwrap_or_default()
                            .to_owned();
                    }
                }
            }
        };

        // 2. Authenticate.
        let connect_id = uuid::Uuid::new_v4().to_string();
        let connect = Frame::Req {
            id: connect_id.clone(),
            trace_id: None,
            method: "connect".to_owned(),
            params: json!({
                "protocol": PROTOCOL_VERSION,
                "client": {"id": client_id, "version": env!("CARGO_PKG_VERSION")},
                "auth": {"token": token},
                "challengeNonce": nonce,
            }),
        };
        let raw = serde_json::to_string(&connect)?;
        ws_sink
            .send(Message::Text(raw))
            .await
            .map_err(|e| Error::Gateway(e.to_string()))?;

        let hello = loop {
            let Some(message) = ws_stream.next().await else {
                return Err(Error::Gateway("closed during handshake".to_owned()));
            };
            let message = message.map_err(|e| Error::Gateway(e.to_string()))?;
            if let Message::Text(text) = message {
                if let Ok(Frame::Res {
                    id, ok, payload, error, ..
                }) = serde_json::from_str::<Frame>(&text)
                {
                    if id != connect_id {
                        continue;
                    }
                    if !ok {
                        return Err(auth_error(error));
                    }
                    let hello: HelloOk =
                        serde_json::from_value(payload.unwrap_or_default())?;
                    break hello;
                }
            }
        };

        // 3. Spawn the I/O tasks.
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<Frame>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let Ok(raw) = serde_json::to_string(&frame) else {
                    continue;
                };
                if ws_sink.send(Message::Text(raw)).await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(Ok(message)) = ws_stream.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                match serde_json::from_str::<Frame>(&text) {
                    Ok(Frame::Res {
                        id, ok, payload, error, ..
                    }) => {
                        if let Some(waiter) = reader_pending.lock().remove(&id) {
                            let result = if ok {
                                Ok(payload.unwrap_or_default())
                            } else {
                                Err(auth_error(error))
                            };
                            let _ = waiter.send(result);
                        }
                    }
                    Ok(frame @ Frame::Event { .. }) => {
                        let _ = event_tx.send(frame);
                    }
                    _ => {}
                }
            }
            // Socket gone: fail everything still waiting.
            let mut pending = reader_pending.lock();
            for (_, waiter) in pending.drain() {
                let _ = waiter.send(Err(Error::Gateway("gateway socket closed".to_owned())));
            }
        });

        Ok((
            Self {
                outbound: outbound_tx,
                pending,
                events: tokio::sync::Mutex::new(event_rx),
                request_timeout: Duration::from_secs(30),
            },
            hello,
        ))
    }

    /// Issue one request and await its response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        let frame = Frame::Req {
            id: id.clone(),
            trace_id: None,
            method: method.to_owned(),
            params,
        };
        if self.outbound.send(frame).is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::Gateway("gateway socket closed".to_owned()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Gateway("gateway socket closed".to_owned())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::Timeout(format!("request {method}")))
            }
        }
    }

    /// Receive the next event frame (fan-out or tick).
    pub async fn next_event(&self) -> Option<(String, Value, Option<u64>)> {
        let frame = self.events.lock().await.recv().await?;
        match frame {
            Frame::Event { event, payload, seq } => Some((event, payload, seq)),
            _ => None,
        }
    }
}

fn auth_error(error: Option<ErrorBody>) -> Error {
    match error {
        Some(body) => Error::Gateway(format!("{:?}: {}", body.code, body.message)),
        None => Error::Gateway("request failed".to_owned()),
    }
}
