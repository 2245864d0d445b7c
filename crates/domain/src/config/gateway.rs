use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind host. Must resolve to loopback; anything else is rejected
    /// at startup.
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Token file path relative to the orchestrator dir.
    #[serde(default = "d_token_file")]
    pub token_file: String,
    #[serde(default = "d_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "d_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "d_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Challenge nonces older than this are rejected.
    #[serde(default = "d_nonce_ttl_ms")]
    pub nonce_ttl_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            token_file: d_token_file(),
            request_timeout_ms: d_request_timeout_ms(),
            tick_interval_ms: d_tick_interval_ms(),
            max_payload_bytes: d_max_payload_bytes(),
            nonce_ttl_ms: d_nonce_ttl_ms(),
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    4517
}
fn d_token_file() -> String {
    "gateway.token".into()
}
fn d_request_timeout_ms() -> u64 {
    30_000
}
fn d_tick_interval_ms() -> u64 {
    15_000
}
fn d_max_payload_bytes() -> usize {
    1024 * 1024
}
fn d_nonce_ttl_ms() -> u64 {
    30_000
}
