//! JSON-RPC chain client over WebSocket
//!
//! Each call opens a connection, sends one JSON-RPC 2.0 request and waits for
//! the response carrying the same id. Error objects returned by the node are
//! treated as the chain refusing the request; socket and decoding failures are
//! network errors.

use crate::chain::{Bus, ChainClient, MinerAccount, TransactionResult};
use crate::errors::ChainError;
use crate::job::{AccountRef, Proof, SignerId};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect, Message};
use url::Url;

/// JSON-RPC codes reserved for protocol-level failures
const PROTOCOL_ERROR_CODES: std::ops::RangeInclusive<i64> = -32700..=-32600;

/// Configuration for the RPC chain client
#[derive(Clone, Debug)]
pub struct RpcChainConfig {
    /// Node address (host:port) or full ws:// URL
    pub rpc_addr: String,
    pub read_timeout: Duration,
}

impl Default for RpcChainConfig {
    fn default() -> Self {
        Self {
            rpc_addr: "127.0.0.1:9000".to_string(),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Chain client speaking JSON-RPC to a node
pub struct RpcChainClient {
    url: Url,
    read_timeout: Duration,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(config: RpcChainConfig) -> Result<Self, ChainError> {
        let raw = if config.rpc_addr.contains("://") {
            config.rpc_addr.clone()
        } else {
            format!("ws://{}", config.rpc_addr)
        };
        let url = Url::parse(&raw)
            .map_err(|e| ChainError::InvalidData(format!("invalid RPC address {}: {}", raw, e)))?;
        Ok(Self {
            url,
            read_timeout: config.read_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let (mut socket, _response) = connect(self.url.as_str())
            .map_err(|e| ChainError::Network(format!("WS connect error: {}", e)))?;
        if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
            stream
                .set_read_timeout(Some(self.read_timeout))
                .map_err(|e| ChainError::Network(e.to_string()))?;
        }

        socket
            .send(Message::Text(request.to_string()))
            .map_err(|e| ChainError::Network(e.to_string()))?;

        let response = loop {
            let msg = socket.read().map_err(|e| ChainError::Network(e.to_string()))?;
            if let Message::Text(txt) = msg {
                let v: Value = serde_json::from_str(&txt)
                    .map_err(|e| ChainError::InvalidData(e.to_string()))?;
                if v.get("id").and_then(Value::as_u64) == Some(id) {
                    break v;
                }
            }
        };
        let _ = socket.close(None);

        let result = parse_response(method, response)?;
        serde_json::from_value(result)
            .map_err(|e| ChainError::InvalidData(format!("{} result: {}", method, e)))
    }
}

/// Extracts `result` from a JSON-RPC response, classifying `error` objects
fn parse_response(method: &str, mut response: Value) -> Result<Value, ChainError> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let detail = format!("{} failed ({}): {}", method, code, message);
        return Err(if PROTOCOL_ERROR_CODES.contains(&code) {
            ChainError::InvalidData(detail)
        } else {
            ChainError::Rejected(detail)
        });
    }
    match response.get_mut("result").map(Value::take) {
        Some(Value::Null) | None => Err(ChainError::NotFound(format!("{} returned no result", method))),
        Some(result) => Ok(result),
    }
}

impl ChainClient for RpcChainClient {
    fn fetch_account(&self, account: &AccountRef) -> Result<MinerAccount, ChainError> {
        self.call("getMinerAccount", json!({ "account": account }))
    }

    fn fetch_bus(&self) -> Result<Bus, ChainError> {
        self.call("getBus", Value::Null)
    }

    fn submit_proof(
        &self,
        signer: &SignerId,
        proof: &Proof,
        bus: &Bus,
    ) -> Result<TransactionResult, ChainError> {
        self.call(
            "submitProof",
            json!({
                "signer": signer,
                "proof": proof,
                "busId": bus.id,
                "epoch": bus.epoch,
            }),
        )
    }
}
