//! JSON-RPC 2.0 transport shared by every subsystem that talks to the
//! upstream exchange (`https://test.deribit.com/api/v2/` over HTTPS).
//!
//! Requests are `{jsonrpc:"2.0", id, method, params}`; responses are either
//! `{result: ...}` or `{error: {code, message}}`. Submissions in this
//! gateway are always serialized per subsystem, so id correlation is
//! implicit — a fresh id is still minted per call for traceability in
//! logs, not for matching against pipelined responses.

use gateway_types::GatewayError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

#[derive(Debug, Serialize)]
struct RpcRequest<P> {
    jsonrpc: &'static str,
    id: i64,
    method: String,
    params: P,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "R: DeserializeOwned"))]
struct RpcEnvelope<R> {
    #[serde(default)]
    result: Option<R>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Thin wrapper over `reqwest::Client` that builds/sends/parses the
/// JSON-RPC envelope and maps transport, protocol, and exchange-level
/// failures into `GatewayError`.
pub struct RpcClient {
    base_url: String,
    http: reqwest::Client,
    next_id: AtomicI64,
}

impl RpcClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
            next_id: AtomicI64::new(1),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Call a public method (no bearer token attached).
    pub async fn call_public<P, R>(&self, method: &str, params: P) -> Result<R, GatewayError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call(method, params, None).await
    }

    /// Call a private method, attaching `Authorization: Bearer <token>`.
    pub async fn call_private<P, R>(&self, method: &str, params: P, bearer: &str) -> Result<R, GatewayError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call(method, params, Some(bearer)).await
    }

    async fn call<P, R>(&self, method: &str, params: P, bearer: Option<&str>) -> Result<R, GatewayError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id(),
            method: method.to_string(),
            params,
        };

        let url = format!("{}{}", self.base_url, method);
        debug!(method, url, "sending JSON-RPC request");

        let mut builder = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(token) = bearer {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::TransportFailed(e.to_string()))?;

        let body: RpcEnvelope<R> = response
            .json()
            .await
            .map_err(|e| GatewayError::ProtocolMalformed(e.to_string()))?;

        match (body.result, body.error) {
            (Some(result), _) => Ok(result),
            (None, Some(err)) => Err(GatewayError::ExchangeRejected {
                code: err.code,
                message: err.message,
            }),
            (None, None) => Err(GatewayError::ProtocolMalformed(
                "response carried neither result nor error".to_string(),
            )),
        }
    }
}
