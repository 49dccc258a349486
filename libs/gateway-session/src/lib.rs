//! Session Manager — authenticates against `public/auth` and holds the
//! resulting bearer token for every other subsystem to read.
//!
//! The token is held behind a `parking_lot::RwLock` so that readers
//! (Order Manager, Execution Worker) never block on network activity;
//! only `authenticate`/`refresh` take the write lock, and only while
//! swapping in a freshly parsed token.

use gateway_jsonrpc::RpcClient;
use gateway_types::GatewayError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct AuthParams {
    grant_type: &'static str,
    client_id: String,
    client_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthResult {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Clone, Default)]
struct TokenState {
    access_token: String,
    refresh_token: String,
    expires_in_secs: u64,
}

/// Holds the exchange session for a single client credential pair.
pub struct SessionManager {
    rpc: Arc<RpcClient>,
    client_id: String,
    client_secret: String,
    state: RwLock<TokenState>,
}

impl SessionManager {
    pub fn new(rpc: Arc<RpcClient>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            rpc,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            state: RwLock::new(TokenState::default()),
        }
    }

    /// Perform the initial `client_credentials` handshake.
    pub async fn authenticate(&self) -> Result<(), GatewayError> {
        let params = AuthParams {
            grant_type: "client_credentials",
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_token: None,
        };
        self.run_auth(params).await
    }

    /// Exchange the stored refresh token for a new access token.
    pub async fn refresh(&self) -> Result<(), GatewayError> {
        let refresh_token = self.state.read().refresh_token.clone();
        if refresh_token.is_empty() {
            return Err(GatewayError::AuthUnavailable(
                "no refresh token held, call authenticate() first".to_string(),
            ));
        }
        let params = AuthParams {
            grant_type: "refresh_token",
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_token: Some(refresh_token),
        };
        self.run_auth(params).await
    }

    async fn run_auth(&self, params: AuthParams) -> Result<(), GatewayError> {
        let result: AuthResult = self
            .rpc
            .call_public("public/auth", params)
            .await
            .map_err(|err| match err {
                GatewayError::ExchangeRejected { code, message } => {
                    GatewayError::AuthRejected(format!("[{code}] {message}"))
                }
                GatewayError::TransportFailed(msg) => GatewayError::AuthUnavailable(msg),
                GatewayError::ProtocolMalformed(msg) => GatewayError::AuthMalformed(msg),
                other => other,
            })?;

        if result.access_token.is_empty() {
            return Err(GatewayError::AuthMalformed(
                "access_token field was empty".to_string(),
            ));
        }

        let mut state = self.state.write();
        state.access_token = result.access_token;
        state.refresh_token = result.refresh_token;
        state.expires_in_secs = result.expires_in;
        info!(expires_in = state.expires_in_secs, "session token refreshed");
        Ok(())
    }

    /// Current bearer token, if a handshake has completed.
    pub fn current_token(&self) -> Option<String> {
        let state = self.state.read();
        if state.access_token.is_empty() {
            None
        } else {
            Some(state.access_token.clone())
        }
    }

    /// Seconds until the current token expires, as reported at the last
    /// handshake.
    pub fn expires_in_secs(&self) -> u64 {
        self.state.read().expires_in_secs
    }

    pub fn warn_if_stale(&self, remaining_secs: u64) {
        if remaining_secs < 30 {
            warn!(remaining_secs, "session token close to expiry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_has_no_token() {
        let rpc = Arc::new(RpcClient::new("https://test.deribit.com/api/v2/"));
        let session = SessionManager::new(rpc, "id", "secret");
        assert_eq!(session.current_token(), None);
    }

    #[tokio::test]
    async fn refresh_without_prior_auth_fails_fast() {
        let rpc = Arc::new(RpcClient::new("https://test.deribit.com/api/v2/"));
        let session = SessionManager::new(rpc, "id", "secret");
        let err = session.refresh().await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthUnavailable(_)));
    }
}
