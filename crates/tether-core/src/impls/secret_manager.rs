//! SecretManagerClient - Secret Manager v1 REST の SecretSource 実装

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::info;

use super::auth::TokenSource;
use crate::config::Settings;
use crate::domain::SecretError;
use crate::ports::{Clock, SecretName, SecretSource};

pub const SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct AccessResponse {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct SecretPayload {
    #[serde(default)]
    data: String,
}

fn decode_payload(body: &[u8]) -> Result<String, SecretError> {
    let response: AccessResponse =
        serde_json::from_slice(body).map_err(|e| SecretError::Malformed(e.to_string()))?;
    let bytes = STANDARD
        .decode(response.payload.data.as_bytes())
        .map_err(|e| SecretError::Malformed(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| SecretError::Malformed(e.to_string()))
}

#[derive(Clone)]
pub struct SecretManagerClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenSource,
}

impl SecretManagerClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, tokens: TokenSource) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn from_settings(settings: &Settings, http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        let tokens = match settings.access_token() {
            Some(token) => TokenSource::Static(token.to_string()),
            None => TokenSource::metadata(http.clone(), clock),
        };
        Self::new(http, SECRET_MANAGER_ENDPOINT, tokens)
    }
}

#[async_trait]
impl SecretSource for SecretManagerClient {
    async fn access(&self, name: &SecretName) -> Result<String, SecretError> {
        let url = format!("{}/v1/{name}:access", self.base_url);
        let mut request = self.http.get(&url).timeout(REQUEST_TIMEOUT);
        if let Some(token) = self
            .tokens
            .token()
            .await
            .map_err(|e| SecretError::Transport(e.to_string()))?
        {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SecretError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| SecretError::Transport(e.to_string()))?;

        match status {
            StatusCode::NOT_FOUND => Err(SecretError::NotFound(name.to_string())),
            s if s.is_success() => {
                let secret = decode_payload(&body)?;
                info!(secret = %name, "secret retrieved");
                Ok(secret)
            }
            s => Err(SecretError::Transport(format!(
                "{s}: {}",
                String::from_utf8_lossy(&body)
            ))),
        }
    }
}
