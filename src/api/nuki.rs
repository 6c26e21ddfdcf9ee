//! HTTPS client for the Nuki Web API.

use crate::api::error::ApiError;
use crate::api::types::{
    ActivityLogEntry, LockCommand, LockState, SmartlockListResponse, SmartlockResponse,
    SmartlockSummary,
};
use crate::api::LockApi;
use crate::config::{Config, DEFAULT_API_BASE_URL};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct NukiClientConfig {
    /// API base URL (default: https://api.nuki.io)
    pub base_url: String,
    /// Bearer authentication token
    pub token: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl NukiClientConfig {
    /// Create a new client configuration for the public API.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(15),
        }
    }

    /// Take endpoint, token and timeout from the bridge configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            token: config.api_token.clone(),
            timeout: config.request_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Account endpoint, used as a connection test.
    pub fn account_url(&self) -> String {
        self.url("/account")
    }

    pub fn smartlocks_url(&self) -> String {
        self.url("/smartlock")
    }

    pub fn smartlock_url(&self, lock_id: u64) -> String {
        self.url(&format!("/smartlock/{lock_id}"))
    }

    pub fn log_url(&self, lock_id: u64, limit: usize) -> String {
        self.url(&format!("/smartlock/{lock_id}/log?limit={limit}"))
    }

    pub fn action_url(&self, lock_id: u64) -> String {
        self.url(&format!("/smartlock/{lock_id}/action"))
    }
}

#[derive(Debug, Serialize)]
struct ActionRequest {
    action: u8,
}

/// Nuki Web API client.
pub struct NukiClient {
    config: NukiClientConfig,
    client: reqwest::Client,
}

impl NukiClient {
    /// Create a new client.
    pub fn new(config: NukiClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("nuki-activity-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Connectivity(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &NukiClientConfig {
        &self.config
    }

    /// Test the token against the account endpoint.
    pub async fn test_connection(&self) -> Result<bool, ApiError> {
        let response = self
            .client
            .get(self.config.account_url())
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ApiError::from_status(status.as_u16(), "account check"));
        }
        Ok(status.is_success())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, ApiError> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ApiError::MalformedResponse(format!("{url}: {e}"))
        })
    }
}

impl LockApi for NukiClient {
    async fn list_locks(&self) -> Result<Vec<SmartlockSummary>, ApiError> {
        let response: SmartlockListResponse = self.get_json(self.config.smartlocks_url()).await?;
        Ok(response
            .into_vec()
            .iter()
            .map(SmartlockSummary::from)
            .collect())
    }

    async fn get_lock_status(&self, lock_id: u64) -> Result<LockState, ApiError> {
        let response: SmartlockResponse = self.get_json(self.config.smartlock_url(lock_id)).await?;
        Ok(LockState::from_wire(response, Utc::now()))
    }

    async fn get_activity_log(
        &self,
        lock_id: u64,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, ApiError> {
        self.get_json(self.config.log_url(lock_id, limit)).await
    }

    async fn send_action(&self, lock_id: u64, command: LockCommand) -> Result<(), ApiError> {
        let url = self.config.action_url(lock_id);
        tracing::debug!("POST {} action={}", url, command.code());

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(&ActionRequest {
                action: command.code(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiError::from_status(status.as_u16(), message));
        }

        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Connectivity(format!("timeout connecting to Nuki API: {e}"))
    } else if e.is_decode() {
        ApiError::MalformedResponse(e.to_string())
    } else {
        ApiError::Connectivity(format!("error connecting to Nuki API: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_urls() {
        let config = NukiClientConfig {
            base_url: "http://127.0.0.1:8080/".to_string(),
            token: "test-token".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(config.account_url(), "http://127.0.0.1:8080/account");
        assert_eq!(config.smartlocks_url(), "http://127.0.0.1:8080/smartlock");
        assert_eq!(config.smartlock_url(17), "http://127.0.0.1:8080/smartlock/17");
        assert_eq!(
            config.log_url(17, 20),
            "http://127.0.0.1:8080/smartlock/17/log?limit=20"
        );
        assert_eq!(
            config.action_url(17),
            "http://127.0.0.1:8080/smartlock/17/action"
        );
    }

    #[test]
    fn test_config_from_bridge_config() {
        let bridge = Config {
            api_token: "abc".to_string(),
            request_timeout: Duration::from_secs(7),
            ..Config::default()
        };
        let config = NukiClientConfig::from_config(&bridge);

        assert_eq!(config.base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.token, "abc");
        assert_eq!(config.timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_action_body() {
        let body = serde_json::to_string(&ActionRequest {
            action: LockCommand::Unlatch.code(),
        })
        .unwrap();
        assert_eq!(body, r#"{"action":3}"#);
    }
}
