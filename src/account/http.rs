//! HTTP account API client.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::account::{AccountApi, AccountError};

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default connection timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: u64,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    display_name: String,
}

/// Account API over HTTP with bearer auth.
#[derive(Clone)]
pub struct HttpAccountApi {
    http_client: Client,
    base: Url,
    token: String,
}

impl fmt::Debug for HttpAccountApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAccountApi")
            .field("base", &self.base.as_str())
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl HttpAccountApi {
    /// Client for the API rooted at `base_url`.
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, AccountError> {
        let mut base = Url::parse(base_url)?;
        // `Url::join` replaces the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("duel-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            base,
            token: token.into(),
        })
    }

    /// Replace the bearer token after a refresh.
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AccountError> {
        let url = self.base.join(path)?;
        debug!(%url, "GET");

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AccountError::Timeout
                } else {
                    AccountError::Http(e)
                }
            })?;

        match response.status() {
            status if status.is_success() => Ok(response.json::<T>().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AccountError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Account API rate limited");
                Err(AccountError::RateLimited)
            }
            status => Err(AccountError::Status(status.as_u16())),
        }
    }
}

impl AccountApi for HttpAccountApi {
    #[instrument(skip(self))]
    async fn balance(&self) -> Result<u64, AccountError> {
        let body: BalanceResponse = self.get_json("account/balance").await?;
        Ok(body.balance)
    }

    #[instrument(skip(self))]
    async fn display_name(&self) -> Result<String, AccountError> {
        let body: ProfileResponse = self.get_json("account/profile").await?;
        Ok(body.display_name)
    }
}
