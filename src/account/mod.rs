//! Account Collaborators
//!
//! Balance and profile reads from the hosted data API, and a local
//! best-effort cache of the last known balance for instant display.
//! Neither is ever consulted for game outcomes.

pub mod cache;
pub mod http;

use std::future::Future;

use thiserror::Error;

pub use cache::{BalanceCache, CachedBalance};
pub use http::HttpAccountApi;

/// Account API errors.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Base URL could not be parsed.
    #[error("Invalid account API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Token rejected.
    #[error("Unauthorized")]
    Unauthorized,

    /// Rate limited by the API.
    #[error("Rate limited by account API")]
    RateLimited,

    /// Any other non-success status.
    #[error("Account API returned status {0}")]
    Status(u16),

    /// Request timed out.
    #[error("Request to account API timed out")]
    Timeout,
}

/// Read access to the player's account.
pub trait AccountApi: Send + Sync {
    /// Current balance, the stake ceiling for matchmaking and lobbies.
    fn balance(&self) -> impl Future<Output = Result<u64, AccountError>> + Send;

    /// Name shown to opponents.
    fn display_name(&self) -> impl Future<Output = Result<String, AccountError>> + Send;
}
