//! Auth Tokens
//!
//! Bearer tokens are issued by the hosted backend (Supabase, Auth0, ...).
//! The client never verifies them; it only reads the `exp` claim so it can
//! refresh a token that is about to expire before (re)connecting.

use std::future::Future;
use std::time::Duration;

use jsonwebtoken::{decode, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims the client cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - usually the user ID from the auth provider.
    #[serde(default)]
    pub sub: String,
    /// Expiry timestamp (Unix seconds). 0 if absent.
    #[serde(default)]
    pub exp: u64,
}

/// Authentication errors.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The token source could not produce a token.
    #[error("token unavailable: {0}")]
    Unavailable(String),
    /// Token is not a decodable JWT.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Supplies bearer tokens to the connection manager.
///
/// Called before every connection attempt. `force_refresh` is set after the
/// server rejected the previous token or when it is about to expire.
pub trait TokenSource: Send + 'static {
    /// Produce a token.
    fn token(&mut self, force_refresh: bool)
        -> impl Future<Output = Result<String, AuthError>> + Send;
}

/// A fixed token. Refreshing returns the same value.
impl TokenSource for String {
    async fn token(&mut self, _force_refresh: bool) -> Result<String, AuthError> {
        if self.is_empty() {
            return Err(AuthError::Unavailable("empty token".into()));
        }
        Ok(self.clone())
    }
}

/// Read claims without verifying the signature.
pub fn inspect_token(token: &str) -> Result<TokenClaims, AuthError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data: TokenData<TokenClaims> = decode(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| AuthError::DecodeError(e.to_string()))?;
    Ok(data.claims)
}

/// Whether `token` expires within `margin` of `now_secs`.
///
/// Opaque (non-JWT) tokens and tokens without `exp` never count as expiring.
pub fn expires_within(token: &str, now_secs: u64, margin: Duration) -> bool {
    match inspect_token(token) {
        Ok(claims) if claims.exp > 0 => claims.exp <= now_secs.saturating_add(margin.as_secs()),
        _ => false,
    }
}

// =============================================================================
// TESTS
// =============================================================================
