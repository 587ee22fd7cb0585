//! OAuth token cache for the Sheets client.
//!
//! Tokens are refreshed a minute before they expire. Refreshes are
//! single-flight behind the write lock, and a refresh failure falls back to
//! the current token while it is still usable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{SheetsError, SheetsResult};

/// Refresh this long before the token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the provider reports an unrepresentable expiry.
const FALLBACK_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope for reading and writing spreadsheets.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Remaining lifetime of a token expiring at `expires_at`.
fn remaining_ttl(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    if expires_at <= now {
        return Duration::ZERO;
    }
    (expires_at - now).to_std().unwrap_or(FALLBACK_TTL)
}

/// A failed refresh is treated as a connectivity problem. Rejected
/// credentials surface later as a 401 from the API.
fn refresh_error(reason: impl std::fmt::Display) -> SheetsError {
    SheetsError::token_unavailable(format!("Failed to obtain Sheets access token: {}", reason))
}

struct Bearer {
    value: String,
    valid_until: Instant,
}

impl Bearer {
    fn needs_refresh(&self, at: Instant) -> bool {
        at + REFRESH_MARGIN >= self.valid_until
    }

    fn expired(&self, at: Instant) -> bool {
        at >= self.valid_until
    }
}

pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    current: RwLock<Option<Bearer>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            current: RwLock::new(None),
        }
    }

    /// Drop the cached token, e.g. after the API answered 401.
    pub async fn invalidate(&self) {
        self.current.write().await.take();
    }

    /// A bearer token with at least a minute left.
    pub async fn get_token(&self) -> SheetsResult<String> {
        if let Some(bearer) = self.current.read().await.as_ref() {
            if !bearer.needs_refresh(Instant::now()) {
                return Ok(bearer.value.clone());
            }
        }

        let mut current = self.current.write().await;
        if let Some(bearer) = current.as_ref() {
            // Refreshed by another task while we waited for the lock
            if !bearer.needs_refresh(Instant::now()) {
                return Ok(bearer.value.clone());
            }
        }

        match self.provider.token(&[SHEETS_SCOPE]).await {
            Ok(token) => {
                let ttl = remaining_ttl(token.expires_at(), Utc::now());
                let value = token.as_str().to_string();
                *current = Some(Bearer {
                    value: value.clone(),
                    valid_until: Instant::now() + ttl,
                });
                debug!(ttl_secs = ttl.as_secs(), "Refreshed Sheets access token");
                Ok(value)
            }
            Err(e) => match current.as_ref() {
                Some(bearer) if !bearer.expired(Instant::now()) => {
                    warn!(error = %e, "Token refresh failed, reusing current token");
                    Ok(bearer.value.clone())
                }
                _ => Err(refresh_error(e)),
            },
        }
    }
}
