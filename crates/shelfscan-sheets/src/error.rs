//! Sheets error types.

use thiserror::Error;

/// Result type for Sheets operations.
pub type SheetsResult<T> = Result<T, SheetsError>;

/// Errors that can occur during Sheets operations.
#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// The token provider could not be reached; the credentials may still be fine.
    #[error("Access token unavailable: {0}")]
    TokenUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("No usable sheet layout: {0}")]
    Schema(String),

    #[error("Row not found for item {0}")]
    RowNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Delay assumed for a 429 without a usable Retry-After header.
const DEFAULT_RATE_LIMIT_MS: u64 = 1000;

impl SheetsError {
    pub fn auth_error(msg: impl Into<String>) -> Self {
        Self::AuthError(msg.into())
    }

    pub fn token_unavailable(msg: impl Into<String>) -> Self {
        Self::TokenUnavailable(msg.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Map an HTTP error status to an error variant.
    pub fn from_http_status(status: u16, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            401 => Self::AuthError(msg),
            403 => Self::PermissionDenied(msg),
            404 => Self::NotFound(msg),
            429 => Self::RateLimited(DEFAULT_RATE_LIMIT_MS),
            500..=599 => Self::ServerError(status, msg),
            _ => Self::RequestFailed(format!("HTTP {}: {}", status, msg)),
        }
    }

    /// HTTP status associated with this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::AuthError(_) => Some(401),
            Self::PermissionDenied(_) => Some(403),
            Self::NotFound(_) => Some(404),
            Self::RateLimited(_) => Some(429),
            Self::ServerError(status, _) => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Delay requested by the server before retrying.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SheetsError::Network(_)
                | SheetsError::RateLimited(_)
                | SheetsError::ServerError(_, _)
                | SheetsError::TokenUnavailable(_)
        )
    }

    /// True when retrying later cannot help: rejected credentials, permissions
    /// or a spreadsheet without a usable layout. A token fetch that failed in
    /// transit is not permanent.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SheetsError::AuthError(_)
                | SheetsError::PermissionDenied(_)
                | SheetsError::Schema(_)
                | SheetsError::Config(_)
        )
    }
}
