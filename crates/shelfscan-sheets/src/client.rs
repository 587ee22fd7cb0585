//! Google Sheets v4 REST client.
//!
//! - Service-account auth with token caching
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter for idempotent calls
//! - Observability (tracing spans, metrics)

use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use tracing::{debug, info_span, Instrument};

use crate::error::{SheetsError, SheetsResult};
use crate::metrics::record_request;
use crate::retry::RetryConfig;
use crate::token_cache::TokenCache;
use crate::types::{
    AppendValuesResponse, BatchUpdateRequest, BatchUpdateResponse, BatchUpdateValuesRequest,
    SheetRequest, SpreadsheetMetadata, ValueRange,
};

/// Public Sheets endpoint.
pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

// =============================================================================
// Configuration
// =============================================================================

/// Tab names used by the inventory store.
#[derive(Debug, Clone)]
pub struct TabNames {
    pub inventory: String,
    pub ledger: String,
    pub synonyms: String,
}

impl Default for TabNames {
    fn default() -> Self {
        Self {
            inventory: "Inventario".to_string(),
            ledger: "Bitacora".to_string(),
            synonyms: "Sinonimos".to_string(),
        }
    }
}

/// Sheets client configuration.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    /// Target spreadsheet ID
    pub spreadsheet_id: String,
    /// API base URL, overridable for tests
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
    /// Tab names
    pub tabs: TabNames,
}

impl SheetsConfig {
    /// Create config from environment variables.
    pub fn from_env() -> SheetsResult<Self> {
        let spreadsheet_id = match std::env::var("SPREADSHEET_ID") {
            Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                let url = std::env::var("SPREADSHEET_URL").map_err(|_| {
                    SheetsError::config("SPREADSHEET_ID or SPREADSHEET_URL must be set")
                })?;
                extract_spreadsheet_id(&url).ok_or_else(|| {
                    SheetsError::config(format!("No spreadsheet ID in SPREADSHEET_URL: {}", url))
                })?
            }
        };

        let timeout_secs: u64 = std::env::var("SHEETS_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let connect_timeout_secs: u64 = std::env::var("SHEETS_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let defaults = TabNames::default();
        let tabs = TabNames {
            inventory: std::env::var("SHEETS_INVENTORY_TAB").unwrap_or(defaults.inventory),
            ledger: std::env::var("SHEETS_LEDGER_TAB").unwrap_or(defaults.ledger),
            synonyms: std::env::var("SHEETS_SYNONYMS_TAB").unwrap_or(defaults.synonyms),
        };

        Ok(Self {
            spreadsheet_id,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            tabs,
        })
    }
}

/// Pull the spreadsheet ID out of a `docs.google.com/spreadsheets/d/<id>/...` URL.
pub fn extract_spreadsheet_id(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    let mut segments = parsed.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "d" {
            return segments
                .next()
                .filter(|id| !id.is_empty())
                .map(str::to_string);
        }
    }
    None
}

// =============================================================================
// Client
// =============================================================================

enum Auth {
    ServiceAccount(Arc<TokenCache>),
    /// Fixed bearer token, used against mock servers.
    Static(String),
}

/// Google Sheets REST client bound to one spreadsheet.
#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    config: SheetsConfig,
    auth: Arc<Auth>,
}

impl SheetsClient {
    /// Create a client authenticated with the service account in
    /// `GOOGLE_APPLICATION_CREDENTIALS`.
    pub async fn new(config: SheetsConfig) -> SheetsResult<Self> {
        let provider = Self::create_auth_provider()?;
        let auth = Auth::ServiceAccount(Arc::new(TokenCache::new(provider)));
        Self::build(config, auth)
    }

    /// Create a client that sends a fixed bearer token.
    pub fn with_static_token(config: SheetsConfig, token: impl Into<String>) -> SheetsResult<Self> {
        Self::build(config, Auth::Static(token.into()))
    }

    /// Create from environment variables.
    pub async fn from_env() -> SheetsResult<Self> {
        let config = SheetsConfig::from_env()?;
        Self::new(config).await
    }

    fn build(config: SheetsConfig, auth: Auth) -> SheetsResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .user_agent(concat!("shelfscan-sheets/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SheetsError::Network)?;

        Ok(Self {
            http,
            config,
            auth: Arc::new(auth),
        })
    }

    fn create_auth_provider() -> SheetsResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env()
            .map_err(|e| SheetsError::auth_error(format!("Failed to load service account: {}", e)))?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(SheetsError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }

    pub fn config(&self) -> &SheetsConfig {
        &self.config
    }

    pub fn tabs(&self) -> &TabNames {
        &self.config.tabs
    }

    /// Execute an idempotent operation with the configured retry policy.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> SheetsResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = SheetsResult<T>>,
    {
        crate::retry::with_retry(&self.config.retry, operation, op).await
    }

    async fn get_token(&self) -> SheetsResult<String> {
        match self.auth.as_ref() {
            Auth::ServiceAccount(cache) => cache.get_token().await,
            Auth::Static(token) => Ok(token.clone()),
        }
    }

    async fn invalidate_token(&self) {
        if let Auth::ServiceAccount(cache) = self.auth.as_ref() {
            cache.invalidate().await;
        }
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    fn spreadsheet_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.spreadsheet_id
        )
    }

    fn values_url(&self, range: &str) -> String {
        format!("{}/values/{}", self.spreadsheet_url(), urlencoding::encode(range))
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Tab titles and IDs of the spreadsheet.
    pub async fn spreadsheet_metadata(&self) -> SheetsResult<SpreadsheetMetadata> {
        let url = format!(
            "{}?fields={}",
            self.spreadsheet_url(),
            urlencoding::encode("sheets.properties(sheetId,title)")
        );
        self.with_retry("spreadsheet_metadata", || {
            self.execute_request("spreadsheet_metadata", None, async {
                let response = self.send(Method::GET, &url, None::<&()>).await?;
                Ok(response.json::<SpreadsheetMetadata>().await?)
            })
        })
        .await
    }

    /// Read the cells of an A1 range as strings.
    pub async fn get_values(&self, range: &str) -> SheetsResult<Vec<Vec<String>>> {
        let url = self.values_url(range);
        self.with_retry("get_values", || {
            self.execute_request("get_values", Some(range), async {
                let response = self.send(Method::GET, &url, None::<&()>).await?;
                let values: ValueRange = response.json().await?;
                Ok(values.string_rows())
            })
        })
        .await
    }

    /// Append one row after the last row of the table in `range`.
    ///
    /// Not retried: a retry after a lost response would append twice.
    pub async fn append_row(&self, range: &str, cells: Vec<String>) -> SheetsResult<Option<String>> {
        let url = format!(
            "{}:append?valueInputOption=USER_ENTERED&insertDataOption=INSERT_ROWS",
            self.values_url(range)
        );
        let body = ValueRange::row(cells);

        self.execute_request("append_row", Some(range), async {
            let response = self.send(Method::POST, &url, Some(&body)).await?;
            let appended: AppendValuesResponse = response.json().await?;
            Ok(appended.updates.and_then(|u| u.updated_range))
        })
        .await
    }

    /// Overwrite several ranges in one request.
    pub async fn batch_update_values(&self, data: Vec<ValueRange>) -> SheetsResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let url = format!("{}/values:batchUpdate", self.spreadsheet_url());
        let body = BatchUpdateValuesRequest::user_entered(data);

        self.with_retry("batch_update_values", || {
            self.execute_request("batch_update_values", None, async {
                self.send(Method::POST, &url, Some(&body)).await?;
                Ok(())
            })
        })
        .await
    }

    /// Apply structural changes (new tabs, row deletions).
    pub async fn batch_update(&self, requests: Vec<SheetRequest>) -> SheetsResult<BatchUpdateResponse> {
        let url = format!("{}:batchUpdate", self.spreadsheet_url());
        let body = BatchUpdateRequest { requests };

        self.execute_request("batch_update", None, async {
            let response = self.send(Method::POST, &url, Some(&body)).await?;
            Ok(response.json::<BatchUpdateResponse>().await?)
        })
        .await
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    /// Send a request, refreshing the token once if it expired.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> SheetsResult<reqwest::Response> {
        let token = self.get_token().await?;
        let mut response = self.request(method.clone(), url, body, &token).send().await?;
        let mut status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            let body_text = response.text().await.unwrap_or_default();
            if Self::is_access_token_expired(&body_text) {
                debug!("Sheets access token expired, refreshing");
                self.invalidate_token().await;
                let token = self.get_token().await?;
                response = self.request(method, url, body, &token).send().await?;
                status = response.status();
            } else {
                return Err(SheetsError::from_http_status(
                    status.as_u16(),
                    format!("{} failed: {}", url, body_text),
                ));
            }
        }

        if status.is_success() {
            Ok(response)
        } else {
            Err(Self::handle_error_response(status, url, response).await)
        }
    }

    fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        token: &str,
    ) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url).bearer_auth(token);
        match body {
            Some(body) => builder.json(body),
            None => builder,
        }
    }

    async fn execute_request<T, F>(&self, operation: &str, range: Option<&str>, fut: F) -> SheetsResult<T>
    where
        F: std::future::Future<Output = SheetsResult<T>>,
    {
        let span = if let Some(range) = range {
            info_span!("sheets_request", operation = %operation, range = %range)
        } else {
            info_span!("sheets_request", operation = %operation)
        };

        let start = Instant::now();
        let result = fut.instrument(span).await;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(0),
        };
        record_request(operation, status, start.elapsed());

        result
    }

    async fn handle_error_response(status: StatusCode, url: &str, response: reqwest::Response) -> SheetsError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(ms) = retry_after_ms(response.headers()) {
                return SheetsError::RateLimited(ms);
            }
        }
        let body = response.text().await.unwrap_or_default();
        SheetsError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

/// Retry-After header in milliseconds (delta-seconds form only).
fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs * 1000)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "SPREADSHEET_ID",
            "SPREADSHEET_URL",
            "SHEETS_TIMEOUT_SECS",
            "SHEETS_CONNECT_TIMEOUT_SECS",
            "SHEETS_INVENTORY_TAB",
            "SHEETS_LEDGER_TAB",
            "SHEETS_SYNONYMS_TAB",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_config_requires_spreadsheet() {
        clear_env();
        let result = SheetsConfig::from_env();
        assert!(matches!(result, Err(SheetsError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_config_default_values() {
        clear_env();
        std::env::set_var("SPREADSHEET_ID", "abc123");
        let config = SheetsConfig::from_env().unwrap();
        assert_eq!(config.spreadsheet_id, "abc123");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.tabs.inventory, "Inventario");
        assert_eq!(config.tabs.ledger, "Bitacora");
        assert_eq!(config.tabs.synonyms, "Sinonimos");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_from_url() {
        clear_env();
        std::env::set_var(
            "SPREADSHEET_URL",
            "https://docs.google.com/spreadsheets/d/1AbC-xyz_9/edit#gid=0",
        );
        std::env::set_var("SHEETS_INVENTORY_TAB", "Stock");
        let config = SheetsConfig::from_env().unwrap();
        assert_eq!(config.spreadsheet_id, "1AbC-xyz_9");
        assert_eq!(config.tabs.inventory, "Stock");
        clear_env();
    }

    #[test]
    fn test_extract_spreadsheet_id() {
        assert_eq!(
            extract_spreadsheet_id("https://docs.google.com/spreadsheets/d/XYZ/edit"),
            Some("XYZ".to_string())
        );
        assert_eq!(extract_spreadsheet_id("https://example.com/other"), None);
        assert_eq!(extract_spreadsheet_id("not a url"), None);
    }

    #[test]
    fn test_token_expiry_detection() {
        assert!(SheetsClient::is_access_token_expired(
            r#"{"error":{"status":"UNAUTHENTICATED"}}"#
        ));
        assert!(!SheetsClient::is_access_token_expired("forbidden"));
    }
}
