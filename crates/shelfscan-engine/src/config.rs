//! Engine configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shelfscan_models::PriorityTier;

use crate::error::{EngineError, EngineResult};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// Tracking
// =============================================================================

/// Confidence floor per priority tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        Self {
            high: 0.4,
            medium: 0.5,
            low: 0.6,
        }
    }
}

impl PriorityThresholds {
    pub fn floor(&self, tier: PriorityTier) -> f64 {
        match tier {
            PriorityTier::High => self.high,
            PriorityTier::Medium => self.medium,
            PriorityTier::Low => self.low,
        }
    }
}

/// Parameters of the reconciliation controller.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    /// Frames a silent entity survives before it is removed
    pub disappearance_threshold: u64,
    /// Frames an entity must be observed before it is confirmed
    pub min_frames_for_registration: u64,
    /// Confidence floor per tier
    pub thresholds: PriorityThresholds,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            disappearance_threshold: 100,
            min_frames_for_registration: 30,
            thresholds: PriorityThresholds::default(),
        }
    }
}

impl TrackingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            disappearance_threshold: env_or(
                "TRACKER_DISAPPEARANCE_FRAMES",
                defaults.disappearance_threshold,
            ),
            min_frames_for_registration: env_or(
                "TRACKER_MIN_FRAMES_FOR_REGISTRATION",
                defaults.min_frames_for_registration,
            ),
            thresholds: PriorityThresholds {
                high: env_or("TRACKER_THRESHOLD_HIGH", defaults.thresholds.high),
                medium: env_or("TRACKER_THRESHOLD_MEDIUM", defaults.thresholds.medium),
                low: env_or("TRACKER_THRESHOLD_LOW", defaults.thresholds.low),
            },
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.disappearance_threshold == 0 {
            return Err(EngineError::config("disappearance threshold must be at least 1 frame"));
        }
        if self.min_frames_for_registration == 0 {
            return Err(EngineError::config(
                "min frames for registration must be at least 1 frame",
            ));
        }
        for tier in PriorityTier::ALL {
            let floor = self.thresholds.floor(*tier);
            if !(0.0..=1.0).contains(&floor) {
                return Err(EngineError::config(format!(
                    "{} confidence threshold {} outside [0, 1]",
                    tier, floor
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Which inventory backend the binary talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sheets,
    Memory,
    /// Local tracking only.
    None,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sheets => "sheets",
            BackendKind::Memory => "memory",
            BackendKind::None => "none",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sheets" => Ok(BackendKind::Sheets),
            "memory" => Ok(BackendKind::Memory),
            "none" | "local" | "off" => Ok(BackendKind::None),
            other => Err(EngineError::config(format!("unknown INVENTORY_BACKEND '{}'", other))),
        }
    }
}

/// Backend worker settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Minimum delay between consecutive backend calls
    pub call_spacing: Duration,
    /// Bounded command queue size
    pub queue_capacity: usize,
    /// Upper bound for a single backend call
    pub call_timeout: Duration,
    /// Grace period for draining removals at shutdown
    pub shutdown_timeout: Duration,
    /// Startup connection attempts before a transient failure gives up
    pub connect_attempts: u32,
    /// First delay between startup connection attempts, doubled each time
    pub connect_backoff: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Sheets,
            call_spacing: Duration::from_secs(1),
            queue_capacity: 256,
            call_timeout: Duration::from_secs(20),
            shutdown_timeout: Duration::from_secs(30),
            connect_attempts: 5,
            connect_backoff: Duration::from_secs(2),
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> EngineResult<Self> {
        let defaults = Self::default();
        let kind = match std::env::var("INVENTORY_BACKEND") {
            Ok(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => defaults.kind,
        };

        let spacing_secs: f64 = env_or("BACKEND_CALL_SPACING_SECS", 1.0);
        let call_spacing = Duration::try_from_secs_f64(spacing_secs).map_err(|_| {
            EngineError::config(format!(
                "BACKEND_CALL_SPACING_SECS must be a non-negative number of seconds, got {}",
                spacing_secs
            ))
        })?;

        Ok(Self {
            kind,
            call_spacing,
            queue_capacity: env_or("BACKEND_QUEUE_CAPACITY", defaults.queue_capacity),
            call_timeout: Duration::from_secs(env_or("BACKEND_CALL_TIMEOUT_SECS", 20)),
            shutdown_timeout: Duration::from_secs(env_or("SHUTDOWN_TIMEOUT_SECS", 30)),
            connect_attempts: env_or("BACKEND_CONNECT_ATTEMPTS", defaults.connect_attempts),
            connect_backoff: Duration::from_secs(env_or("BACKEND_CONNECT_BACKOFF_SECS", 2)),
        })
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.queue_capacity == 0 {
            return Err(EngineError::config("BACKEND_QUEUE_CAPACITY must be at least 1"));
        }
        if self.call_timeout.is_zero() {
            return Err(EngineError::config("BACKEND_CALL_TIMEOUT_SECS must be at least 1"));
        }
        if self.connect_attempts == 0 {
            return Err(EngineError::config("BACKEND_CONNECT_ATTEMPTS must be at least 1"));
        }
        Ok(())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tracking: TrackingConfig,
    pub backend: BackendConfig,
    /// JSON-lines detection feed; stdin when unset
    pub feed_path: Option<PathBuf>,
    /// Prometheus listener address
    pub metrics_addr: Option<SocketAddr>,
}

impl EngineConfig {
    /// Load and validate configuration from the environment.
    pub fn from_env() -> EngineResult<Self> {
        let metrics_addr = match std::env::var("METRICS_ADDR") {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.trim().parse().map_err(|_| {
                EngineError::config(format!("METRICS_ADDR is not a socket address: {}", raw))
            })?),
            _ => None,
        };

        let config = Self {
            tracking: TrackingConfig::from_env(),
            backend: BackendConfig::from_env()?,
            feed_path: std::env::var("DETECTION_FEED_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            metrics_addr,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.tracking.validate()?;
        self.backend.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "TRACKER_DISAPPEARANCE_FRAMES",
        "TRACKER_MIN_FRAMES_FOR_REGISTRATION",
        "TRACKER_THRESHOLD_HIGH",
        "TRACKER_THRESHOLD_MEDIUM",
        "TRACKER_THRESHOLD_LOW",
        "BACKEND_CALL_SPACING_SECS",
        "BACKEND_QUEUE_CAPACITY",
        "BACKEND_CALL_TIMEOUT_SECS",
        "SHUTDOWN_TIMEOUT_SECS",
        "BACKEND_CONNECT_ATTEMPTS",
        "BACKEND_CONNECT_BACKOFF_SECS",
        "INVENTORY_BACKEND",
        "DETECTION_FEED_PATH",
        "METRICS_ADDR",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.tracking, TrackingConfig::default());
        assert_eq!(config.backend.kind, BackendKind::Sheets);
        assert_eq!(config.backend.call_spacing, Duration::from_secs(1));
        assert_eq!(config.backend.queue_capacity, 256);
        assert_eq!(config.backend.call_timeout, Duration::from_secs(20));
        assert_eq!(config.backend.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.backend.connect_attempts, 5);
        assert_eq!(config.backend.connect_backoff, Duration::from_secs(2));
        assert!(config.feed_path.is_none());
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("TRACKER_DISAPPEARANCE_FRAMES", "12");
        std::env::set_var("TRACKER_THRESHOLD_LOW", "0.75");
        std::env::set_var("BACKEND_CALL_SPACING_SECS", "0.25");
        std::env::set_var("INVENTORY_BACKEND", "memory");
        std::env::set_var("METRICS_ADDR", "127.0.0.1:9100");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.tracking.disappearance_threshold, 12);
        assert_eq!(config.tracking.thresholds.low, 0.75);
        assert_eq!(config.backend.call_spacing, Duration::from_millis(250));
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_rejects_threshold_out_of_range() {
        clear_env();
        std::env::set_var("TRACKER_THRESHOLD_HIGH", "1.5");
        assert!(matches!(EngineConfig::from_env(), Err(EngineError::Config(_))));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_rejects_unrepresentable_spacing() {
        for raw in ["1e30", "-0.5", "inf", "NaN"] {
            clear_env();
            std::env::set_var("BACKEND_CALL_SPACING_SECS", raw);
            assert!(
                matches!(EngineConfig::from_env(), Err(EngineError::Config(_))),
                "accepted spacing {}",
                raw
            );
        }
        clear_env();
    }

    #[test]
    #[serial]
    fn test_rejects_unknown_backend() {
        clear_env();
        std::env::set_var("INVENTORY_BACKEND", "postgres");
        assert!(EngineConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_rejects_zero_frames() {
        let config = TrackingConfig {
            min_frames_for_registration: 0,
            ..TrackingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_floor_per_tier() {
        let thresholds = PriorityThresholds::default();
        assert_eq!(thresholds.floor(PriorityTier::High), 0.4);
        assert_eq!(thresholds.floor(PriorityTier::Medium), 0.5);
        assert_eq!(thresholds.floor(PriorityTier::Low), 0.6);
    }
}
