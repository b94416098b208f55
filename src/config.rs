// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets arrive as environment variables (Cloud Run secret bindings), so
//! everything is read once at startup and kept in memory.

use chrono::Duration;
use std::env;
use std::str::FromStr;

/// Hard ceiling on items per store request (Firestore batch/transaction limit).
pub const STORE_MAX_BATCH_SIZE: usize = 500;

/// Which persistent store backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(StoreBackend::Firestore),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(ConfigError::Invalid("STORE_BACKEND", s.to_string())),
        }
    }
}

/// Tunables for priority, dispatch, and activity monitoring.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Weight applied to class rank for same-group riders
    pub class_weight: f64,
    /// Weight applied to minutes waited
    pub wait_weight: f64,
    /// Sentinel priority for emergency requests
    pub emergency_priority: f64,
    /// Assumed length of one ride when estimating driver availability
    pub average_ride_minutes: u32,
    /// Cadence of the periodic recompute/dispatch pass
    pub recalc_interval_secs: u64,
    /// How many times one dispatch step re-runs selection after losing a race
    pub max_assign_attempts: u32,
    /// How many times a transient store failure is retried
    pub transient_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Length of the fixed toggle-counting window
    pub toggle_window_minutes: i64,
    /// Toggles allowed per window before an abuse alert
    pub toggle_threshold: u32,
    /// Continuous inactivity tolerated before an alert
    pub inactivity_threshold_minutes: i64,
    /// Items per store batch request (never above [`STORE_MAX_BATCH_SIZE`])
    pub max_batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            class_weight: 10.0,
            wait_weight: 0.5,
            emergency_priority: 9999.0,
            average_ride_minutes: 15,
            recalc_interval_secs: 60,
            max_assign_attempts: 3,
            transient_retries: 3,
            retry_base_delay_ms: 100,
            toggle_window_minutes: 30,
            toggle_threshold: 5,
            inactivity_threshold_minutes: 15,
            max_batch_size: STORE_MAX_BATCH_SIZE,
        }
    }
}

impl DispatchConfig {
    pub fn toggle_window(&self) -> Duration {
        Duration::minutes(self.toggle_window_minutes)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::minutes(self.inactivity_threshold_minutes)
    }

    pub fn recalc_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.recalc_interval_secs)
    }

    /// Read overrides from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            class_weight: env_or("CLASS_WEIGHT", defaults.class_weight)?,
            wait_weight: env_or("WAIT_WEIGHT", defaults.wait_weight)?,
            emergency_priority: env_or("EMERGENCY_PRIORITY", defaults.emergency_priority)?,
            average_ride_minutes: env_or("AVERAGE_RIDE_MINUTES", defaults.average_ride_minutes)?,
            recalc_interval_secs: env_or("RECALC_INTERVAL_SECS", defaults.recalc_interval_secs)?,
            max_assign_attempts: env_or("MAX_ASSIGN_ATTEMPTS", defaults.max_assign_attempts)?,
            transient_retries: env_or("TRANSIENT_RETRIES", defaults.transient_retries)?,
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms)?,
            toggle_window_minutes: env_or("TOGGLE_WINDOW_MINUTES", defaults.toggle_window_minutes)?,
            toggle_threshold: env_or("TOGGLE_THRESHOLD", defaults.toggle_threshold)?,
            inactivity_threshold_minutes: env_or(
                "INACTIVITY_THRESHOLD_MINUTES",
                defaults.inactivity_threshold_minutes,
            )?,
            max_batch_size: env_or("MAX_BATCH_SIZE", defaults.max_batch_size)?
                .clamp(1, STORE_MAX_BATCH_SIZE),
        };

        if config.recalc_interval_secs == 0 {
            return Err(ConfigError::Invalid("RECALC_INTERVAL_SECS", "0".to_string()));
        }
        if config.max_assign_attempts == 0 {
            return Err(ConfigError::Invalid("MAX_ASSIGN_ATTEMPTS", "0".to_string()));
        }

        Ok(config)
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Persistent store implementation
    pub store_backend: StoreBackend,
    /// Events the in-process scheduler dispatches for
    pub live_event_ids: Vec<String>,
    /// JSON roster for the memory backend
    pub roster_file: Option<String>,

    /// JWT verification key for identity tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// Shared secret expected on `/tasks/*` calls from the external scheduler
    pub tasks_shared_secret: String,

    pub dispatch: DispatchConfig,
}

impl Config {
    /// Deterministic config for tests.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            store_backend: StoreBackend::Memory,
            live_event_ids: vec![],
            roster_file: None,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            tasks_shared_secret: "test_tasks_secret".to_string(),
            dispatch: DispatchConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env_or("PORT", 8080)?,
            store_backend: env_or("STORE_BACKEND", StoreBackend::Firestore)?,
            live_event_ids: env::var("LIVE_EVENT_IDS")
                .map(|v| parse_id_list(&v))
                .unwrap_or_default(),
            roster_file: env::var("ROSTER_FILE").ok().filter(|v| !v.trim().is_empty()),

            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            tasks_shared_secret: env::var("TASKS_SHARED_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("TASKS_SHARED_SECRET"))?,

            dispatch: DispatchConfig::from_env()?,
        })
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("TASKS_SHARED_SECRET", " secret ");
        env::set_var("LIVE_EVENT_IDS", "formal-2026, ,spring-social");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.tasks_shared_secret, "secret");
        assert_eq!(config.port, 8080);
        assert_eq!(
            config.live_event_ids,
            vec!["formal-2026".to_string(), "spring-social".to_string()]
        );
        assert_eq!(config.dispatch.toggle_threshold, 5);
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("Memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!(
            " firestore ".parse::<StoreBackend>().unwrap(),
            StoreBackend::Firestore
        );
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_dispatch_defaults() {
        let d = DispatchConfig::default();
        assert_eq!(d.class_weight, 10.0);
        assert_eq!(d.wait_weight, 0.5);
        assert_eq!(d.emergency_priority, 9999.0);
        assert_eq!(d.toggle_window(), Duration::minutes(30));
        assert_eq!(d.inactivity_threshold(), Duration::minutes(15));
        assert_eq!(d.max_batch_size, 500);
    }
}
