use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{OperatorError, Result, RetryPolicy};

/// Prefix shared by every environment variable the operator reads
const ENV_PREFIX: &str = "QUORUM_OPS_";

/// Upper bound for the failover deadline, 30 days
pub const MAX_FAILOVER_DEADLINE_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Operator-wide configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub failover: FailoverConfig,
    pub upgrade: UpgradeConfig,
    pub membership: MembershipConfig,
    pub status_retry: RetryPolicy,
    pub logging: LoggingConfig,
}

/// Failure detection and removal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Disable to make the failover pass a no-op
    pub enabled: bool,
    /// How long a member must stay unhealthy before it is marked failed
    pub failover_deadline_seconds: u64,
    /// Cap on concurrent failure members, unless a cluster overrides it
    pub max_failover_count: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failover_deadline_seconds: 300,
            max_failover_count: 3,
        }
    }
}

impl FailoverConfig {
    pub fn deadline(&self) -> Result<chrono::Duration> {
        i64::try_from(self.failover_deadline_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                OperatorError::ConfigError(format!(
                    "failover deadline of {} seconds is out of range",
                    self.failover_deadline_seconds
                ))
            })
    }
}

/// Rolling-upgrade liveness gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Floating image tags that always require the live status check
    pub floating_tags: Vec<String>,
    /// First version exposing the live status endpoint
    pub min_status_check_version: String,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            floating_tags: vec!["latest".to_string(), "nightly".to_string()],
            min_status_check_version: "5.1.2-0".to_string(),
        }
    }
}

/// Endpoints of the cluster's own membership and status APIs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    pub tls_enabled: bool,
    /// Service suffix of the control plane, `{cluster}-{suffix}`
    pub control_plane_service: String,
    pub control_plane_port: u16,
    /// `{id}` is replaced with the numeric member id
    pub member_delete_path: String,
    pub status_port: u16,
    pub store_status_path: String,
    pub request_timeout_seconds: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            tls_enabled: false,
            control_plane_service: "pd".to_string(),
            control_plane_port: 2379,
            member_delete_path: "/pd/api/v1/members/id/{id}".to_string(),
            status_port: 20292,
            store_status_path: "/tiflash/store-status".to_string(),
            request_timeout_seconds: 5,
        }
    }
}

impl MembershipConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls_enabled {
            "https"
        } else {
            "http"
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json`, `pretty`, `compact`, or anything else for the full text format
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "full".to_string(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment, reading `.env` first
    /// when present. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        match dotenv() {
            Ok(_) => info!("Loaded .env file"),
            Err(_) => debug!("No .env file found, using system environment variables"),
        }

        let mut config = Self::default();

        if let Some(enabled) = env_parse::<bool>("FAILOVER_ENABLED")? {
            config.failover.enabled = enabled;
        }
        if let Some(deadline) = env_parse::<u64>("FAILOVER_DEADLINE_SECONDS")? {
            config.failover.failover_deadline_seconds = deadline;
        }
        if let Some(max) = env_parse::<u32>("MAX_FAILOVER_COUNT")? {
            config.failover.max_failover_count = max;
        }
        if let Some(tags) = env_var("FLOATING_TAGS") {
            config.upgrade.floating_tags = tags
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(version) = env_var("MIN_STATUS_CHECK_VERSION") {
            config.upgrade.min_status_check_version = version;
        }
        if let Some(tls) = env_parse::<bool>("TLS_ENABLED")? {
            config.membership.tls_enabled = tls;
        }
        if let Some(service) = env_var("CONTROL_PLANE_SERVICE") {
            config.membership.control_plane_service = service;
        }
        if let Some(port) = env_parse::<u16>("CONTROL_PLANE_PORT")? {
            config.membership.control_plane_port = port;
        }
        if let Some(port) = env_parse::<u16>("STATUS_PORT")? {
            config.membership.status_port = port;
        }
        if let Some(timeout) = env_parse::<u64>("REQUEST_TIMEOUT_SECONDS")? {
            config.membership.request_timeout_seconds = timeout;
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = env_var("LOG_FORMAT") {
            config.logging.format = format;
        }

        config.validate()?;

        info!(
            deadline_seconds = config.failover.failover_deadline_seconds,
            max_failover_count = config.failover.max_failover_count,
            failover_enabled = config.failover.enabled,
            "Operator configuration loaded"
        );
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Validate that all configuration values are usable
    pub fn validate(&self) -> Result<()> {
        if self.failover.failover_deadline_seconds == 0 {
            return Err(OperatorError::ConfigError(
                "failover deadline must be greater than 0".to_string(),
            ));
        }
        if self.failover.failover_deadline_seconds > MAX_FAILOVER_DEADLINE_SECONDS {
            return Err(OperatorError::ConfigError(format!(
                "failover deadline must be at most {} seconds",
                MAX_FAILOVER_DEADLINE_SECONDS
            )));
        }

        if semver::Version::parse(&self.upgrade.min_status_check_version).is_err() {
            return Err(OperatorError::ConfigError(format!(
                "min_status_check_version {:?} is not a semantic version",
                self.upgrade.min_status_check_version
            )));
        }

        if self.membership.control_plane_service.is_empty() {
            return Err(OperatorError::ConfigError(
                "control plane service name cannot be empty".to_string(),
            ));
        }

        if !self.membership.member_delete_path.contains("{id}") {
            return Err(OperatorError::ConfigError(
                "member delete path must contain an {id} placeholder".to_string(),
            ));
        }

        if self.status_retry.max_attempts == 0 {
            return Err(OperatorError::ConfigError(
                "status retry needs at least one attempt".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, key)).ok()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_var(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            OperatorError::ConfigError(format!("{}{} has invalid value {:?}", ENV_PREFIX, key, raw))
        }),
        None => Ok(None),
    }
}
