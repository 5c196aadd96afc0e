//! Declarative configuration: upstream services, balancing strategy and
//! per-path endpoint policies.
//!
//! The configuration is loaded once at startup from a JSON file and is
//! immutable afterwards. Endpoint resolution merges the required
//! `DEFAULT` entry with an optional path-exact override; only fields
//! explicitly set in the override replace the default.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DoormanError, Result};

/// Key of the mandatory fallback endpoint entry.
pub const DEFAULT_ENDPOINT_KEY: &str = "DEFAULT";

/// Reserved prefix for administrative endpoints. Proxied endpoint keys
/// must not use it.
pub const ADMIN_PATH_PREFIX: &str = "/__doormanlb/";

/// Strategy used to pick one upstream among equivalents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    #[serde(rename = "ROUND_ROBIN")]
    RoundRobin,
    #[serde(rename = "LEAST_CONNECTIONS")]
    LeastConnections,
}

/// Whether responses for an endpoint are cached or passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheBehavior {
    #[serde(rename = "CACHE")]
    Cache,
    #[serde(rename = "PASSTHROUGH")]
    Passthrough,
}

/// One entry of the `endpoints` map as written in the file. All fields
/// are optional so that overrides only replace what they set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    #[serde(default)]
    pub expire_timeout: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_behavior: Option<CacheBehavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_parameters: Option<bool>,
}

/// The merged, effective policy for one request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPolicy {
    pub cache_behavior: CacheBehavior,
    pub expire_timeout: i64,
    pub ignore_parameters: bool,
}

impl EndpointPolicy {
    /// Cache TTL in wall-clock time. `expire_timeout` is milliseconds.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.expire_timeout.max(0) as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub services: Vec<String>,
    pub strategy: Strategy,
    pub endpoints: HashMap<String, EndpointConfig>,
}

impl Config {
    /// Loads and validates a configuration file. Any validation failure
    /// is fatal at startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DoormanError::Config(format!("reading config file {}: {e}", path.display()))
        })?;

        let config: Config = serde_json::from_str(&contents).map_err(|e| {
            DoormanError::Config(format!("decoding config file {}: {e}", path.display()))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            return Err(DoormanError::Config(
                "services must contain at least one upstream".into(),
            ));
        }

        for (i, service_url) in self.services.iter().enumerate() {
            if service_url.trim().is_empty() {
                return Err(DoormanError::Config(format!(
                    "services[{i}] cannot be empty"
                )));
            }
        }

        let default = self.endpoints.get(DEFAULT_ENDPOINT_KEY).ok_or_else(|| {
            DoormanError::Config(format!("endpoints.{DEFAULT_ENDPOINT_KEY} is required"))
        })?;

        if default.cache_behavior.is_none() {
            return Err(DoormanError::Config(format!(
                "endpoints.{DEFAULT_ENDPOINT_KEY}: cacheBehavior is required"
            )));
        }
        validate_endpoint(DEFAULT_ENDPOINT_KEY, default)?;

        for (key, endpoint) in &self.endpoints {
            if key == DEFAULT_ENDPOINT_KEY {
                continue;
            }
            if key.is_empty() {
                return Err(DoormanError::Config("endpoint keys cannot be empty".into()));
            }
            if key.starts_with(ADMIN_PATH_PREFIX) {
                return Err(DoormanError::Config(format!(
                    "endpoint key {key:?} uses reserved prefix {ADMIN_PATH_PREFIX:?}"
                )));
            }
            validate_endpoint(key, endpoint)?;

            // The merged view has to be coherent as well: an override
            // that resolves to CACHE needs a usable TTL.
            let policy = self.endpoint(key);
            if policy.cache_behavior == CacheBehavior::Cache && policy.expire_timeout <= 0 {
                return Err(DoormanError::Config(format!(
                    "endpoints.{key}: CACHE requires expireTimeout > 0"
                )));
            }
        }

        if default.cache_behavior == Some(CacheBehavior::Cache) && default.expire_timeout <= 0 {
            return Err(DoormanError::Config(format!(
                "endpoints.{DEFAULT_ENDPOINT_KEY}: CACHE requires expireTimeout > 0"
            )));
        }

        Ok(())
    }

    /// Returns the effective policy for a request path: the `DEFAULT`
    /// entry merged with the path-exact override, if any. Infallible at
    /// runtime; `validate` has already established the invariants.
    pub fn endpoint(&self, path: &str) -> EndpointPolicy {
        let default = self
            .endpoints
            .get(DEFAULT_ENDPOINT_KEY)
            .cloned()
            .unwrap_or_default();

        let mut merged = default;
        if let Some(override_cfg) = self.endpoints.get(path) {
            if override_cfg.expire_timeout > 0 {
                merged.expire_timeout = override_cfg.expire_timeout;
            }
            if override_cfg.cache_behavior.is_some() {
                merged.cache_behavior = override_cfg.cache_behavior;
            }
            if override_cfg.ignore_parameters.is_some() {
                merged.ignore_parameters = override_cfg.ignore_parameters;
            }
        }

        EndpointPolicy {
            cache_behavior: merged.cache_behavior.unwrap_or(CacheBehavior::Passthrough),
            expire_timeout: merged.expire_timeout,
            ignore_parameters: merged.ignore_parameters.unwrap_or(false),
        }
    }

    /// True iff any declared endpoint resolves to CACHE. Decides whether
    /// a coordination store is required at startup.
    pub fn uses_cache(&self) -> bool {
        self.endpoints
            .values()
            .any(|endpoint| endpoint.cache_behavior == Some(CacheBehavior::Cache))
    }
}

fn validate_endpoint(key: &str, endpoint: &EndpointConfig) -> Result<()> {
    if endpoint.expire_timeout < 0 {
        return Err(DoormanError::Config(format!(
            "endpoints.{key}: expireTimeout must be >= 0"
        )));
    }
    Ok(())
}
