//! Process-wide configuration (component G): loads and validates
//! `configs/config.yml`, the single source of truth for every listener,
//! upstream target, move destination, and the pseudonym client.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use dimse::{associator::UpstreamTarget, DimseConfig};
use pseudonym::PseudonymClientConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration field `{field}`: {reason}")]
    Validation { field: String, reason: String },
}

impl ConfigError {
    fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(rename = "AET")]
    pub aet: String,
    #[serde(rename = "PORT")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(rename = "AET", default = "default_upstream_aet")]
    pub aet: String,
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "PORT")]
    pub port: u16,
}

fn default_upstream_aet() -> String {
    "ANY-SCP".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllowedDestination {
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "PORT")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(rename = "LEVEL", default = "default_log_level")]
    pub level: String,
    #[serde(rename = "FORMAT", default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(rename = "ASSOCIATION_SECS", default = "default_association_timeout")]
    pub association_secs: u64,
    #[serde(rename = "PSEUDONYM_HTTP_SECS", default = "default_pseudonym_timeout")]
    pub pseudonym_http_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            association_secs: default_association_timeout(),
            pseudonym_http_secs: default_pseudonym_timeout(),
        }
    }
}

fn default_association_timeout() -> u64 {
    30
}

fn default_pseudonym_timeout() -> u64 {
    10
}

impl TimeoutsConfig {
    pub fn association(&self) -> Duration {
        Duration::from_secs(self.association_secs)
    }
}

fn default_queue_capacity() -> usize {
    dimse::queue::DEFAULT_QUEUE_CAPACITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(rename = "INGRESS")]
    pub ingress: ListenerConfig,
    #[serde(rename = "C_STORE_ENDPOINT")]
    pub c_store_endpoint: ListenerConfig,
    #[serde(rename = "UPSTREAM")]
    pub upstream: UpstreamConfig,
    #[serde(rename = "ALLOWED_AET", default)]
    pub allowed_aet: HashMap<String, AllowedDestination>,
    #[serde(rename = "PSEUDONYMIZATION_SERVER")]
    pub pseudonymization_server: PseudonymClientConfig,

    #[serde(rename = "LOGGING", default)]
    pub logging: LoggingConfig,
    #[serde(rename = "TIMEOUTS", default)]
    pub timeouts: TimeoutsConfig,
    #[serde(rename = "QUEUE_CAPACITY", default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl ProxyConfig {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: ProxyConfig = serde_yaml::from_str(&raw)?;
        config.timeouts.pseudonym_http_secs =
            config.timeouts.pseudonym_http_secs.max(1);
        config.pseudonymization_server.http_timeout_secs = config.timeouts.pseudonym_http_secs;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_listener(&self.ingress, "INGRESS")?;
        validate_listener(&self.c_store_endpoint, "C_STORE_ENDPOINT")?;

        if self.ingress.port == self.c_store_endpoint.port {
            return Err(ConfigError::validation(
                "INGRESS.PORT/C_STORE_ENDPOINT.PORT",
                "public and internal listeners must bind different ports",
            ));
        }

        if self.upstream.ip.trim().is_empty() {
            return Err(ConfigError::validation("UPSTREAM.IP", "must not be empty"));
        }
        if self.upstream.port == 0 {
            return Err(ConfigError::validation("UPSTREAM.PORT", "must be greater than 0"));
        }

        for (destination, target) in &self.allowed_aet {
            if target.ip.trim().is_empty() {
                return Err(ConfigError::validation(
                    format!("ALLOWED_AET.{destination}.IP"),
                    "must not be empty",
                ));
            }
            if target.port == 0 {
                return Err(ConfigError::validation(
                    format!("ALLOWED_AET.{destination}.PORT"),
                    "must be greater than 0",
                ));
            }
        }

        if self.pseudonymization_server.endpoint_url.trim().is_empty() {
            return Err(ConfigError::validation(
                "PSEUDONYMIZATION_SERVER.ENDPOINT_URL",
                "must not be empty",
            ));
        }
        if self.pseudonymization_server.domain.trim().is_empty() {
            return Err(ConfigError::validation(
                "PSEUDONYMIZATION_SERVER.DOMAIN",
                "must not be empty",
            ));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::validation("QUEUE_CAPACITY", "must be greater than 0"));
        }

        Ok(())
    }

    /// Resolves a client-supplied MoveDestination AE title against
    /// `ALLOWED_AET`, the gate C-MOVE handling rejects unknown destinations
    /// through (§4.5, §8 scenario 6).
    pub fn resolve_move_destination(&self, aet: &str) -> Option<&AllowedDestination> {
        self.allowed_aet.get(aet)
    }

    pub fn ingress_dimse_config(&self) -> DimseConfig {
        DimseConfig {
            local_aet: self.ingress.aet.clone(),
            port: self.ingress.port,
            association_timeout_secs: self.timeouts.association_secs,
            ..Default::default()
        }
    }

    pub fn internal_dimse_config(&self) -> DimseConfig {
        DimseConfig {
            local_aet: self.c_store_endpoint.aet.clone(),
            port: self.c_store_endpoint.port,
            association_timeout_secs: self.timeouts.association_secs,
            ..Default::default()
        }
    }

    pub fn upstream_target(&self, calling_aet: &str) -> UpstreamTarget {
        UpstreamTarget {
            host: self.upstream.ip.clone(),
            port: self.upstream.port,
            called_aet: self.upstream.aet.clone(),
            calling_aet: calling_aet.to_string(),
            max_pdu: self.ingress_dimse_config().max_pdu,
        }
    }
}

fn validate_listener(listener: &ListenerConfig, field: &str) -> Result<()> {
    if listener.aet.trim().is_empty() || listener.aet.len() > 16 {
        return Err(ConfigError::validation(
            format!("{field}.AET"),
            "AE title must be 1-16 characters",
        ));
    }
    if listener.port == 0 {
        return Err(ConfigError::validation(format!("{field}.PORT"), "must be greater than 0"));
    }
    Ok(())
}
