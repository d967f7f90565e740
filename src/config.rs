use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::net::relay::{Destination, TunnelEndpoint, DEFAULT_MAX_MESSAGE_SIZE};

/// Top-level configuration; each tool reads its own section.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisConfig>,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(level) = &self.general.log_level {
            if level.parse::<log::LevelFilter>().is_err() {
                return Err(ValidationError::InvalidGeneral(format!(
                    "unknown log_level '{}'",
                    level
                )));
            }
        }

        if let Some(tunnel) = &self.tunnel {
            tunnel.validate()?;
        }

        if let Some(analysis) = &self.analysis {
            if analysis.window_start >= analysis.window_end {
                return Err(ValidationError::InvalidAnalysis(
                    "window_start must be before window_end".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Log filter from configuration, defaulting to `info`
    pub fn log_level(&self) -> &str {
        self.general.log_level.as_deref().unwrap_or("info")
    }
}

/// Shared general configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GeneralConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Where the relay lives and what it should connect to
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TunnelConfig {
    pub relay_url: String,
    pub destination: DestinationConfig,
    /// Local port to listen on; a free one is picked when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<usize>,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DestinationConfig {
    pub host: String,
    pub port: u16,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

impl TunnelConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(ValidationError::InvalidTunnel(format!(
                "relay_url must be a ws:// or wss:// URL, got '{}'",
                self.relay_url
            )));
        }
        if self.destination.host.is_empty() {
            return Err(ValidationError::InvalidTunnel(
                "destination host cannot be empty".to_string(),
            ));
        }
        if self.destination.port == 0 {
            return Err(ValidationError::InvalidTunnel(
                "destination port cannot be 0".to_string(),
            ));
        }
        if self.max_message_size == Some(0) {
            return Err(ValidationError::InvalidTunnel(
                "max_message_size must be positive".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ValidationError::InvalidTunnel(
                "connect_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> TunnelEndpoint {
        TunnelEndpoint {
            relay_url: self.relay_url.clone(),
            destination: Destination {
                host: self.destination.host.clone(),
                port: self.destination.port,
            },
            max_message_size: self.max_message_size.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE),
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Inputs of a placement history analysis
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalysisConfig {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// JSON array of audit events
    pub events: PathBuf,
    /// JSON array of instances that currently exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<PathBuf>,
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid general configuration: {0}")]
    InvalidGeneral(String),
    #[error("Invalid tunnel configuration: {0}")]
    InvalidTunnel(String),
    #[error("Invalid analysis configuration: {0}")]
    InvalidAnalysis(String),
}
