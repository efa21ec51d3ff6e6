use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::domain::{ConnectivityId, QueueInfo};

/// Errors that can occur while loading endpoint configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Address of a remote connectivity service that can report queue bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryAddress {
    pub host: String,
    pub port: u16,
}

impl DiscoveryAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        DiscoveryAddress {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for DiscoveryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Queue settings for one endpoint. Every field is optional here; the
/// adapter decides at construction whether enough is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    #[serde(default)]
    pub discovery: Option<DiscoveryAddress>,

    #[serde(default)]
    pub exchange_name: Option<String>,

    #[serde(default)]
    pub inbound_queue_name: Option<String>,

    #[serde(default)]
    pub outbound_queue_name: Option<String>,
}

impl EndpointSettings {
    /// Static settings only, no discovery.
    pub fn fixed(
        exchange_name: impl Into<String>,
        inbound_queue_name: impl Into<String>,
        outbound_queue_name: impl Into<String>,
    ) -> Self {
        EndpointSettings {
            discovery: None,
            exchange_name: Some(exchange_name.into()),
            inbound_queue_name: Some(inbound_queue_name.into()),
            outbound_queue_name: Some(outbound_queue_name.into()),
        }
    }

    /// Statically configured binding, or the name of the first missing field.
    pub fn static_queue_info(&self) -> Result<QueueInfo, &'static str> {
        let info = QueueInfo::new(
            self.exchange_name.clone().unwrap_or_default(),
            self.inbound_queue_name.clone().unwrap_or_default(),
            self.outbound_queue_name.clone().unwrap_or_default(),
        );
        match info.missing_field() {
            Some(field) => Err(field),
            None => Ok(info),
        }
    }

    /// Fill every unset field from `defaults`.
    pub fn or(self, defaults: &EndpointSettings) -> EndpointSettings {
        EndpointSettings {
            discovery: self.discovery.or_else(|| defaults.discovery.clone()),
            exchange_name: self.exchange_name.or_else(|| defaults.exchange_name.clone()),
            inbound_queue_name: self
                .inbound_queue_name
                .or_else(|| defaults.inbound_queue_name.clone()),
            outbound_queue_name: self
                .outbound_queue_name
                .or_else(|| defaults.outbound_queue_name.clone()),
        }
    }
}

/// Per-endpoint settings plus process-wide defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default)]
    pub endpoints: HashMap<ConnectivityId, EndpointSettings>,

    /// Applied to endpoints missing from the file and to unset fields.
    #[serde(skip)]
    pub defaults: EndpointSettings,
}

impl EndpointsConfig {
    pub fn new(defaults: EndpointSettings) -> Self {
        EndpointsConfig {
            endpoints: HashMap::new(),
            defaults,
        }
    }

    pub fn with_endpoint(
        mut self,
        id: impl Into<ConnectivityId>,
        settings: EndpointSettings,
    ) -> Self {
        self.endpoints.insert(id.into(), settings);
        self
    }

    /// Effective settings for an endpoint.
    pub fn settings_for(&self, id: &ConnectivityId) -> EndpointSettings {
        match self.endpoints.get(id) {
            Some(settings) => settings.clone().or(&self.defaults),
            None => self.defaults.clone(),
        }
    }
}

/// Load endpoint settings from a YAML file.
pub fn load_endpoints(
    path: impl AsRef<Path>,
    defaults: EndpointSettings,
) -> Result<EndpointsConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: EndpointsConfig = serde_yaml::from_str(&content)?;
    config.defaults = defaults;

    validate_endpoints(&config)?;

    Ok(config)
}

fn validate_endpoints(config: &EndpointsConfig) -> Result<(), ConfigError> {
    for (id, settings) in &config.endpoints {
        if id.as_str().is_empty() {
            return Err(ConfigError::Validation(
                "Endpoint id cannot be empty".to_string(),
            ));
        }

        if let Some(ref discovery) = settings.discovery {
            if discovery.host.is_empty() || discovery.port == 0 {
                return Err(ConfigError::Validation(format!(
                    "Invalid discovery address for {}: {}",
                    id, discovery
                )));
            }
        }

        let names = [
            ("exchange_name", &settings.exchange_name),
            ("inbound_queue_name", &settings.inbound_queue_name),
            ("outbound_queue_name", &settings.outbound_queue_name),
        ];
        for (field, value) in names {
            if matches!(value, Some(v) if v.is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "Empty {} for endpoint {}",
                    field, id
                )));
            }
        }
    }

    Ok(())
}
