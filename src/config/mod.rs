pub mod endpoints;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::domain::ConnectivityId;
use crate::transport::TransportSettings;

pub use endpoints::{
    load_endpoints, ConfigError, DiscoveryAddress, EndpointSettings, EndpointsConfig,
};

/// Simulator configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "msgsim")]
#[command(about = "Rule-driven protocol traffic simulator")]
pub struct Config {
    /// Management API listen address
    #[arg(long, default_value = "0.0.0.0:8080", env = "MSGSIM_LISTEN_ADDR")]
    pub listen_addr: String,

    /// Path to endpoints YAML file (optional)
    #[arg(long, env = "MSGSIM_ENDPOINTS_PATH")]
    pub endpoints_path: Option<PathBuf>,

    /// Endpoint owned by this process; its adapter is created at startup
    #[arg(long, env = "MSGSIM_CONNECTIVITY_ID")]
    pub connectivity_id: Option<String>,

    /// Default exchange name for endpoints without their own
    #[arg(long, env = "MSGSIM_EXCHANGE_NAME")]
    pub exchange_name: Option<String>,

    /// Default inbound queue name
    #[arg(long, env = "MSGSIM_IN_QUEUE")]
    pub in_queue: Option<String>,

    /// Default outbound queue name
    #[arg(long, env = "MSGSIM_OUT_QUEUE")]
    pub out_queue: Option<String>,

    /// Queue transport: an AMQP broker, or in-process queues for local demos
    #[arg(long, value_enum, default_value_t = TransportKind::Amqp, env = "MSGSIM_TRANSPORT")]
    pub transport: TransportKind,

    /// Message broker host
    #[arg(long, default_value = "localhost", env = "MSGSIM_TRANSPORT_HOST")]
    pub transport_host: String,

    /// Message broker virtual host
    #[arg(long, default_value = "/", env = "MSGSIM_TRANSPORT_VHOST")]
    pub transport_vhost: String,

    /// Message broker port
    #[arg(long, default_value = "5672", env = "MSGSIM_TRANSPORT_PORT")]
    pub transport_port: u16,

    /// Message broker username
    #[arg(long, default_value = "guest", env = "MSGSIM_TRANSPORT_USERNAME")]
    pub transport_username: String,

    /// Message broker password
    #[arg(long, default_value = "guest", env = "MSGSIM_TRANSPORT_PASSWORD", hide_env_values = true)]
    pub transport_password: String,

    /// Timeout for the queue discovery call in milliseconds
    #[arg(long, default_value = "2000", env = "MSGSIM_DISCOVERY_TIMEOUT_MS")]
    pub discovery_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, default_value = "false", env = "MSGSIM_LOG_JSON")]
    pub log_json: bool,

    /// Enable graceful shutdown
    #[arg(long, default_value = "true", env = "MSGSIM_GRACEFUL_SHUTDOWN")]
    pub graceful_shutdown: bool,
}

/// Which [`Transport`](crate::transport::Transport) the binary runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// AMQP 0-9-1 broker reached with the transport settings.
    #[default]
    Amqp,
    /// In-process queues only reachable from this process.
    Memory,
}

impl Config {
    /// Get discovery timeout as Duration.
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Broker connection parameters.
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            host: self.transport_host.clone(),
            virtual_host: self.transport_vhost.clone(),
            port: self.transport_port,
            username: self.transport_username.clone(),
            password: self.transport_password.clone(),
        }
    }

    /// Process-level queue names, used where an endpoint has none of its own.
    pub fn default_endpoint_settings(&self) -> EndpointSettings {
        EndpointSettings {
            discovery: None,
            exchange_name: self.exchange_name.clone(),
            inbound_queue_name: self.in_queue.clone(),
            outbound_queue_name: self.out_queue.clone(),
        }
    }

    /// Endpoint settings from the YAML file if configured, else defaults only.
    pub fn load_endpoints(&self) -> Result<EndpointsConfig, ConfigError> {
        let defaults = self.default_endpoint_settings();
        match self.endpoints_path {
            Some(ref path) => load_endpoints(path, defaults),
            None => Ok(EndpointsConfig::new(defaults)),
        }
    }

    pub fn owned_endpoint(&self) -> Option<ConnectivityId> {
        self.connectivity_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(ConnectivityId::new)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: "0.0.0.0:8080".to_string(),
            endpoints_path: None,
            connectivity_id: None,
            exchange_name: None,
            in_queue: None,
            out_queue: None,
            transport: TransportKind::Amqp,
            transport_host: "localhost".to_string(),
            transport_vhost: "/".to_string(),
            transport_port: 5672,
            transport_username: "guest".to_string(),
            transport_password: "guest".to_string(),
            discovery_timeout_ms: 2000,
            log_level: "info".to_string(),
            log_json: false,
            graceful_shutdown: true,
        }
    }
}
