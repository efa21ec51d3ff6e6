pub mod adapter;
pub mod api;
pub mod config;
pub mod domain;
pub mod observability;
pub mod registry;
pub mod rules;
pub mod simulator;
pub mod transport;

pub use config::Config;
pub use domain::{ConnectivityId, Message, QueueInfo, RuleId, Value};
pub use rules::{MessageCompareRule, Rule, RuleError};
pub use simulator::Simulator;
