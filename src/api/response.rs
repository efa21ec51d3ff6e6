use serde::{Deserialize, Serialize};

use crate::domain::RuleId;

/// Identities of every registered rule, ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesInfo {
    pub ids: Vec<RuleId>,
}

/// Empty acknowledgment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub rules: usize,
    pub adapters: usize,
}
