use std::sync::Arc;
use tracing::debug;

use crate::simulator::Simulator;

use super::request::RuleIdRequest;
use super::response::{Ack, RulesInfo};

/// Remote view of the rule registry: list and remove.
///
/// Rules are added in-process only, since their handlers are code.
#[derive(Clone)]
pub struct RuleManagementService {
    simulator: Arc<Simulator>,
}

impl RuleManagementService {
    pub fn new(simulator: Arc<Simulator>) -> Self {
        RuleManagementService { simulator }
    }

    pub fn list_rules(&self) -> RulesInfo {
        RulesInfo {
            ids: self.simulator.list_rules(),
        }
    }

    /// Always acknowledges, whether or not the rule existed.
    pub fn remove_rule(&self, request: RuleIdRequest) -> Ack {
        let removed = self.simulator.remove_rule(request.id);
        debug!(rule_id = %request.id, removed, "Remove rule request");
        Ack::default()
    }
}
