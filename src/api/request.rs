use serde::{Deserialize, Serialize};

use crate::domain::RuleId;

/// Body of a remove request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuleIdRequest {
    pub id: RuleId,
}

impl From<RuleId> for RuleIdRequest {
    fn from(id: RuleId) -> Self {
        RuleIdRequest { id }
    }
}
