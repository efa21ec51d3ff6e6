pub mod compare;
pub mod traits;

pub use compare::{matches_arguments, MessageCompareRule, MessageCompareRuleBuilder, MESSAGE_NAME};
pub use traits::{Rule, RuleError};
