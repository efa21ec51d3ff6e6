pub mod dispatch;
pub mod rule_registry;
pub mod store;

pub use dispatch::{DispatchEngine, Dispatcher};
pub use rule_registry::RuleRegistry;
pub use store::{RuleIndex, RuleStore};
