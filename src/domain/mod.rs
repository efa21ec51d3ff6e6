pub mod ids;
pub mod message;
pub mod queue;

pub use ids::{ConnectivityId, RuleId};
pub use message::{CodecError, Direction, Message, MessageMetadata, Value};
pub use queue::QueueInfo;
