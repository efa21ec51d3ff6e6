use std::collections::HashMap;
use std::fmt::Debug;
use thiserror::Error;

use crate::domain::{ConnectivityId, Message};

/// Errors raised by a rule while producing its responses.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl RuleError {
    pub fn handler(reason: impl Into<String>) -> Self {
        RuleError::Handler(reason.into())
    }
}

/// A unit of matching logic bound to one endpoint.
///
/// Rules are evaluated concurrently from every subscriber task of their
/// endpoint, so implementations must not rely on exclusive access.
pub trait Rule: Send + Sync + Debug {
    /// Endpoint this rule belongs to for its whole lifetime.
    fn connectivity_id(&self) -> &ConnectivityId;

    /// Arguments the rule was built with.
    fn arguments(&self) -> &HashMap<String, String>;

    /// Whether the rule fires for `message`.
    fn check_triggered(&self, message: &Message) -> bool;

    /// Produce the responses for `message`.
    ///
    /// Called by the dispatcher only after [`Rule::check_triggered`] returned
    /// true. A panic here is caught by the dispatcher and treated like an
    /// `Err`.
    fn handle(&self, message: &Message) -> Result<Vec<Message>, RuleError>;
}
