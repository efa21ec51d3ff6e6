use std::collections::HashMap;
use std::fmt;

use crate::domain::{ConnectivityId, Message};
use crate::rules::traits::{Rule, RuleError};

/// Argument key holding the expected message type name.
pub const MESSAGE_NAME: &str = "#MessageName";

/// Argument keys starting with this marker are not field comparisons.
pub const RESERVED_PREFIX: char = '#';

type Handler = Box<dyn Fn(&Message) -> Result<Vec<Message>, RuleError> + Send + Sync>;

/// Check `message` against field-equality arguments.
///
/// The message type must equal the `#MessageName` argument, and every
/// non-reserved argument must name a field holding an equal simple value.
/// Absent fields read as null, which never matches.
pub fn matches_arguments(arguments: &HashMap<String, String>, message: &Message) -> bool {
    match arguments.get(MESSAGE_NAME) {
        Some(name) if name == message.message_type() => {}
        _ => return false,
    }

    arguments
        .iter()
        .filter(|(key, _)| !key.starts_with(RESERVED_PREFIX))
        .all(|(key, expected)| {
            message
                .field_or_null(key)
                .as_simple()
                .is_some_and(|actual| actual == expected)
        })
}

/// Rule that fires on field equality and answers through a handler closure.
pub struct MessageCompareRule {
    connectivity_id: ConnectivityId,
    arguments: HashMap<String, String>,
    handler: Handler,
}

impl MessageCompareRule {
    pub fn new<F>(
        connectivity_id: ConnectivityId,
        arguments: HashMap<String, String>,
        handler: F,
    ) -> Self
    where
        F: Fn(&Message) -> Result<Vec<Message>, RuleError> + Send + Sync + 'static,
    {
        MessageCompareRule {
            connectivity_id,
            arguments,
            handler: Box::new(handler),
        }
    }

    /// Start building a rule for messages of type `message_name`.
    pub fn builder(
        connectivity_id: impl Into<ConnectivityId>,
        message_name: impl Into<String>,
    ) -> MessageCompareRuleBuilder {
        let mut arguments = HashMap::new();
        arguments.insert(MESSAGE_NAME.to_string(), message_name.into());

        MessageCompareRuleBuilder {
            connectivity_id: connectivity_id.into(),
            arguments,
            handler: None,
        }
    }

    /// Expected message type, if configured.
    pub fn message_name(&self) -> Option<&str> {
        self.arguments.get(MESSAGE_NAME).map(String::as_str)
    }
}

impl fmt::Debug for MessageCompareRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCompareRule")
            .field("connectivity_id", &self.connectivity_id)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

impl Rule for MessageCompareRule {
    fn connectivity_id(&self) -> &ConnectivityId {
        &self.connectivity_id
    }

    fn arguments(&self) -> &HashMap<String, String> {
        &self.arguments
    }

    fn check_triggered(&self, message: &Message) -> bool {
        matches_arguments(&self.arguments, message)
    }

    fn handle(&self, message: &Message) -> Result<Vec<Message>, RuleError> {
        if self.check_triggered(message) {
            (self.handler)(message)
        } else {
            Ok(Vec::new())
        }
    }
}

/// Builder for [`MessageCompareRule`].
pub struct MessageCompareRuleBuilder {
    connectivity_id: ConnectivityId,
    arguments: HashMap<String, String>,
    handler: Option<Handler>,
}

impl MessageCompareRuleBuilder {
    /// Require field `key` to hold the simple value `value`.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Message) -> Result<Vec<Message>, RuleError> + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Build the rule. Without a handler the rule swallows matching messages.
    pub fn build(self) -> MessageCompareRule {
        MessageCompareRule {
            connectivity_id: self.connectivity_id,
            arguments: self.arguments,
            handler: self.handler.unwrap_or_else(|| Box::new(|_| Ok(Vec::new()))),
        }
    }
}
