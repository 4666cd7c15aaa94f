//! Skill handler registry and help index.
//!
//! Handlers register with a substrate key, the event type they expect for
//! probes, and help entries for the /help command. Registrations are
//! append-only for the process lifetime; re-registering a key adds a new
//! distinct entry.

use crate::transport::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reserved prefix every help command must start with.
pub const COMMAND_PREFIX: char = '/';

/// One /help line: command and description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelpEntry {
    #[serde(rename = "cmd")]
    pub command: String,
    #[serde(rename = "txt")]
    pub description: String,
}

/// One registered skill handler: substrate key, probe event type, and the
/// connection opened at registration time.
#[derive(Clone)]
pub struct HandlerRegistration {
    pub key: String,
    pub message_type: String,
    pub connection: Arc<dyn Connection>,
}

/// Registered handlers in registration order, plus the accumulated help index.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<HandlerRegistration>,
    helps: Vec<HelpEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a registration and its help entries. `help` must already have
    /// passed [`validate_help`]; entries are appended as-is.
    pub fn add(&mut self, registration: HandlerRegistration, help: Vec<HelpEntry>) {
        self.handlers.push(registration);
        self.helps.extend(help);
    }

    pub fn handlers(&self) -> &[HandlerRegistration] {
        &self.handlers
    }

    pub fn get(&self, ndx: usize) -> Option<&HandlerRegistration> {
        self.handlers.get(ndx)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Render the help index for the /help command.
    pub fn help_text(&self) -> String {
        let mut txt = String::from("/help: show this help\n");
        for h in &self.helps {
            txt.push_str(&h.command);
            txt.push_str(": ");
            txt.push_str(&h.description);
            txt.push('\n');
        }
        txt
    }
}

/// Check a registration's help metadata: non-empty list, every command starts
/// with the reserved prefix, every description non-empty. All-or-nothing: one
/// bad entry rejects the whole list.
pub fn validate_help(help: &[HelpEntry]) -> bool {
    if help.is_empty() {
        return false;
    }
    help.iter()
        .all(|h| h.command.starts_with(COMMAND_PREFIX) && !h.description.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use async_trait::async_trait;

    struct NullConnection;

    #[async_trait]
    impl Connection for NullConnection {
        async fn request(
            &self,
            _payload: serde_json::Value,
        ) -> Result<Option<serde_json::Value>, TransportError> {
            Ok(None)
        }
    }

    fn entry(command: &str, description: &str) -> HelpEntry {
        HelpEntry {
            command: command.to_string(),
            description: description.to_string(),
        }
    }

    fn registration(key: &str) -> HandlerRegistration {
        HandlerRegistration {
            key: key.to_string(),
            message_type: "msg".to_string(),
            connection: Arc::new(NullConnection),
        }
    }

    #[test]
    fn help_must_be_non_empty() {
        assert!(!validate_help(&[]));
    }

    #[test]
    fn help_command_needs_reserved_prefix() {
        assert!(validate_help(&[entry("/weather", "show the weather")]));
        assert!(!validate_help(&[entry("weather", "show the weather")]));
        assert!(!validate_help(&[entry("", "show the weather")]));
    }

    #[test]
    fn one_bad_entry_rejects_the_list() {
        let help = vec![entry("/a", "first"), entry("b", "second")];
        assert!(!validate_help(&help));
    }

    #[test]
    fn help_description_must_be_present() {
        assert!(!validate_help(&[entry("/a", "")]));
    }

    #[test]
    fn help_text_lists_entries_in_registration_order() {
        let mut registry = HandlerRegistry::new();
        registry.add(registration("svc-a"), vec![entry("/a", "does a")]);
        registry.add(registration("svc-b"), vec![entry("/b", "does b")]);
        assert_eq!(
            registry.help_text(),
            "/help: show this help\n/a: does a\n/b: does b\n"
        );
    }

    #[test]
    fn re_registration_appends_a_distinct_entry() {
        let mut registry = HandlerRegistry::new();
        registry.add(registration("svc-a"), vec![entry("/a", "does a")]);
        registry.add(registration("svc-a"), vec![entry("/a", "does a")]);
        assert_eq!(registry.len(), 2);
    }
}
