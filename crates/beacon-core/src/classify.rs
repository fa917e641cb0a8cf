//! Channel name classification for Beacon.
//!
//! Channel kinds are never stored; they are derived on every use by
//! re-applying the configured patterns, so a configuration change takes
//! effect immediately.

use serde::{Deserialize, Serialize};

/// The kind of a channel, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Open to any connection, no handshake.
    Public,
    /// Requires authentication against the application server.
    Private,
    /// Requires authentication and maintains a per-user roster.
    Presence,
}

impl ChannelKind {
    /// Whether joining a channel of this kind requires the auth handshake.
    #[must_use]
    pub fn requires_auth(self) -> bool {
        !matches!(self, ChannelKind::Public)
    }
}

/// Classification rules: ordered glob patterns where a trailing `*`
/// matches any suffix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRules {
    /// Patterns naming presence channels.
    #[serde(default = "default_presence_patterns")]
    pub presence: Vec<String>,

    /// Patterns naming private channels.
    #[serde(default = "default_private_patterns")]
    pub private: Vec<String>,

    /// Patterns naming client-originated events.
    #[serde(default = "default_client_event_patterns")]
    pub client_events: Vec<String>,
}

fn default_presence_patterns() -> Vec<String> {
    vec!["presence-*".to_string()]
}

fn default_private_patterns() -> Vec<String> {
    vec!["private-*".to_string()]
}

fn default_client_event_patterns() -> Vec<String> {
    vec!["client-*".to_string()]
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            presence: default_presence_patterns(),
            private: default_private_patterns(),
            client_events: default_client_event_patterns(),
        }
    }
}

/// Pattern-matches channel and event names against immutable rules.
#[derive(Debug, Clone, Default)]
pub struct ChannelClassifier {
    rules: ClassifierRules,
}

impl ChannelClassifier {
    /// Create a classifier from the given rules.
    #[must_use]
    pub fn new(rules: ClassifierRules) -> Self {
        Self { rules }
    }

    /// Classify a channel name.
    ///
    /// Presence patterns are checked before private patterns: presence is a
    /// stricter subtype of private and must not be demoted to generic
    /// private handling.
    #[must_use]
    pub fn classify(&self, channel: &str) -> ChannelKind {
        if self.rules.presence.iter().any(|p| glob_match(p, channel)) {
            ChannelKind::Presence
        } else if self.rules.private.iter().any(|p| glob_match(p, channel)) {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        }
    }

    /// Whether an event name is a client-originated event.
    #[must_use]
    pub fn is_client_event(&self, event: &str) -> bool {
        self.rules
            .client_events
            .iter()
            .any(|p| glob_match(p, event))
    }
}

/// Match `name` against `pattern`, where a trailing `*` matches any suffix.
fn glob_match(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}
