//! Engine configuration loaded from environment variables.
//!
//! Every setting has a default, so hosts can construct the engine with zero
//! configuration.

use atlerts_shared::constants::{
    DEFAULT_BROADCAST_FEED_LIMIT, DEFAULT_RECEIPT_LOOKUP_LIMIT, DEFAULT_SUPPORT_AGENT_ID,
};
use atlerts_shared::UserIdentity;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Number of most recent broadcasts kept in the feed.
    /// Env: `ATLERTS_BROADCAST_FEED_LIMIT`
    /// Default: `50`
    pub broadcast_feed_limit: usize,

    /// Maximum number of reader profiles fetched for one broadcast.
    /// Env: `ATLERTS_RECEIPT_LOOKUP_LIMIT`
    /// Default: `10`
    pub receipt_lookup_limit: usize,

    /// Recipient of messages sent in a support conversation.
    /// Env: `ATLERTS_SUPPORT_AGENT_ID`
    /// Default: `helpdesk`
    pub support_agent_id: UserIdentity,

    /// Mark incoming messages read as soon as they arrive in an active
    /// conversation.
    /// Env: `ATLERTS_MARK_READ_ON_ARRIVAL` (true/false)
    /// Default: `true`
    pub mark_read_on_arrival: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broadcast_feed_limit: DEFAULT_BROADCAST_FEED_LIMIT,
            receipt_lookup_limit: DEFAULT_RECEIPT_LOOKUP_LIMIT,
            support_agent_id: UserIdentity::from(DEFAULT_SUPPORT_AGENT_ID),
            mark_read_on_arrival: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary key source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("ATLERTS_BROADCAST_FEED_LIMIT") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.broadcast_feed_limit = n,
                _ => tracing::warn!(value = %raw, "Invalid ATLERTS_BROADCAST_FEED_LIMIT, using default"),
            }
        }

        if let Some(raw) = lookup("ATLERTS_RECEIPT_LOOKUP_LIMIT") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.receipt_lookup_limit = n,
                _ => tracing::warn!(value = %raw, "Invalid ATLERTS_RECEIPT_LOOKUP_LIMIT, using default"),
            }
        }

        if let Some(raw) = lookup("ATLERTS_SUPPORT_AGENT_ID") {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                tracing::warn!("Empty ATLERTS_SUPPORT_AGENT_ID, using default");
            } else {
                config.support_agent_id = UserIdentity::from(trimmed);
            }
        }

        if let Some(raw) = lookup("ATLERTS_MARK_READ_ON_ARRIVAL") {
            match raw.to_lowercase().as_str() {
                "true" | "1" | "yes" => config.mark_read_on_arrival = true,
                "false" | "0" | "no" => config.mark_read_on_arrival = false,
                _ => tracing::warn!(value = %raw, "Invalid ATLERTS_MARK_READ_ON_ARRIVAL, using default"),
            }
        }

        config
    }
}
