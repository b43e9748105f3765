//! The outbound port: an authenticated connection to the remote platform.
//!
//! Login, session storage and reconnects belong to the implementation. The
//! gateway only looks entities up, invokes methods and fetches listings.

use std::fmt;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    domain::{EntityHandle, EntityId, EntityKind},
    gateway::Identifier,
};

/// An error returned by the remote platform in response to a method call.
///
/// Numeric suffixes are stripped from the name and placed in [`RpcError::value`]:
/// `FLOOD_WAIT_30` becomes `RpcError { code: 420, name: "FLOOD_WAIT", value: Some(30), .. }`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE with digits removed. May be empty.
    pub name: String,
    /// Numeric suffix extracted from the name, or an explicit retry-after.
    pub value: Option<u32>,
    /// Human text from the remote side, if any.
    pub text: String,
}

impl RpcError {
    /// Parse a raw error name like `"FLOOD_WAIT_30"`.
    pub fn from_remote(code: i32, raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(idx) = raw.rfind('_') {
            let suffix = &raw[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(v) = suffix.parse::<u32>() {
                    return Self {
                        code,
                        name: raw[..idx].to_string(),
                        value: Some(v),
                        text: String::new(),
                    };
                }
            }
        }
        Self {
            code,
            name: raw.to_string(),
            value: None,
            text: String::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_value(mut self, value: Option<u32>) -> Self {
        if value.is_some() {
            self.value = value;
        }
        self
    }

    /// Match on the error name, with optional wildcard prefix/suffix `'*'`.
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        if !self.text.is_empty() {
            write!(f, " {}", self.text)?;
        }
        Ok(())
    }
}

/// Raw failure of one remote interaction, before classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote side rejected the request.
    Rpc(RpcError),
    /// No response within the request timeout.
    Timeout,
    /// Connection refused/reset or other transport failure.
    Connection(String),
    /// The capability does not exist on this connection (detected locally).
    Unavailable(String),
    /// Local input validation failed; nothing was sent.
    Invalid(String),
    /// The response did not have the shape this strategy needs.
    Malformed(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e) => write!(f, "{e}"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Connection(s) => write!(f, "connection error: {s}"),
            Self::Unavailable(s) => write!(f, "unavailable: {s}"),
            Self::Invalid(s) => write!(f, "invalid input: {s}"),
            Self::Malformed(s) => write!(f, "malformed response: {s}"),
        }
    }
}

impl std::error::Error for RemoteError {}

/// One candidate returned by an entity lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntity {
    pub id: i64,
    pub kind: EntityKind,
    pub title: Option<String>,
}

impl RemoteEntity {
    pub fn into_handle(self) -> EntityHandle {
        EntityHandle::new(EntityId(self.id), self.kind, self.title)
    }
}

/// Participant filter for group listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticipantFilter {
    All,
    Admins,
    Banned,
}

impl ParticipantFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Admins => "admins",
            Self::Banned => "banned",
        }
    }
}

/// A bulk result set the remote side can list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Listing {
    Dialogs,
    Messages { chat: EntityHandle },
    Search { chat: EntityHandle, query: String },
    Contacts,
    Blocked,
    Participants {
        chat: EntityHandle,
        filter: ParticipantFilter,
    },
}

impl Listing {
    /// Stable name, also used by config to mark cursor-capable listings.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dialogs => "dialogs",
            Self::Messages { .. } => "messages",
            Self::Search { .. } => "search",
            Self::Contacts => "contacts",
            Self::Blocked => "blocked",
            Self::Participants { .. } => "participants",
        }
    }

    /// Listing-specific parameters sent along with the window.
    pub fn params(&self) -> Value {
        match self {
            Self::Dialogs | Self::Contacts | Self::Blocked => json!({}),
            Self::Messages { chat } => json!({ "peer": chat.peer() }),
            Self::Search { chat, query } => json!({ "peer": chat.peer(), "q": query }),
            Self::Participants { chat, filter } => {
                json!({ "peer": chat.peer(), "filter": filter.as_str() })
            }
        }
    }
}

/// Offset window over a listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub limit: usize,
}

/// Authenticated remote connection (external collaborator).
///
/// One long-lived instance is shared by all tool calls; implementations are
/// responsible for their own request serialization.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Look an identifier up. Zero candidates means "no such entity".
    async fn lookup(&self, identifier: &Identifier) -> Result<Vec<RemoteEntity>, RemoteError>;

    /// Invoke a remote method by name.
    async fn invoke(&self, method: &str, params: Value) -> Result<Value, RemoteError>;

    /// Whether `fetch_listing` honours `Window::offset` for this listing.
    fn supports_cursor(&self, listing: &Listing) -> bool;

    /// Fetch a window of a listing, in the remote's stable order.
    async fn fetch_listing(&self, listing: &Listing, window: Window)
        -> Result<Vec<Value>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_strips_numeric_suffix() {
        let e = RpcError::from_remote(420, "FLOOD_WAIT_30");
        assert_eq!(e.name, "FLOOD_WAIT");
        assert_eq!(e.value, Some(30));

        let e = RpcError::from_remote(400, "PEER_ID_INVALID");
        assert_eq!(e.name, "PEER_ID_INVALID");
        assert_eq!(e.value, None);
    }

    #[test]
    fn rpc_error_wildcards() {
        let e = RpcError::from_remote(400, "MESSAGE_TOO_LONG");
        assert!(e.is("MESSAGE_*"));
        assert!(e.is("*_TOO_LONG"));
        assert!(!e.is("MESSAGE"));
    }

    #[test]
    fn explicit_value_overrides_only_when_present() {
        let e = RpcError::from_remote(429, "").with_value(Some(7));
        assert_eq!(e.value, Some(7));
        let e = RpcError::from_remote(420, "FLOOD_WAIT_3").with_value(None);
        assert_eq!(e.value, Some(3));
    }
}
