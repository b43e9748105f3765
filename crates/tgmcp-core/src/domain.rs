use serde::Serialize;

/// Canonical numeric id of a remote user, group or channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

/// Discriminator of a resolved entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Group,
    Channel,
    Unknown,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Channel => "channel",
            Self::Unknown => "unknown",
        }
    }

    /// Supergroups are channels on the wire, so they parse as `Channel`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" | "bot" => Some(Self::User),
            "group" | "chat" => Some(Self::Group),
            "channel" | "broadcast" | "supergroup" | "megagroup" => Some(Self::Channel),
            _ => None,
        }
    }
}

/// A resolved, canonical reference to a remote chat/user/channel.
///
/// Handles are immutable once built; callers get their own clone and the
/// resolver cache keeps only a lookup copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityHandle {
    id: EntityId,
    kind: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

impl EntityHandle {
    pub fn new(id: EntityId, kind: EntityKind, title: Option<String>) -> Self {
        Self { id, kind, title }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Title if known, otherwise the numeric id.
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(t) if !t.trim().is_empty() => t.clone(),
            _ => self.id.0.to_string(),
        }
    }

    /// JSON reference understood by the remote bridge (`{"type": .., "id": ..}`).
    pub fn peer(&self) -> serde_json::Value {
        serde_json::json!({ "type": self.kind.as_str(), "id": self.id.0 })
    }
}

/// Coarse family of remote methods that share one flood-control budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Messaging,
    Chats,
    Contacts,
    Groups,
    Media,
    Profile,
    Lookup,
}

impl OperationClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Messaging => "messaging",
            Self::Chats => "chats",
            Self::Contacts => "contacts",
            Self::Groups => "groups",
            Self::Media => "media",
            Self::Profile => "profile",
            Self::Lookup => "lookup",
        }
    }

    /// Prefix used in user-facing error codes (`MSG-ERR-042`).
    pub fn error_prefix(self) -> &'static str {
        match self {
            Self::Messaging => "MSG",
            Self::Chats => "CHAT",
            Self::Contacts => "CONTACT",
            Self::Groups => "GROUP",
            Self::Media => "MEDIA",
            Self::Profile => "PROFILE",
            Self::Lookup => "GEN",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The logical intent of one tool invocation.
///
/// Built once per call and never mutated; `targets` are raw identifiers that
/// the gateway resolves before running the strategy chain.
#[derive(Clone, Debug)]
pub struct OperationRequest {
    pub operation: &'static str,
    pub targets: Vec<String>,
    pub payload: serde_json::Value,
}

impl OperationRequest {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            targets: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn target(mut self, raw: impl Into<String>) -> Self {
        self.targets.push(raw.into());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_id() {
        let h = EntityHandle::new(EntityId(42), EntityKind::User, None);
        assert_eq!(h.display_name(), "42");
        let h = EntityHandle::new(EntityId(7), EntityKind::Group, Some("Team".into()));
        assert_eq!(h.display_name(), "Team");
        assert_eq!(h.title(), Some("Team"));
    }

    #[test]
    fn peer_reference_carries_kind_and_id() {
        let h = EntityHandle::new(EntityId(-100123), EntityKind::Channel, None);
        assert_eq!(h.peer(), serde_json::json!({ "type": "channel", "id": -100123 }));
    }

    #[test]
    fn entity_kind_parse_accepts_aliases() {
        assert_eq!(EntityKind::parse("Supergroup"), Some(EntityKind::Channel));
        assert_eq!(EntityKind::parse("megagroup"), Some(EntityKind::Channel));
        assert_eq!(EntityKind::parse("chat"), Some(EntityKind::Group));
        assert_eq!(EntityKind::parse("bot"), Some(EntityKind::User));
        assert_eq!(EntityKind::parse("nope"), None);
    }
}
