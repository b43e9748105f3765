use std::{
    collections::HashMap,
    sync::{OnceLock, PoisonError, RwLock},
    time::Duration,
};

use regex::Regex;
use tokio::time::Instant;

use crate::{
    domain::{EntityHandle, EntityId, OperationClass},
    ports::RemoteConnection,
};

use super::{
    backoff::{BackoffController, CallMode},
    classify::{classify, ErrorKind, ExecutionOutcome, Failure},
};

/// A caller-supplied identifier, after syntactic dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Identifier {
    Id(i64),
    Username(String),
    Phone(String),
    Invite(String),
}

fn username_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{2,31}$").expect("valid regex"))
}

fn invite_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{4,64}$").expect("valid regex"))
}

impl Identifier {
    /// Dispatch rule: numeric → id, `+digits` → phone, `@name`/bare name →
    /// username, `t.me` links by path, anything else → invite fragment.
    pub fn parse(raw: &str) -> Result<Self, Failure> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(Failure::invalid("An identifier is required."));
        }

        if let Some(path) = strip_link_host(s) {
            return Self::parse_link_path(raw, path);
        }

        if is_numeric(s) {
            return s
                .parse::<i64>()
                .map(Self::Id)
                .map_err(|_| Failure::invalid(format!("'{raw}' is not a valid chat id.")));
        }

        if let Some(rest) = s.strip_prefix('+') {
            let digits: String = rest
                .chars()
                .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
                .collect();
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                if !(5..=15).contains(&digits.len()) {
                    return Err(Failure::invalid(format!(
                        "'{raw}' is not a valid phone number."
                    )));
                }
                return Ok(Self::Phone(format!("+{digits}")));
            }
            // `+HASH` is how invite links print their fragment.
            return Self::invite(raw, rest);
        }

        if let Some(name) = s.strip_prefix('@') {
            return Self::username(raw, name);
        }

        if username_re().is_match(s) {
            return Ok(Self::Username(s.to_string()));
        }

        Self::invite(raw, s)
    }

    fn parse_link_path(raw: &str, path: &str) -> Result<Self, Failure> {
        let path = path
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_matches('/');
        if let Some(hash) = path.strip_prefix("joinchat/") {
            return Self::invite(raw, hash);
        }
        if let Some(hash) = path.strip_prefix('+') {
            return Self::invite(raw, hash);
        }
        // `t.me/name/123` points at a message; the chat is the first segment.
        let name = path.split('/').next().unwrap_or_default();
        Self::username(raw, name)
    }

    fn username(raw: &str, name: &str) -> Result<Self, Failure> {
        if username_re().is_match(name) {
            Ok(Self::Username(name.to_string()))
        } else {
            Err(Failure::invalid(format!("'{raw}' is not a valid username.")))
        }
    }

    fn invite(raw: &str, hash: &str) -> Result<Self, Failure> {
        if invite_re().is_match(hash) {
            Ok(Self::Invite(hash.to_string()))
        } else {
            Err(Failure::invalid(format!(
                "'{raw}' is not a chat id, username, phone number or invite link."
            )))
        }
    }

    /// Normalized cache key; usernames are case-insensitive.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Id(id) => format!("id:{id}"),
            Self::Username(u) => format!("user:{}", u.to_lowercase()),
            Self::Phone(p) => format!("phone:{p}"),
            Self::Invite(h) => format!("invite:{h}"),
        }
    }
}

fn is_numeric(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn strip_link_host(s: &str) -> Option<&str> {
    let rest = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
        .unwrap_or(s);
    ["t.me/", "telegram.me/", "telegram.dog/"]
        .iter()
        .find_map(|host| rest.strip_prefix(host))
}

#[derive(Clone, Debug)]
struct CacheEntry {
    handle: EntityHandle,
    stored_at: Instant,
}

/// Identifier → entity resolution with a bounded TTL cache.
///
/// Concurrent misses on the same identifier may both hit the remote side;
/// the last insert wins. Lookups are idempotent so that is harmless.
#[derive(Debug)]
pub struct Resolver {
    ttl: Duration,
    capacity: usize,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl Resolver {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn resolve(
        &self,
        conn: &dyn RemoteConnection,
        backoff: &BackoffController,
        mode: CallMode,
        raw: &str,
    ) -> ExecutionOutcome<EntityHandle> {
        let identifier = Identifier::parse(raw)?;
        let key = identifier.cache_key();

        if let Some(handle) = self.cached_at(&key, Instant::now()) {
            tracing::debug!(identifier = %key, "resolver cache hit");
            return Ok(handle);
        }

        backoff.admit(OperationClass::Lookup, mode).await?;

        let candidates = match conn.lookup(&identifier).await {
            Ok(c) => c,
            Err(e) => {
                let failure = classify(&e);
                backoff.record_failure(OperationClass::Lookup, &failure);
                tracing::debug!(identifier = %key, kind = %failure.kind, "lookup failed: {e}");
                return Err(failure);
            }
        };

        let mut handles: Vec<EntityHandle> = Vec::new();
        for c in candidates {
            if !handles.iter().any(|h| h.id().0 == c.id) {
                handles.push(c.into_handle());
            }
        }

        match handles.len() {
            0 => Err(Failure::new(
                ErrorKind::NotFound,
                format!("No chat or user matches '{}'.", raw.trim()),
            )),
            1 => {
                let handle = handles.remove(0);
                self.store_at(key, handle.clone(), Instant::now());
                Ok(handle)
            }
            n => Err(Failure::invalid(format!(
                "'{}' matches {n} different chats. Use the numeric id instead.",
                raw.trim()
            ))),
        }
    }

    fn cached_at(&self, key: &str, now: Instant) -> Option<EntityHandle> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.get(key)?;
        if now.saturating_duration_since(entry.stored_at) < self.ttl {
            Some(entry.handle.clone())
        } else {
            None
        }
    }

    fn store_at(&self, key: String, handle: EntityHandle, now: Instant) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if !cache.contains_key(&key) && cache.len() >= self.capacity {
            let ttl = self.ttl;
            cache.retain(|_, e| now.saturating_duration_since(e.stored_at) < ttl);
            if cache.len() >= self.capacity {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = oldest {
                    cache.remove(&k);
                }
            }
        }
        cache.insert(
            key,
            CacheEntry {
                handle,
                stored_at: now,
            },
        );
    }

    /// Drop the cached mapping for one raw identifier.
    pub fn invalidate(&self, raw: &str) {
        if let Ok(identifier) = Identifier::parse(raw) {
            self.cache
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&identifier.cache_key());
        }
    }

    /// Drop every cached identifier that maps to `id` (e.g. after leaving a chat).
    pub fn invalidate_entity(&self, id: EntityId) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, e| e.handle.id() != id);
    }

    pub fn len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityKind;
    use crate::gateway::testing::FakeConnection;
    use crate::ports::{RemoteEntity, RemoteError, RpcError};

    fn resolver() -> Resolver {
        Resolver::new(Duration::from_secs(300), 16)
    }

    #[test]
    fn dispatch_rules() {
        assert_eq!(Identifier::parse("12345").unwrap(), Identifier::Id(12345));
        assert_eq!(
            Identifier::parse("-1001234567890").unwrap(),
            Identifier::Id(-1001234567890)
        );
        assert_eq!(
            Identifier::parse("@NewsBot").unwrap(),
            Identifier::Username("NewsBot".into())
        );
        assert_eq!(
            Identifier::parse("newsbot").unwrap(),
            Identifier::Username("newsbot".into())
        );
        assert_eq!(
            Identifier::parse("+1 555-123-4567").unwrap(),
            Identifier::Phone("+15551234567".into())
        );
        assert_eq!(
            Identifier::parse("https://t.me/+AbCdEf12_-xy").unwrap(),
            Identifier::Invite("AbCdEf12_-xy".into())
        );
        assert_eq!(
            Identifier::parse("t.me/joinchat/AAAAAEkk2WdoDrB4").unwrap(),
            Identifier::Invite("AAAAAEkk2WdoDrB4".into())
        );
        assert_eq!(
            Identifier::parse("https://t.me/durov/42").unwrap(),
            Identifier::Username("durov".into())
        );
        assert_eq!(
            Identifier::parse("1a2B-cD3e").unwrap(),
            Identifier::Invite("1a2B-cD3e".into())
        );
    }

    #[test]
    fn malformed_identifiers_are_invalid() {
        for raw in ["", "   ", "@a", "@bad name", "+12", "hello world", "99999999999999999999"] {
            let f = Identifier::parse(raw).unwrap_err();
            assert_eq!(f.kind, ErrorKind::InvalidArgument, "{raw:?}");
        }
    }

    #[test]
    fn usernames_share_a_case_insensitive_key() {
        let a = Identifier::parse("@NewsBot").unwrap();
        let b = Identifier::parse("newsbot").unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[tokio::test]
    async fn second_resolution_within_ttl_is_served_from_cache() {
        let conn = FakeConnection::new().with_entity("newsbot", 77, EntityKind::User, "News");
        let backoff = BackoffController::new();
        let r = resolver();

        let first = r
            .resolve(&conn, &backoff, CallMode::Interactive, "@newsbot")
            .await
            .unwrap();
        let second = r
            .resolve(&conn, &backoff, CallMode::Interactive, "@NewsBot")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(conn.lookups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_looked_up_again() {
        let conn = FakeConnection::new().with_entity("42", 42, EntityKind::Group, "Team");
        let backoff = BackoffController::new();
        let r = Resolver::new(Duration::from_secs(5), 16);

        r.resolve(&conn, &backoff, CallMode::Interactive, "42").await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        r.resolve(&conn, &backoff, CallMode::Interactive, "42").await.unwrap();

        assert_eq!(conn.lookups(), 2);
    }

    #[tokio::test]
    async fn invalid_identifier_makes_no_remote_call() {
        let conn = FakeConnection::new();
        let backoff = BackoffController::new();
        let f = resolver()
            .resolve(&conn, &backoff, CallMode::Interactive, "not valid!")
            .await
            .unwrap_err();
        assert_eq!(f.kind, ErrorKind::InvalidArgument);
        assert_eq!(conn.lookups(), 0);
    }

    #[tokio::test]
    async fn empty_lookup_is_not_found() {
        let conn = FakeConnection::new();
        let backoff = BackoffController::new();
        let f = resolver()
            .resolve(&conn, &backoff, CallMode::Interactive, "@ghost_user")
            .await
            .unwrap_err();
        assert_eq!(f.kind, ErrorKind::NotFound);
        assert_eq!(conn.lookups(), 1);
    }

    #[tokio::test]
    async fn several_candidates_are_ambiguous() {
        let conn = FakeConnection::new().with_lookup(
            "+15551234567",
            Ok(vec![
                RemoteEntity { id: 1, kind: EntityKind::User, title: None },
                RemoteEntity { id: 2, kind: EntityKind::User, title: None },
            ]),
        );
        let backoff = BackoffController::new();
        let f = resolver()
            .resolve(&conn, &backoff, CallMode::Interactive, "+15551234567")
            .await
            .unwrap_err();
        assert_eq!(f.kind, ErrorKind::InvalidArgument);
        assert!(f.message.contains("matches 2"));
    }

    #[tokio::test]
    async fn remote_not_found_is_classified() {
        let conn = FakeConnection::new().with_lookup(
            "missing_user",
            Err(RemoteError::Rpc(RpcError::from_remote(400, "USERNAME_NOT_OCCUPIED"))),
        );
        let backoff = BackoffController::new();
        let f = resolver()
            .resolve(&conn, &backoff, CallMode::Interactive, "@missing_user")
            .await
            .unwrap_err();
        assert_eq!(f.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn invalidate_entity_drops_all_aliases() {
        let conn = FakeConnection::new()
            .with_entity("team_chat", 9, EntityKind::Group, "Team")
            .with_entity("9", 9, EntityKind::Group, "Team");
        let backoff = BackoffController::new();
        let r = resolver();

        r.resolve(&conn, &backoff, CallMode::Interactive, "@team_chat").await.unwrap();
        r.resolve(&conn, &backoff, CallMode::Interactive, "9").await.unwrap();
        assert_eq!(r.len(), 2);

        r.invalidate_entity(EntityId(9));
        assert!(r.is_empty());
    }

    #[tokio::test]
    async fn invalidate_drops_only_that_identifier() {
        let conn = FakeConnection::new()
            .with_entity("team_chat", 9, EntityKind::Group, "Team")
            .with_entity("9", 9, EntityKind::Group, "Team");
        let backoff = BackoffController::new();
        let r = resolver();

        r.resolve(&conn, &backoff, CallMode::Interactive, "@team_chat").await.unwrap();
        r.resolve(&conn, &backoff, CallMode::Interactive, "9").await.unwrap();

        r.invalidate("@Team_Chat");
        assert_eq!(r.len(), 1);
        r.resolve(&conn, &backoff, CallMode::Interactive, "9").await.unwrap();
        assert_eq!(conn.lookups(), 2);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let r = Resolver::new(Duration::from_secs(300), 2);
        let t0 = Instant::now();
        let h = |id| EntityHandle::new(EntityId(id), EntityKind::User, None);
        r.store_at("id:1".into(), h(1), t0);
        r.store_at("id:2".into(), h(2), t0 + Duration::from_secs(1));
        r.store_at("id:3".into(), h(3), t0 + Duration::from_secs(2));

        assert_eq!(r.len(), 2);
        assert!(r.cached_at("id:1", t0 + Duration::from_secs(3)).is_none());
        assert!(r.cached_at("id:3", t0 + Duration::from_secs(3)).is_some());
    }
}
