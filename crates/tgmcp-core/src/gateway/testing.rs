//! Scripted in-memory connection shared by the gateway unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    domain::EntityKind,
    ports::{Listing, RemoteConnection, RemoteEntity, RemoteError, Window},
};

use super::Identifier;

#[derive(Default)]
pub(crate) struct FakeConnection {
    entities: HashMap<String, Result<Vec<RemoteEntity>, RemoteError>>,
    responses: Mutex<HashMap<String, VecDeque<Result<Value, RemoteError>>>>,
    listing: Vec<Value>,
    cursor: bool,
    lookups: Mutex<Vec<String>>,
    calls: Mutex<Vec<(String, Value)>>,
    fetches: Mutex<Vec<Window>>,
}

fn lookup_key(identifier: &Identifier) -> String {
    match identifier {
        Identifier::Id(id) => id.to_string(),
        Identifier::Username(u) => u.to_lowercase(),
        Identifier::Phone(p) => p.clone(),
        Identifier::Invite(h) => h.clone(),
    }
}

impl FakeConnection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_entity(self, key: &str, id: i64, kind: EntityKind, title: &str) -> Self {
        self.with_lookup(
            key,
            Ok(vec![RemoteEntity {
                id,
                kind,
                title: Some(title.to_string()),
            }]),
        )
    }

    pub(crate) fn with_lookup(
        mut self,
        key: &str,
        result: Result<Vec<RemoteEntity>, RemoteError>,
    ) -> Self {
        self.entities.insert(key.to_lowercase(), result);
        self
    }

    /// Queue one response for `method`; queued responses are consumed in order.
    pub(crate) fn respond(self, method: &str, result: Result<Value, RemoteError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub(crate) fn with_listing(mut self, items: Vec<Value>, cursor: bool) -> Self {
        self.listing = items;
        self.cursor = cursor;
        self
    }

    pub(crate) fn lookups(&self) -> usize {
        self.lookups.lock().unwrap().len()
    }

    pub(crate) fn calls_to(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub(crate) fn params_of(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len() + self.fetches.lock().unwrap().len()
    }

    pub(crate) fn fetches(&self) -> Vec<Window> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteConnection for FakeConnection {
    async fn lookup(&self, identifier: &Identifier) -> Result<Vec<RemoteEntity>, RemoteError> {
        let key = lookup_key(identifier);
        self.lookups.lock().unwrap().push(key.clone());
        self.entities
            .get(&key.to_lowercase())
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn invoke(&self, method: &str, params: Value) -> Result<Value, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        self.responses
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(RemoteError::Unavailable(format!("{method} not scripted"))))
    }

    fn supports_cursor(&self, _listing: &Listing) -> bool {
        self.cursor
    }

    async fn fetch_listing(
        &self,
        _listing: &Listing,
        window: Window,
    ) -> Result<Vec<Value>, RemoteError> {
        self.fetches.lock().unwrap().push(window);
        let offset = if self.cursor { window.offset } else { 0 };
        Ok(self
            .listing
            .iter()
            .skip(offset)
            .take(window.limit)
            .cloned()
            .collect())
    }
}
