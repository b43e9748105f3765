//! `RemoteConnection` over an HTTP/JSON bridge that owns the Telegram session.
//!
//! Every call is `POST {bridge}/call/{method}` with the session credential and
//! the method params. The bridge answers with an envelope:
//! `{"ok": true, "result": ..}` or
//! `{"ok": false, "error_code": 420, "error": "FLOOD_WAIT_30", "description": "..", "parameters": {"retry_after": 30}}`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tgmcp_core::{
    config::{Config, SessionCredential},
    domain::EntityKind,
    errors::Error,
    gateway::Identifier,
    ports::{Listing, RemoteConnection, RemoteEntity, RemoteError, RpcError, Window},
    Result,
};

#[derive(Clone, Debug)]
pub struct HttpConnection {
    base_url: String,
    session: SessionCredential,
    cursor_listings: Vec<String>,
    http: reqwest::Client,
}

impl HttpConnection {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_options(
            &config.bridge_url,
            config.session.clone(),
            config.request_timeout,
            config.gateway.cursor_listings.clone(),
        )
    }

    pub fn with_options(
        base_url: &str,
        session: SessionCredential,
        timeout: Duration,
        cursor_listings: Vec<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            cursor_listings,
            http,
        })
    }

    fn session_json(&self) -> Value {
        match &self.session {
            SessionCredential::String(s) => json!({ "string": s }),
            SessionCredential::Named(n) => json!({ "name": n }),
        }
    }

    async fn call(&self, method: &str, params: Value) -> std::result::Result<Value, RemoteError> {
        let url = format!("{}/call/{method}", self.base_url);
        tracing::debug!(method, "bridge call");

        let resp = self
            .http
            .post(&url)
            .json(&json!({ "session": self.session_json(), "params": params }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport_error)?;
        parse_envelope(status, &body)
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Connection(e.to_string())
    }
}

/// Decode the bridge envelope into a result value or a raw remote error.
pub fn parse_envelope(status: u16, body: &str) -> std::result::Result<Value, RemoteError> {
    let Ok(v) = serde_json::from_str::<Value>(body) else {
        if status >= 500 {
            return Err(RemoteError::Rpc(
                RpcError::from_remote(i32::from(status), "").with_text(snippet(body)),
            ));
        }
        return Err(RemoteError::Malformed(format!(
            "bridge returned non-JSON (status {status}): {}",
            snippet(body)
        )));
    };

    if v.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(v.get("result").cloned().unwrap_or(Value::Null));
    }

    let code = v
        .get("error_code")
        .and_then(Value::as_i64)
        .and_then(|c| i32::try_from(c).ok())
        .unwrap_or(i32::from(status));
    let name = v.get("error").and_then(Value::as_str).unwrap_or_default();
    let text = v
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let retry_after = v
        .pointer("/parameters/retry_after")
        .and_then(Value::as_u64)
        .and_then(|s| u32::try_from(s).ok());

    Err(RemoteError::Rpc(
        RpcError::from_remote(code, name)
            .with_text(text)
            .with_value(retry_after),
    ))
}

/// Decode lookup candidates: `[{"id": 1, "type": "user", "title": ".."}]`.
pub fn parse_entities(result: Value) -> std::result::Result<Vec<RemoteEntity>, RemoteError> {
    let Value::Array(items) = result else {
        return Err(RemoteError::Malformed("lookup result is not a list".into()));
    };

    items
        .into_iter()
        .map(|item| {
            let id = item
                .get("id")
                .and_then(Value::as_i64)
                .ok_or_else(|| RemoteError::Malformed("entity without id".into()))?;
            let kind = item
                .get("type")
                .and_then(Value::as_str)
                .and_then(EntityKind::parse)
                .unwrap_or(EntityKind::Unknown);
            let title = item
                .get("title")
                .or_else(|| item.get("username"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(RemoteEntity { id, kind, title })
        })
        .collect()
}

fn lookup_params(identifier: &Identifier) -> Value {
    match identifier {
        Identifier::Id(id) => json!({ "kind": "id", "value": id }),
        Identifier::Username(u) => json!({ "kind": "username", "value": u }),
        Identifier::Phone(p) => json!({ "kind": "phone", "value": p }),
        Identifier::Invite(h) => json!({ "kind": "invite", "value": h }),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

#[async_trait]
impl RemoteConnection for HttpConnection {
    async fn lookup(
        &self,
        identifier: &Identifier,
    ) -> std::result::Result<Vec<RemoteEntity>, RemoteError> {
        let result = self.call("resolve", lookup_params(identifier)).await?;
        parse_entities(result)
    }

    async fn invoke(&self, method: &str, params: Value) -> std::result::Result<Value, RemoteError> {
        self.call(method, params).await
    }

    fn supports_cursor(&self, listing: &Listing) -> bool {
        self.cursor_listings.iter().any(|n| n == listing.name())
    }

    async fn fetch_listing(
        &self,
        listing: &Listing,
        window: Window,
    ) -> std::result::Result<Vec<Value>, RemoteError> {
        let mut params = listing.params();
        if let Some(map) = params.as_object_mut() {
            map.insert("offset".into(), json!(window.offset));
            map.insert("limit".into(), json!(window.limit));
        }
        match self.call(&format!("list.{}", listing.name()), params).await? {
            Value::Array(items) => Ok(items),
            other => Err(RemoteError::Malformed(format!(
                "listing {} returned {}",
                listing.name(),
                type_name(&other)
            ))),
        }
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
