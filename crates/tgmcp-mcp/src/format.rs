//! Rendering of bridge objects into the compact JSON tools return.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Map, Value};

use tgmcp_core::{domain::EntityHandle, gateway::Page};

/// Unix seconds → RFC 3339 (UTC). Non-numeric input is passed through.
pub fn format_date(v: &Value) -> Value {
    match v.as_i64().and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)) {
        Some(dt) => Value::String(dt.to_rfc3339()),
        None => v.clone(),
    }
}

/// `YYYY-MM-DD` → unix seconds at 00:00 UTC.
pub fn parse_day(raw: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
}

fn copy(src: &Value, dst: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(v) = src.get(*key) {
            if !v.is_null() {
                dst.insert((*key).to_string(), v.clone());
            }
        }
    }
}

/// Users, groups and channels share one shape: id, display name, type.
pub fn format_entity(v: &Value) -> Value {
    let name = match v.get("title").and_then(Value::as_str) {
        Some(title) => title.to_string(),
        None => {
            let first = v.get("first_name").and_then(Value::as_str).unwrap_or("");
            let last = v.get("last_name").and_then(Value::as_str).unwrap_or("");
            format!("{first} {last}").trim().to_string()
        }
    };

    let mut out = Map::new();
    copy(v, &mut out, &["id"]);
    out.insert("name".into(), Value::String(name));
    out.insert(
        "type".into(),
        v.get("type").cloned().unwrap_or_else(|| json!("user")),
    );
    copy(v, &mut out, &["username", "phone", "unread_count"]);
    Value::Object(out)
}

pub fn format_handle(h: &EntityHandle) -> Value {
    json!({ "id": h.id(), "name": h.display_name(), "type": h.kind() })
}

pub fn format_message(v: &Value) -> Value {
    let mut out = Map::new();
    copy(v, &mut out, &["id"]);
    if let Some(date) = v.get("date") {
        out.insert("date".into(), format_date(date));
    }
    let text = v
        .get("message")
        .or_else(|| v.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("");
    out.insert("text".into(), Value::String(text.to_string()));
    copy(v, &mut out, &["from_id", "reply_to_msg_id", "pinned"]);
    if let Some(media) = v.get("media").filter(|m| !m.is_null()) {
        out.insert(
            "media_type".into(),
            media.get("type").cloned().unwrap_or_else(|| json!("unknown")),
        );
    }
    Value::Object(out)
}

/// Messages may arrive bare or wrapped in `{"messages": [...]}`.
pub fn format_messages(v: &Value) -> Value {
    let list = v.get("messages").unwrap_or(v);
    match list.as_array() {
        Some(items) => Value::Array(items.iter().map(format_message).collect()),
        None => list.clone(),
    }
}

pub fn format_page(page: Page, item: fn(&Value) -> Value) -> Value {
    json!({
        "items": page.items.iter().map(item).collect::<Vec<_>>(),
        "page": page.index,
        "page_size": page.size,
        "has_more": page.has_more,
    })
}

pub fn pretty(v: &Value) -> String {
    serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
}
