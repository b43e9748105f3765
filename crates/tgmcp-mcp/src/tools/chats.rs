use serde_json::{json, Value};

use tgmcp_core::{
    domain::{EntityHandle, EntityKind, OperationClass, OperationRequest},
    gateway::{Failure, Gateway, Op},
    ports::Listing,
};

use super::{unknown, Args, Param, ToolDef, ToolResult, PAGE_PARAMS};
use crate::format::{
    format_entity, format_handle, format_message, format_messages, format_page, parse_day, pretty,
};

const CLASS: OperationClass = OperationClass::Chats;
const DAY_SECS: i64 = 86_400;

pub(crate) fn definitions() -> Vec<ToolDef> {
    let chat = ("chat_id", Param::Id, true, "Chat id, @username or phone number");
    let [page, page_size] = PAGE_PARAMS;
    vec![
        ToolDef::new("get_chats", CLASS, "Get a page of your chats.", &[page, page_size]),
        ToolDef::new(
            "list_chats",
            CLASS,
            "List chats, optionally filtered by type (user, group or channel).",
            &[
                ("chat_type", Param::Str, false, "user, group or channel"),
                ("limit", Param::Int, false, "Maximum chats to scan (default 20)"),
            ],
        ),
        ToolDef::new("get_chat", CLASS, "Get detailed information about a chat.", &[chat]),
        ToolDef::new(
            "get_messages",
            CLASS,
            "Get a page of messages from a chat, newest first.",
            &[chat, page, page_size],
        ),
        ToolDef::new(
            "list_messages",
            CLASS,
            "List messages in a chat with optional text and date filters.",
            &[
                chat,
                ("limit", Param::Int, false, "Maximum messages (default 20)"),
                ("search_query", Param::Str, false, "Only messages containing this text"),
                ("from_date", Param::Str, false, "YYYY-MM-DD, inclusive"),
                ("to_date", Param::Str, false, "YYYY-MM-DD, inclusive"),
            ],
        ),
        ToolDef::new(
            "get_history",
            CLASS,
            "Get recent chat history, newest first.",
            &[chat, ("limit", Param::Int, false, "Maximum messages (default 100)")],
        ),
        ToolDef::new(
            "search_messages",
            CLASS,
            "Search for messages in a chat by text.",
            &[chat, ("query", Param::Str, true, "Text to search for"), page, page_size],
        ),
        ToolDef::new(
            "get_message_context",
            CLASS,
            "Get the messages around a specific message.",
            &[
                chat,
                ("message_id", Param::Int, true, "Message id"),
                ("context_size", Param::Int, false, "Messages on each side (default 3)"),
            ],
        ),
        ToolDef::new("get_pinned_messages", CLASS, "Get all pinned messages in a chat.", &[chat]),
        ToolDef::new("mute_chat", CLASS, "Mute notifications for a chat.", &[chat]),
        ToolDef::new("unmute_chat", CLASS, "Unmute notifications for a chat.", &[chat]),
        ToolDef::new("archive_chat", CLASS, "Move a chat to the archive.", &[chat]),
        ToolDef::new("unarchive_chat", CLASS, "Move a chat out of the archive.", &[chat]),
        ToolDef::new("leave_chat", CLASS, "Leave a group or channel.", &[chat]),
    ]
}

pub(crate) async fn call(gw: &Gateway, name: &str, args: &Args<'_>) -> ToolResult {
    let mode = args.mode(gw);
    match name {
        "get_chats" => {
            let (index, size) = args.page()?;
            let req = OperationRequest::new("get_chats");
            let page = gw
                .list(&req, CLASS, index, size, mode, |_| {
                    Ok(Listing::Dialogs)
                })
                .await?;
            Ok(pretty(&format_page(page, format_entity)))
        }
        "list_chats" => {
            let kind = match args.opt_text("chat_type") {
                None => None,
                Some(raw) => match EntityKind::parse(&raw) {
                    Some(k) => Some(k),
                    None => {
                        return Err(Failure::invalid(
                            "chat_type must be one of: user, group, channel.",
                        ))
                    }
                },
            };
            let limit = args.limit("limit", 20, 500)?;
            let req = OperationRequest::new("list_chats");
            let page = gw
                .list(&req, CLASS, 1, limit, mode, |_| {
                    Ok(Listing::Dialogs)
                })
                .await?;
            let chats: Vec<Value> = page
                .items
                .iter()
                .map(format_entity)
                .filter(|c| kind.is_none() || listed_kind(c) == kind)
                .collect();
            if chats.is_empty() {
                return Ok("No chats found.".to_string());
            }
            Ok(pretty(&Value::Array(chats)))
        }
        "get_chat" => {
            let chat = args.id("chat_id")?;
            let req = OperationRequest::new("get_chat").target(chat.clone());
            let handle = gw.resolve(&chat, mode).await?;
            let full = gw
                .execute_on(&req, Op::GetChat, std::slice::from_ref(&handle), mode)
                .await?;
            let mut out = format_handle(&handle);
            out["details"] = full;
            Ok(pretty(&out))
        }
        "get_messages" => {
            let (index, size) = args.page()?;
            let req = OperationRequest::new("get_messages").target(args.id("chat_id")?);
            let page = gw
                .list(&req, CLASS, index, size, mode, messages_of)
                .await?;
            Ok(pretty(&format_page(page, format_message)))
        }
        "get_history" => {
            let limit = args.limit("limit", 100, 1000)?;
            let req = OperationRequest::new("get_history").target(args.id("chat_id")?);
            let page = gw.list(&req, CLASS, 1, limit, mode, messages_of).await?;
            if page.items.is_empty() {
                return Ok("No messages found.".to_string());
            }
            let lines: Vec<String> = page.items.iter().map(history_line).collect();
            Ok(lines.join("\n"))
        }
        "list_messages" => {
            let limit = args.limit("limit", 20, 500)?;
            let min_date = day_arg(args, "from_date")?;
            let max_date = day_arg(args, "to_date")?.map(|d| d + DAY_SECS - 1);
            if let (Some(from), Some(to)) = (min_date, max_date) {
                if from > to {
                    return Err(Failure::invalid("from_date must not be after to_date."));
                }
            }
            let req = OperationRequest::new("list_messages")
                .target(args.id("chat_id")?)
                .payload(json!({
                    "limit": limit,
                    "search_query": args.opt_text("search_query").unwrap_or_default(),
                    "min_date": min_date,
                    "max_date": max_date,
                }));
            let out = gw.execute(&req, Op::ListMessages, mode).await?;
            let messages = format_messages(&out);
            if messages.as_array().is_some_and(Vec::is_empty) {
                return Ok("No messages found matching the criteria.".to_string());
            }
            Ok(pretty(&messages))
        }
        "search_messages" => {
            let query = args.text("query")?;
            let (index, size) = args.page()?;
            let req = OperationRequest::new("search_messages").target(args.id("chat_id")?);
            let page = gw
                .list(&req, CLASS, index, size, mode, |targets| {
                    let chat = targets
                        .first()
                        .cloned()
                        .ok_or_else(|| Failure::invalid("'chat_id' is required."))?;
                    Ok(Listing::Search { chat, query })
                })
                .await?;
            Ok(pretty(&format_page(page, format_message)))
        }
        "get_message_context" => {
            let req = OperationRequest::new("get_message_context")
                .target(args.id("chat_id")?)
                .payload(json!({
                    "message_id": args.int("message_id")?,
                    "context_size": args.int_or("context_size", 3)?,
                }));
            let out = gw.execute(&req, Op::GetMessageContext, mode).await?;
            Ok(pretty(&format_messages(&out)))
        }
        "get_pinned_messages" => {
            let req = OperationRequest::new("get_pinned_messages").target(args.id("chat_id")?);
            let out = gw.execute(&req, Op::GetPinnedMessages, mode).await?;
            let messages = format_messages(&out);
            if messages.as_array().is_some_and(Vec::is_empty) {
                return Ok("No pinned messages found in this chat.".to_string());
            }
            Ok(pretty(&messages))
        }
        "mute_chat" | "unmute_chat" | "archive_chat" | "unarchive_chat" | "leave_chat" => {
            let (op, done) = match name {
                "mute_chat" => (Op::MuteChat, "muted"),
                "unmute_chat" => (Op::UnmuteChat, "unmuted"),
                "archive_chat" => (Op::ArchiveChat, "archived"),
                "unarchive_chat" => (Op::UnarchiveChat, "unarchived"),
                _ => (Op::LeaveChat, "left"),
            };
            let chat = args.id("chat_id")?;
            let req = OperationRequest::new(op.name()).target(chat.clone());
            gw.execute(&req, op, mode).await?;
            Ok(format!("Chat {chat} {done}."))
        }
        _ => unknown(name),
    }
}

/// Supergroups are addressed as channels but listed as groups.
fn listed_kind(chat: &Value) -> Option<EntityKind> {
    let raw = chat.get("type").and_then(Value::as_str)?;
    match raw.to_ascii_lowercase().as_str() {
        "supergroup" | "megagroup" => Some(EntityKind::Group),
        other => EntityKind::parse(other),
    }
}

fn messages_of(targets: &[EntityHandle]) -> Result<Listing, Failure> {
    let chat = targets
        .first()
        .cloned()
        .ok_or_else(|| Failure::invalid("'chat_id' is required."))?;
    Ok(Listing::Messages { chat })
}

fn history_line(msg: &Value) -> String {
    let m = format_message(msg);
    let date = m.get("date").and_then(Value::as_str).unwrap_or("-");
    let text = m.get("text").and_then(Value::as_str).unwrap_or("");
    format!("ID: {} | {date} | {text}", m["id"])
}

fn day_arg(args: &Args<'_>, key: &str) -> Result<Option<i64>, Failure> {
    match args.opt_text(key) {
        None => Ok(None),
        Some(raw) => parse_day(&raw)
            .map(Some)
            .ok_or_else(|| Failure::invalid(format!("'{key}' must be a date in YYYY-MM-DD format."))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supergroups_list_as_groups() {
        let chat = json!({ "id": -1002, "type": "megagroup" });
        assert_eq!(listed_kind(&chat), Some(EntityKind::Group));
        assert_eq!(listed_kind(&json!({ "type": "broadcast" })), Some(EntityKind::Channel));
        assert_eq!(listed_kind(&json!({ "id": 1 })), None);
    }

    #[test]
    fn history_lines_show_id_date_and_text() {
        let line = history_line(&json!({ "id": 9, "date": 0, "message": "hello" }));
        assert_eq!(line, "ID: 9 | 1970-01-01T00:00:00+00:00 | hello");
    }
}
