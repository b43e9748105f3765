use serde_json::{json, Value};

use tgmcp_core::{
    domain::{EntityKind, OperationClass, OperationRequest},
    gateway::{CallMode, ErrorKind, Failure, Gateway, Op},
    ports::Listing,
};

use super::{unknown, Args, Param, ToolDef, ToolResult, PAGE_PARAMS};
use crate::format::{
    format_date, format_entity, format_handle, format_message, format_page, pretty,
};

const CLASS: OperationClass = OperationClass::Contacts;
/// Dialogs scanned when looking for a direct chat.
const DIALOG_SCAN: i64 = 200;
const LAST_INTERACTION_LIMIT: i64 = 5;

pub(crate) fn definitions() -> Vec<ToolDef> {
    let user = ("user_id", Param::Id, true, "User id, @username or phone number");
    let [page, page_size] = PAGE_PARAMS;
    vec![
        ToolDef::new("list_contacts", CLASS, "List your contacts.", &[page, page_size]),
        ToolDef::new(
            "search_contacts",
            CLASS,
            "Search contacts and public users by name or username.",
            &[
                ("query", Param::Str, true, "Name or username fragment"),
                ("limit", Param::Int, false, "Maximum results (default 20)"),
            ],
        ),
        ToolDef::new(
            "add_contact",
            CLASS,
            "Add a contact by phone number.",
            &[
                ("phone", Param::Str, true, "Phone number in international format"),
                ("first_name", Param::Str, true, "First name"),
                ("last_name", Param::Str, false, "Last name"),
            ],
        ),
        ToolDef::new("delete_contact", CLASS, "Remove a user from your contacts.", &[user]),
        ToolDef::new("block_user", CLASS, "Block a user.", &[user]),
        ToolDef::new("unblock_user", CLASS, "Unblock a user.", &[user]),
        ToolDef::new("get_blocked_users", CLASS, "List blocked users.", &[page, page_size]),
        ToolDef::new(
            "resolve_username",
            CLASS,
            "Look up a user or chat by username.",
            &[("username", Param::Str, true, "Username, with or without @")],
        ),
        ToolDef::new("get_contact_ids", CLASS, "List the ids of all your contacts.", &[]),
        ToolDef::new(
            "import_contacts",
            CLASS,
            "Import contacts. Each entry needs phone and first_name; last_name is optional.",
            &[("contacts", Param::Objects, true, "Contacts to import")],
        ),
        ToolDef::new("export_contacts", CLASS, "Export all contacts.", &[]),
        ToolDef::new(
            "get_direct_chat_by_contact",
            CLASS,
            "Find the direct chat with a contact by name, username or phone.",
            &[("contact_query", Param::Str, true, "Name, username or phone fragment")],
        ),
        ToolDef::new(
            "get_contact_chats",
            CLASS,
            "List the direct chat and the groups you share with a contact.",
            &[("contact_id", Param::Id, true, "Contact id or @username")],
        ),
        ToolDef::new(
            "get_last_interaction",
            CLASS,
            "Get the most recent messages exchanged with a contact.",
            &[("contact_id", Param::Id, true, "Contact id or @username")],
        ),
        ToolDef::new(
            "search_public_chats",
            CLASS,
            "Search public users, groups, channels and bots by name or username.",
            &[
                ("query", Param::Str, true, "Search text"),
                ("limit", Param::Int, false, "Maximum results (default 20)"),
            ],
        ),
        ToolDef::new(
            "get_bot_info",
            CLASS,
            "Get information about a bot.",
            &[("bot_username", Param::Id, true, "Bot @username or id")],
        ),
        ToolDef::new("get_me", CLASS, "Get your own account information.", &[]),
        ToolDef::new("get_user_status", CLASS, "Get a user's online status.", &[user]),
    ]
}

pub(crate) async fn call(gw: &Gateway, name: &str, args: &Args<'_>) -> ToolResult {
    let mode = args.mode(gw);
    match name {
        "list_contacts" | "get_blocked_users" => {
            let (index, size) = args.page()?;
            let (operation, listing) = if name == "list_contacts" {
                ("list_contacts", Listing::Contacts)
            } else {
                ("get_blocked_users", Listing::Blocked)
            };
            let req = OperationRequest::new(operation);
            let page = gw
                .list(&req, CLASS, index, size, mode, move |_| Ok(listing))
                .await?;
            Ok(pretty(&format_page(page, format_entity)))
        }
        "search_contacts" => {
            let req = OperationRequest::new("search_contacts").payload(json!({
                "query": args.text("query")?,
                "limit": args.limit("limit", 20, 100)?,
            }));
            let out = gw.execute(&req, Op::SearchContacts, mode).await?;
            let users = entities(out.get("users").unwrap_or(&out));
            if users.as_array().is_some_and(Vec::is_empty) {
                return Ok("No contacts found.".to_string());
            }
            Ok(pretty(&users))
        }
        "add_contact" => {
            let req = OperationRequest::new("add_contact").payload(json!({
                "phone": args.text("phone")?,
                "first_name": args.text("first_name")?,
                "last_name": args.opt_text("last_name").unwrap_or_default(),
            }));
            let user = gw.execute(&req, Op::AddContact, mode).await?;
            Ok(format!("Contact added: {}", pretty(&format_entity(&user))))
        }
        "delete_contact" | "block_user" | "unblock_user" => {
            let (op, done) = match name {
                "delete_contact" => (Op::DeleteContact, "removed from contacts"),
                "block_user" => (Op::BlockUser, "blocked"),
                _ => (Op::UnblockUser, "unblocked"),
            };
            let user = args.id("user_id")?;
            let req = OperationRequest::new(op.name()).target(user.clone());
            gw.execute(&req, op, mode).await?;
            Ok(format!("User {user} {done}."))
        }
        "resolve_username" => {
            let req = OperationRequest::new("resolve_username")
                .payload(json!({ "username": args.text("username")? }));
            let out = gw.execute(&req, Op::ResolveUsername, mode).await?;
            let entity = out
                .get("users")
                .or_else(|| out.get("chats"))
                .and_then(Value::as_array)
                .and_then(|list| list.first())
                .unwrap_or(&out);
            Ok(pretty(&format_entity(entity)))
        }
        "get_contact_ids" => {
            let req = OperationRequest::new("get_contact_ids");
            let out = gw.execute(&req, Op::GetContactIds, mode).await?;
            let ids: Vec<String> = out
                .as_array()
                .map(|ids| ids.iter().map(Value::to_string).collect())
                .unwrap_or_default();
            if ids.is_empty() {
                return Ok("No contact IDs found.".to_string());
            }
            Ok(format!("Contact IDs: {}", ids.join(", ")))
        }
        "import_contacts" => {
            let req = OperationRequest::new("import_contacts")
                .payload(json!({ "contacts": args.objects("contacts")? }));
            let out = gw.execute(&req, Op::ImportContacts, mode).await?;
            let count = out.get("imported").and_then(Value::as_u64).unwrap_or(0);
            Ok(format!("Imported {count} contacts."))
        }
        "export_contacts" => {
            let req = OperationRequest::new("export_contacts");
            let users = gw.execute(&req, Op::ExportContacts, mode).await?;
            Ok(pretty(&entities(&users)))
        }
        "get_direct_chat_by_contact" => {
            let query = args.text("contact_query")?;
            let req = OperationRequest::new("get_direct_chat_by_contact");
            let contacts = gw.execute(&req, Op::ExportContacts, mode).await?;
            let found: Vec<&Value> = contacts
                .as_array()
                .map(|users| users.iter().filter(|u| contact_matches(u, &query)).collect())
                .unwrap_or_default();
            if found.is_empty() {
                return Ok(format!("No contacts found matching '{query}'."));
            }

            let dialogs = recent_dialogs(gw, "get_direct_chat_by_contact", mode).await?;
            let chats: Vec<Value> = found
                .iter()
                .filter_map(|contact| {
                    let id = contact.get("id").and_then(Value::as_i64)?;
                    let dialog = direct_dialog(&dialogs, id)?;
                    let entity = format_entity(contact);
                    let mut chat = json!({ "chat_id": id, "contact": entity["name"] });
                    if let Some(username) = entity.get("username") {
                        chat["username"] = username.clone();
                    }
                    if let Some(unread) = dialog.get("unread_count").filter(|n| n.as_i64() > Some(0)) {
                        chat["unread_count"] = unread.clone();
                    }
                    Some(chat)
                })
                .collect();
            if chats.is_empty() {
                let names: Vec<String> = found
                    .iter()
                    .filter_map(|c| format_entity(c)["name"].as_str().map(str::to_string))
                    .collect();
                return Ok(format!(
                    "Found contacts: {}, but no direct chats were found with them.",
                    names.join(", ")
                ));
            }
            Ok(pretty(&Value::Array(chats)))
        }
        "get_contact_chats" => {
            let raw = args.id("contact_id")?;
            let req = OperationRequest::new("get_contact_chats").target(raw.clone());
            let contact = gw.resolve(&raw, mode).await?;
            if contact.kind() != EntityKind::User {
                return Err(Failure::invalid(format!("{raw} is not a user.")));
            }

            let dialogs = recent_dialogs(gw, "get_contact_chats", mode).await?;
            let direct = direct_dialog(&dialogs, contact.id().0).map(|d| {
                json!({
                    "chat_id": contact.id(),
                    "type": "private",
                    "unread_count": d.get("unread_count").cloned().unwrap_or(json!(0)),
                })
            });
            let mut out = json!({ "contact": format_handle(&contact), "direct_chat": direct });

            let common = gw
                .execute_on(&req, Op::GetCommonChats, std::slice::from_ref(&contact), mode)
                .await;
            match common {
                Ok(chats) => out["common_chats"] = entities(&chats),
                Err(f) if f.kind == ErrorKind::RateLimited => return Err(f),
                Err(_) => out["common_chats_error"] = json!("Could not retrieve common groups."),
            }
            Ok(pretty(&out))
        }
        "get_last_interaction" => {
            let req = OperationRequest::new("get_last_interaction").target(args.id("contact_id")?);
            let mut contact = None;
            let page = gw
                .list(&req, CLASS, 1, LAST_INTERACTION_LIMIT, mode, |targets| {
                    let h = targets
                        .first()
                        .cloned()
                        .ok_or_else(|| Failure::invalid("'contact_id' is required."))?;
                    if h.kind() != EntityKind::User {
                        return Err(Failure::invalid(format!(
                            "{} is not a user.",
                            h.display_name()
                        )));
                    }
                    contact = Some(h.clone());
                    Ok(Listing::Messages { chat: h })
                })
                .await?;
            let name = contact.map(|h| h.display_name()).unwrap_or_default();
            if page.items.is_empty() {
                return Ok(format!("No messages found with {name}."));
            }
            let messages: Vec<Value> = page
                .items
                .iter()
                .map(|m| {
                    let mut out = format_message(m);
                    let outgoing = m.get("out").and_then(Value::as_bool).unwrap_or(false);
                    out["from"] = if outgoing { json!("You") } else { json!(name) };
                    out
                })
                .collect();
            Ok(pretty(&json!({ "contact": name, "messages": messages })))
        }
        "search_public_chats" => {
            let req = OperationRequest::new("search_public_chats").payload(json!({
                "query": args.text("query")?,
                "limit": args.limit("limit", 20, 100)?,
            }));
            let out = gw.execute(&req, Op::SearchContacts, mode).await?;
            let found: Vec<Value> = ["chats", "users"]
                .iter()
                .filter_map(|key| out.get(*key).and_then(Value::as_array))
                .flatten()
                .map(format_entity)
                .collect();
            if found.is_empty() {
                return Ok("No public chats found.".to_string());
            }
            Ok(pretty(&Value::Array(found)))
        }
        "get_bot_info" => {
            let raw = args.id("bot_username")?;
            let req = OperationRequest::new("get_bot_info").target(raw.clone());
            let bot = gw.resolve(&raw, mode).await?;
            if bot.kind() != EntityKind::User {
                return Err(Failure::invalid(format!("{raw} is not a bot.")));
            }
            let full = gw
                .execute_on(&req, Op::GetChat, std::slice::from_ref(&bot), mode)
                .await?;
            let mut info = format_handle(&bot);
            info["about"] = full.get("about").cloned().unwrap_or(Value::Null);
            if let Some(details) = full.get("bot_info").filter(|b| !b.is_null()) {
                info["bot_info"] = details.clone();
            }
            Ok(pretty(&json!({ "bot_info": info })))
        }
        "get_me" => {
            let req = OperationRequest::new("get_me");
            let me = gw.execute(&req, Op::GetMe, mode).await?;
            Ok(pretty(&format_entity(&me)))
        }
        "get_user_status" => {
            let req = OperationRequest::new("get_user_status").target(args.id("user_id")?);
            let user = gw.execute(&req, Op::GetUserStatus, mode).await?;
            let status = user.get("status").cloned().unwrap_or(Value::Null);
            let mut out = json!({
                "user": format_entity(&user),
                "status": status.get("type").cloned().unwrap_or_else(|| json!("unknown")),
            });
            if let Some(seen) = status.get("was_online") {
                out["last_seen"] = format_date(seen);
            }
            Ok(pretty(&out))
        }
        _ => unknown(name),
    }
}

async fn recent_dialogs(
    gw: &Gateway,
    operation: &'static str,
    mode: CallMode,
) -> Result<Vec<Value>, Failure> {
    let req = OperationRequest::new(operation);
    let page = gw
        .list(&req, OperationClass::Chats, 1, DIALOG_SCAN, mode, |_| {
            Ok(Listing::Dialogs)
        })
        .await?;
    Ok(page.items)
}

/// The private dialog with user `id`. Dialogs without a type are users.
fn direct_dialog(dialogs: &[Value], id: i64) -> Option<&Value> {
    dialogs.iter().find(|d| {
        d.get("id").and_then(Value::as_i64) == Some(id)
            && d.get("type")
                .and_then(Value::as_str)
                .map_or(true, |t| EntityKind::parse(t) == Some(EntityKind::User))
    })
}

fn contact_matches(user: &Value, query: &str) -> bool {
    let needle = query.to_lowercase();
    let field = |key: &str| user.get(key).and_then(Value::as_str).unwrap_or("");
    let name = format!("{} {}", field("first_name"), field("last_name"));
    name.to_lowercase().contains(&needle)
        || (!field("username").is_empty() && field("username").to_lowercase().contains(&needle))
        || (!field("phone").is_empty() && field("phone").contains(query))
}

fn entities(v: &Value) -> Value {
    match v.as_array() {
        Some(items) => Value::Array(items.iter().map(format_entity).collect()),
        None => v.clone(),
    }
}
