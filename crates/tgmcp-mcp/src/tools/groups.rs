use serde_json::{json, Value};

use tgmcp_core::{
    domain::{EntityHandle, OperationClass, OperationRequest},
    gateway::{Failure, Gateway, Identifier, Op},
    ports::{Listing, ParticipantFilter},
};

use super::{unknown, Args, Param, ToolDef, ToolResult, PAGE_PARAMS};
use crate::format::{format_date, format_entity, format_page, pretty};

const CLASS: OperationClass = OperationClass::Groups;

pub(crate) fn definitions() -> Vec<ToolDef> {
    let chat = ("chat_id", Param::Id, true, "Group or channel id or @username");
    let group = ("group_id", Param::Id, true, "Group or channel id or @username");
    let user = ("user_id", Param::Id, true, "User id or @username");
    let users = ("user_ids", Param::Ids, true, "User ids or @usernames");
    let title = ("title", Param::Str, true, "Title");
    let [page, page_size] = PAGE_PARAMS;
    vec![
        ToolDef::new("create_group", CLASS, "Create a basic group with the given users.", &[title, users]),
        ToolDef::new(
            "create_channel",
            CLASS,
            "Create a channel, or a supergroup when megagroup is true.",
            &[
                title,
                ("about", Param::Str, false, "Description"),
                ("megagroup", Param::Bool, false, "Create a supergroup instead of a broadcast channel"),
            ],
        ),
        ToolDef::new("invite_to_group", CLASS, "Invite users to a group or channel.", &[group, users]),
        ToolDef::new("edit_chat_title", CLASS, "Change the title of a group or channel.", &[chat, title]),
        ToolDef::new("get_participants", CLASS, "List members of a group or channel.", &[chat, page, page_size]),
        ToolDef::new("get_admins", CLASS, "List admins of a group or channel.", &[chat, page, page_size]),
        ToolDef::new("get_banned_users", CLASS, "List banned users of a group or channel.", &[chat, page, page_size]),
        ToolDef::new(
            "promote_admin",
            CLASS,
            "Make a user an admin.",
            &[
                group,
                user,
                ("rights", Param::Object, false, "Admin rights flags; defaults to a standard set"),
                ("rank", Param::Str, false, "Custom admin title"),
            ],
        ),
        ToolDef::new("demote_admin", CLASS, "Remove a user's admin rights.", &[group, user]),
        ToolDef::new("ban_user", CLASS, "Ban a user from a group or channel.", &[chat, user]),
        ToolDef::new("unban_user", CLASS, "Lift a user's ban in a group or channel.", &[chat, user]),
        ToolDef::new("get_invite_link", CLASS, "Get the invite link of a group or channel.", &[chat]),
        ToolDef::new("export_chat_invite", CLASS, "Export a new invite link for a group or channel.", &[chat]),
        ToolDef::new("delete_chat_photo", CLASS, "Remove the photo of a group or channel.", &[chat]),
        ToolDef::new(
            "get_recent_actions",
            CLASS,
            "Get recent admin actions in a supergroup or channel.",
            &[chat],
        ),
        ToolDef::new(
            "join_chat_by_link",
            CLASS,
            "Join a group or channel by invite link.",
            &[("link", Param::Str, true, "Invite link such as https://t.me/+AbCd")],
        ),
        ToolDef::new(
            "import_chat_invite",
            CLASS,
            "Join a group or channel by invite hash.",
            &[("hash", Param::Str, true, "Invite hash, with or without a leading +")],
        ),
    ]
}

pub(crate) async fn call(gw: &Gateway, name: &str, args: &Args<'_>) -> ToolResult {
    let mode = args.mode(gw);
    match name {
        "create_group" => {
            let title = args.text("title")?;
            let mut req = OperationRequest::new("create_group").payload(json!({ "title": title }));
            req.targets = args.ids("user_ids")?;
            let out = gw.execute(&req, Op::CreateGroup, mode).await?;
            Ok(created("Group", &title, &out))
        }
        "create_channel" => {
            let title = args.text("title")?;
            let req = OperationRequest::new("create_channel").payload(json!({
                "title": title,
                "about": args.opt_text("about").unwrap_or_default(),
                "megagroup": args.bool_or("megagroup", false),
            }));
            let out = gw.execute(&req, Op::CreateChannel, mode).await?;
            Ok(created("Channel", &title, &out))
        }
        "invite_to_group" => {
            let mut req = OperationRequest::new("invite_to_group").target(args.id("group_id")?);
            let users = args.ids("user_ids")?;
            let count = users.len();
            req.targets.extend(users);
            gw.execute(&req, Op::InviteToGroup, mode).await?;
            Ok(format!("Invited {count} user(s)."))
        }
        "edit_chat_title" => {
            let title = args.text("title")?;
            let req = OperationRequest::new("edit_chat_title")
                .target(args.id("chat_id")?)
                .payload(json!({ "title": title }));
            gw.execute(&req, Op::EditChatTitle, mode).await?;
            Ok(format!("Title changed to '{title}'."))
        }
        "get_participants" | "get_admins" | "get_banned_users" => {
            let (operation, filter) = match name {
                "get_participants" => ("get_participants", ParticipantFilter::All),
                "get_admins" => ("get_admins", ParticipantFilter::Admins),
                _ => ("get_banned_users", ParticipantFilter::Banned),
            };
            let (index, size) = args.page()?;
            let req = OperationRequest::new(operation).target(args.id("chat_id")?);
            let page = gw
                .list(&req, CLASS, index, size, mode, move |targets| {
                    Ok(Listing::Participants {
                        chat: first_target(targets)?,
                        filter,
                    })
                })
                .await?;
            Ok(pretty(&format_page(page, format_entity)))
        }
        "promote_admin" | "demote_admin" | "ban_user" | "unban_user" => {
            let (op, chat_key, done) = match name {
                "promote_admin" => (Op::PromoteAdmin, "group_id", "promoted to admin"),
                "demote_admin" => (Op::DemoteAdmin, "group_id", "demoted"),
                "ban_user" => (Op::BanUser, "chat_id", "banned"),
                _ => (Op::UnbanUser, "chat_id", "unbanned"),
            };
            let user = args.id("user_id")?;
            let payload = json!({
                "rights": args.object("rights")?,
                "rank": args.opt_text("rank"),
            });
            let req = OperationRequest::new(op.name())
                .target(args.id(chat_key)?)
                .target(user.clone())
                .payload(payload);
            gw.execute(&req, op, mode).await?;
            Ok(format!("User {user} {done}."))
        }
        "get_invite_link" | "export_chat_invite" => {
            let op = if name == "get_invite_link" {
                Op::GetInviteLink
            } else {
                Op::ExportChatInvite
            };
            let req = OperationRequest::new(op.name()).target(args.id("chat_id")?);
            let out = gw.execute(&req, op, mode).await?;
            match out.get("link").and_then(Value::as_str) {
                Some(link) if !link.is_empty() => Ok(link.to_string()),
                _ => Ok("No invite link available.".to_string()),
            }
        }
        "delete_chat_photo" => {
            let chat = args.id("chat_id")?;
            let req = OperationRequest::new("delete_chat_photo").target(chat.clone());
            gw.execute(&req, Op::DeleteChatPhoto, mode).await?;
            Ok(format!("Chat {chat} photo deleted."))
        }
        "get_recent_actions" => {
            let req = OperationRequest::new("get_recent_actions").target(args.id("chat_id")?);
            let events = gw.execute(&req, Op::GetAdminLog, mode).await?;
            let events: Vec<Value> = events
                .as_array()
                .map(|items| items.iter().map(admin_event).collect())
                .unwrap_or_default();
            if events.is_empty() {
                return Ok("No recent admin actions found.".to_string());
            }
            Ok(pretty(&Value::Array(events)))
        }
        "join_chat_by_link" | "import_chat_invite" => {
            let raw = if name == "join_chat_by_link" {
                args.text("link")?
            } else {
                args.text("hash")?
            };
            let hash = invite_hash(&raw)?;
            let req = OperationRequest::new(if name == "join_chat_by_link" {
                "join_chat_by_link"
            } else {
                "import_chat_invite"
            })
            .payload(json!({ "hash": hash }));
            let out = gw.execute(&req, Op::JoinChat, mode).await?;
            let title = out
                .pointer("/chat/title")
                .and_then(Value::as_str)
                .unwrap_or("Unknown Chat");
            if out.get("already_member").and_then(Value::as_bool) == Some(true) {
                Ok(format!("You are already a member of this chat: {title}"))
            } else {
                Ok(format!("Successfully joined chat: {title}"))
            }
        }
        _ => unknown(name),
    }
}

fn first_target(targets: &[EntityHandle]) -> Result<EntityHandle, Failure> {
    targets
        .first()
        .cloned()
        .ok_or_else(|| Failure::invalid("'chat_id' is required."))
}

/// Accept full links, `+HASH` or a bare hash.
fn invite_hash(raw: &str) -> Result<String, Failure> {
    let trimmed = raw.trim();
    let candidate = if trimmed.contains('/') || trimmed.starts_with('+') {
        trimmed.to_string()
    } else {
        format!("+{trimmed}")
    };
    match Identifier::parse(&candidate)? {
        Identifier::Invite(hash) => Ok(hash),
        _ => Err(Failure::invalid(format!("'{raw}' is not an invite link."))),
    }
}

fn admin_event(e: &Value) -> Value {
    let mut out = json!({
        "id": e.get("id").cloned().unwrap_or(Value::Null),
        "user_id": e.get("user_id").cloned().unwrap_or(Value::Null),
        "action": e.pointer("/action/type").cloned().unwrap_or_else(|| json!("unknown")),
    });
    if let Some(date) = e.get("date") {
        out["date"] = format_date(date);
    }
    out
}

fn created(what: &str, title: &str, out: &Value) -> String {
    let id = out
        .pointer("/chats/0/id")
        .or_else(|| out.get("id"))
        .and_then(Value::as_i64);
    match id {
        Some(id) => format!("{what} '{title}' created with ID: {id}"),
        None => format!("{what} '{title}' created."),
    }
}
