//! Strategy chains for every remote operation the tool surface exposes.
//!
//! Parameter builders receive resolved targets in request order and read the
//! rest from the payload. A strategy that does not apply to the target's kind
//! reports `Unavailable`, which moves the chain along.

use std::sync::OnceLock;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    domain::{EntityHandle, EntityKind, OperationClass},
    ports::RemoteError,
};

use super::classify::{classify, ErrorKind};
use super::fallback::{MethodCall, Strategy, StrategyChain, StrategyContext};

/// `mute_until` value meaning "forever".
const MUTE_FOREVER: i64 = i32::MAX as i64;
const ARCHIVE_FOLDER: i64 = 1;
const PINNED_SCAN_LIMIT: i64 = 50;
const ADMIN_LOG_LIMIT: i64 = 20;

/// Privacy keys accepted by `get_privacy_settings` / `set_privacy_settings`.
pub const PRIVACY_KEYS: &[&str] = &["status", "phone", "profile_photo"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    // messaging
    SendMessage,
    ReplyToMessage,
    EditMessage,
    DeleteMessage,
    ForwardMessage,
    PinMessage,
    UnpinMessage,
    MarkAsRead,
    // chats
    GetChat,
    ListMessages,
    GetMessageContext,
    GetPinnedMessages,
    MuteChat,
    UnmuteChat,
    ArchiveChat,
    UnarchiveChat,
    LeaveChat,
    // contacts
    SearchContacts,
    AddContact,
    DeleteContact,
    BlockUser,
    UnblockUser,
    ResolveUsername,
    GetMe,
    GetUserStatus,
    GetContactIds,
    ImportContacts,
    ExportContacts,
    GetCommonChats,
    // groups
    CreateGroup,
    CreateChannel,
    InviteToGroup,
    EditChatTitle,
    PromoteAdmin,
    DemoteAdmin,
    BanUser,
    UnbanUser,
    GetInviteLink,
    ExportChatInvite,
    JoinChat,
    DeleteChatPhoto,
    GetAdminLog,
    // media
    GetMediaInfo,
    GetStickerSets,
    GifSearch,
    GetUserPhotos,
    // profile
    UpdateProfile,
    DeleteProfilePhoto,
    GetPrivacy,
    SetPrivacy,
    SetBotCommands,
}

impl Op {
    pub const ALL: &'static [Op] = &[
        Op::SendMessage,
        Op::ReplyToMessage,
        Op::EditMessage,
        Op::DeleteMessage,
        Op::ForwardMessage,
        Op::PinMessage,
        Op::UnpinMessage,
        Op::MarkAsRead,
        Op::GetChat,
        Op::ListMessages,
        Op::GetMessageContext,
        Op::GetPinnedMessages,
        Op::MuteChat,
        Op::UnmuteChat,
        Op::ArchiveChat,
        Op::UnarchiveChat,
        Op::LeaveChat,
        Op::SearchContacts,
        Op::AddContact,
        Op::DeleteContact,
        Op::BlockUser,
        Op::UnblockUser,
        Op::ResolveUsername,
        Op::GetMe,
        Op::GetUserStatus,
        Op::GetContactIds,
        Op::ImportContacts,
        Op::ExportContacts,
        Op::GetCommonChats,
        Op::CreateGroup,
        Op::CreateChannel,
        Op::InviteToGroup,
        Op::EditChatTitle,
        Op::PromoteAdmin,
        Op::DemoteAdmin,
        Op::BanUser,
        Op::UnbanUser,
        Op::GetInviteLink,
        Op::ExportChatInvite,
        Op::JoinChat,
        Op::DeleteChatPhoto,
        Op::GetAdminLog,
        Op::GetMediaInfo,
        Op::GetStickerSets,
        Op::GifSearch,
        Op::GetUserPhotos,
        Op::UpdateProfile,
        Op::DeleteProfilePhoto,
        Op::GetPrivacy,
        Op::SetPrivacy,
        Op::SetBotCommands,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Op::SendMessage => "send_message",
            Op::ReplyToMessage => "reply_to_message",
            Op::EditMessage => "edit_message",
            Op::DeleteMessage => "delete_message",
            Op::ForwardMessage => "forward_message",
            Op::PinMessage => "pin_message",
            Op::UnpinMessage => "unpin_message",
            Op::MarkAsRead => "mark_as_read",
            Op::GetChat => "get_chat",
            Op::ListMessages => "list_messages",
            Op::GetMessageContext => "get_message_context",
            Op::GetPinnedMessages => "get_pinned_messages",
            Op::MuteChat => "mute_chat",
            Op::UnmuteChat => "unmute_chat",
            Op::ArchiveChat => "archive_chat",
            Op::UnarchiveChat => "unarchive_chat",
            Op::LeaveChat => "leave_chat",
            Op::SearchContacts => "search_contacts",
            Op::AddContact => "add_contact",
            Op::DeleteContact => "delete_contact",
            Op::BlockUser => "block_user",
            Op::UnblockUser => "unblock_user",
            Op::ResolveUsername => "resolve_username",
            Op::GetMe => "get_me",
            Op::GetUserStatus => "get_user_status",
            Op::GetContactIds => "get_contact_ids",
            Op::ImportContacts => "import_contacts",
            Op::ExportContacts => "export_contacts",
            Op::GetCommonChats => "get_common_chats",
            Op::CreateGroup => "create_group",
            Op::CreateChannel => "create_channel",
            Op::InviteToGroup => "invite_to_group",
            Op::EditChatTitle => "edit_chat_title",
            Op::PromoteAdmin => "promote_admin",
            Op::DemoteAdmin => "demote_admin",
            Op::BanUser => "ban_user",
            Op::UnbanUser => "unban_user",
            Op::GetInviteLink => "get_invite_link",
            Op::ExportChatInvite => "export_chat_invite",
            Op::JoinChat => "join_chat_by_link",
            Op::DeleteChatPhoto => "delete_chat_photo",
            Op::GetAdminLog => "get_recent_actions",
            Op::GetMediaInfo => "get_media_info",
            Op::GetStickerSets => "get_sticker_sets",
            Op::GifSearch => "get_gif_search",
            Op::GetUserPhotos => "get_user_photos",
            Op::UpdateProfile => "update_profile",
            Op::DeleteProfilePhoto => "delete_profile_photo",
            Op::GetPrivacy => "get_privacy_settings",
            Op::SetPrivacy => "set_privacy_settings",
            Op::SetBotCommands => "set_bot_commands",
        }
    }

    pub fn class(self) -> OperationClass {
        match self {
            Op::SendMessage
            | Op::ReplyToMessage
            | Op::EditMessage
            | Op::DeleteMessage
            | Op::ForwardMessage
            | Op::PinMessage
            | Op::UnpinMessage
            | Op::MarkAsRead => OperationClass::Messaging,
            Op::GetChat
            | Op::ListMessages
            | Op::GetMessageContext
            | Op::GetPinnedMessages
            | Op::MuteChat
            | Op::UnmuteChat
            | Op::ArchiveChat
            | Op::UnarchiveChat
            | Op::LeaveChat => OperationClass::Chats,
            Op::SearchContacts
            | Op::AddContact
            | Op::DeleteContact
            | Op::BlockUser
            | Op::UnblockUser
            | Op::ResolveUsername
            | Op::GetMe
            | Op::GetUserStatus
            | Op::GetContactIds
            | Op::ImportContacts
            | Op::ExportContacts
            | Op::GetCommonChats => OperationClass::Contacts,
            Op::CreateGroup
            | Op::CreateChannel
            | Op::InviteToGroup
            | Op::EditChatTitle
            | Op::PromoteAdmin
            | Op::DemoteAdmin
            | Op::BanUser
            | Op::UnbanUser
            | Op::GetInviteLink
            | Op::ExportChatInvite
            | Op::JoinChat
            | Op::DeleteChatPhoto
            | Op::GetAdminLog => OperationClass::Groups,
            Op::GetMediaInfo | Op::GetStickerSets | Op::GifSearch | Op::GetUserPhotos => {
                OperationClass::Media
            }
            Op::UpdateProfile
            | Op::DeleteProfilePhoto
            | Op::GetPrivacy
            | Op::SetPrivacy
            | Op::SetBotCommands => OperationClass::Profile,
        }
    }
}

/// All chains, built once and indexed by `Op` discriminant.
pub struct Catalog {
    chains: Vec<StrategyChain>,
}

impl Catalog {
    pub fn global() -> &'static Catalog {
        static CATALOG: OnceLock<Catalog> = OnceLock::new();
        CATALOG.get_or_init(Catalog::build)
    }

    pub fn build() -> Self {
        Self {
            chains: Op::ALL.iter().map(|&op| build_chain(op)).collect(),
        }
    }

    pub fn chain(&self, op: Op) -> &StrategyChain {
        &self.chains[op as usize]
    }
}

// ---------------------------------------------------------------------------
// shared helpers
// ---------------------------------------------------------------------------

fn peer(ctx: &StrategyContext<'_>, idx: usize) -> Result<Value, RemoteError> {
    Ok(ctx.target(idx)?.peer())
}

fn peers_from(ctx: &StrategyContext<'_>, from: usize) -> Vec<Value> {
    ctx.targets.iter().skip(from).map(EntityHandle::peer).collect()
}

fn require(h: &EntityHandle, kinds: &[EntityKind], what: &str) -> Result<(), RemoteError> {
    if kinds.contains(&h.kind()) {
        Ok(())
    } else {
        Err(RemoteError::Unavailable(format!(
            "{what} does not apply to {} targets",
            h.kind().as_str()
        )))
    }
}

fn channel(ctx: &StrategyContext<'_>, what: &str) -> Result<Value, RemoteError> {
    let h = ctx.target(0)?;
    require(h, &[EntityKind::Channel], what)?;
    Ok(h.peer())
}

fn basic_group(ctx: &StrategyContext<'_>, what: &str) -> Result<i64, RemoteError> {
    let h = ctx.target(0)?;
    require(h, &[EntityKind::Group], what)?;
    Ok(h.id().0)
}

fn message_id(ctx: &StrategyContext<'_>) -> Result<i64, RemoteError> {
    let id = ctx.i64_arg("message_id")?;
    if id < 1 {
        return Err(RemoteError::Invalid("'message_id' must be positive".into()));
    }
    Ok(id)
}

fn non_empty<'a>(ctx: &StrategyContext<'a>, key: &str) -> Result<&'a str, RemoteError> {
    let s = ctx.str_arg(key)?;
    if s.trim().is_empty() {
        return Err(RemoteError::Invalid(format!("'{key}' must not be empty")));
    }
    Ok(s)
}

/// Walk `path` into `v`; missing or null fields are `Malformed`.
fn pick(mut v: Value, path: &[&str]) -> Result<Value, RemoteError> {
    for key in path {
        v = match v {
            Value::Object(mut map) => map.remove(*key).unwrap_or(Value::Null),
            _ => Value::Null,
        };
        if v.is_null() {
            return Err(RemoteError::Malformed(format!(
                "response has no '{}'",
                path.join(".")
            )));
        }
    }
    Ok(v)
}

fn first(v: Value, list: &str) -> Result<Value, RemoteError> {
    match pick(v, &[list])? {
        Value::Array(mut items) if !items.is_empty() => Ok(items.swap_remove(0)),
        _ => Err(RemoteError::Malformed(format!("response '{list}' is empty"))),
    }
}

fn done(_: Value) -> Result<Value, RemoteError> {
    Ok(json!({ "ok": true }))
}

// ---------------------------------------------------------------------------
// multi-step strategies
// ---------------------------------------------------------------------------

/// Leave a basic group by deleting our own user id, looked up first.
struct LeaveByOwnId;

#[async_trait]
impl Strategy for LeaveByOwnId {
    fn name(&self) -> &str {
        "delete_self_by_id"
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<Value, RemoteError> {
        let chat_id = basic_group(ctx, "delete_self_by_id")?;
        let me = ctx.conn.invoke("users.getMe", json!({})).await?;
        let my_id = pick(me, &["id"])?;
        ctx.conn
            .invoke(
                "messages.deleteChatUser",
                json!({ "chat_id": chat_id, "user_id": { "type": "user", "id": my_id } }),
            )
            .await?;
        Ok(json!({ "ok": true }))
    }
}

/// Add users to a basic group one at a time.
struct AddChatUsers;

#[async_trait]
impl Strategy for AddChatUsers {
    fn name(&self) -> &str {
        "add_chat_user"
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<Value, RemoteError> {
        let chat_id = basic_group(ctx, "add_chat_user")?;
        let users = peers_from(ctx, 1);
        if users.is_empty() {
            return Err(RemoteError::Invalid("at least one user is required".into()));
        }
        let added = users.len();
        for user in users {
            ctx.conn
                .invoke(
                    "messages.addChatUser",
                    json!({ "chat_id": chat_id, "user_id": user, "fwd_limit": 100 }),
                )
                .await?;
        }
        Ok(json!({ "ok": true, "added": added }))
    }
}

/// Ask whether an invite points at a chat we are already in.
///
/// Any answer other than "already a member" (including most errors, which the
/// remote side returns for many valid invites) hands over to the import.
/// Flood waits are passed through so the class gets blocked.
struct CheckInvite;

#[async_trait]
impl Strategy for CheckInvite {
    fn name(&self) -> &str {
        "check_invite"
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<Value, RemoteError> {
        let hash = non_empty(ctx, "hash")?;
        match ctx
            .conn
            .invoke("messages.checkChatInvite", json!({ "hash": hash }))
            .await
        {
            Ok(info) => match info.get("chat") {
                Some(chat) if chat.is_object() => {
                    Ok(json!({ "already_member": true, "chat": chat.clone() }))
                }
                _ => Err(RemoteError::Unavailable("not a member yet".into())),
            },
            Err(e) if classify(&e).kind == ErrorKind::RateLimited => Err(e),
            Err(e) => Err(RemoteError::Unavailable(format!("invite check failed: {e}"))),
        }
    }
}

/// Scan recent history and keep the pinned messages.
struct ScanPinned;

#[async_trait]
impl Strategy for ScanPinned {
    fn name(&self) -> &str {
        "scan_recent"
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<Value, RemoteError> {
        let raw = ctx
            .conn
            .invoke(
                "messages.getHistory",
                json!({ "peer": peer(ctx, 0)?, "limit": PINNED_SCAN_LIMIT }),
            )
            .await?;
        let messages = match pick(raw, &["messages"])? {
            Value::Array(items) => items,
            _ => return Err(RemoteError::Malformed("'messages' is not a list".into())),
        };
        let pinned: Vec<Value> = messages
            .into_iter()
            .filter(|m| m.get("pinned").and_then(Value::as_bool).unwrap_or(false))
            .collect();
        Ok(json!({ "messages": pinned }))
    }
}

/// Delete the newest profile photo, if there is one.
struct DeleteLatestPhoto;

#[async_trait]
impl Strategy for DeleteLatestPhoto {
    fn name(&self) -> &str {
        "delete_latest_photo"
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<Value, RemoteError> {
        let raw = ctx
            .conn
            .invoke(
                "photos.getUserPhotos",
                json!({ "user_id": { "type": "self" }, "offset": 0, "max_id": 0, "limit": 1 }),
            )
            .await?;
        let photo = match pick(raw, &["photos"])? {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            _ => return Ok(json!({ "deleted": false })),
        };
        let id = pick(photo, &["id"])?;
        ctx.conn
            .invoke("photos.deletePhotos", json!({ "id": [id.clone()] }))
            .await?;
        Ok(json!({ "deleted": true, "id": id }))
    }
}

/// Replace bot commands; only a bot account may do this.
struct SetCommandsAsBot;

#[async_trait]
impl Strategy for SetCommandsAsBot {
    fn name(&self) -> &str {
        "set_commands"
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<Value, RemoteError> {
        let commands = bot_commands(ctx)?;
        let me = ctx.conn.invoke("users.getMe", json!({})).await?;
        if !me.get("bot").and_then(Value::as_bool).unwrap_or(false) {
            return Err(RemoteError::Invalid(
                "bot commands can only be set from a bot account".into(),
            ));
        }
        let count = commands.len();
        ctx.conn
            .invoke(
                "bots.setBotCommands",
                json!({ "scope": { "type": "default" }, "lang_code": "en", "commands": commands }),
            )
            .await?;
        Ok(json!({ "ok": true, "commands": count }))
    }
}

// ---------------------------------------------------------------------------
// chains
// ---------------------------------------------------------------------------

fn build_chain(op: Op) -> StrategyChain {
    let (name, class) = (op.name(), op.class());
    let chain = |head: MethodCall| StrategyChain::new(name, class, head);

    match op {
        Op::SendMessage => chain(MethodCall::new("send", "messages.sendMessage", |ctx| {
            Ok(json!({ "peer": peer(ctx, 0)?, "message": non_empty(ctx, "message")? }))
        }))
        .retry(1),

        Op::ReplyToMessage => chain(MethodCall::new("reply", "messages.sendMessage", |ctx| {
            Ok(json!({
                "peer": peer(ctx, 0)?,
                "message": non_empty(ctx, "text")?,
                "reply_to_msg_id": message_id(ctx)?,
            }))
        })),

        Op::EditMessage => chain(MethodCall::new("edit", "messages.editMessage", |ctx| {
            Ok(json!({
                "peer": peer(ctx, 0)?,
                "id": message_id(ctx)?,
                "message": non_empty(ctx, "new_text")?,
            }))
        })),

        Op::DeleteMessage => chain(
            MethodCall::new("delete_channel", "channels.deleteMessages", |ctx| {
                Ok(json!({ "channel": channel(ctx, "delete_channel")?, "id": [message_id(ctx)?] }))
            })
            .extract(done),
        )
        .then(
            MethodCall::new("delete", "messages.deleteMessages", |ctx| {
                Ok(json!({ "id": [message_id(ctx)?], "revoke": true }))
            })
            .extract(done),
        ),

        Op::ForwardMessage => chain(MethodCall::new("forward", "messages.forwardMessages", |ctx| {
            Ok(json!({
                "from_peer": peer(ctx, 0)?,
                "to_peer": peer(ctx, 1)?,
                "id": [message_id(ctx)?],
            }))
        })),

        Op::PinMessage => chain(
            MethodCall::new("pin", "messages.updatePinnedMessage", |ctx| {
                Ok(json!({ "peer": peer(ctx, 0)?, "id": message_id(ctx)?, "silent": true }))
            })
            .extract(done),
        ),

        Op::UnpinMessage => chain(
            MethodCall::new("unpin", "messages.updatePinnedMessage", |ctx| {
                Ok(json!({ "peer": peer(ctx, 0)?, "id": message_id(ctx)?, "unpin": true }))
            })
            .extract(done),
        ),

        Op::MarkAsRead => chain(
            MethodCall::new("read_channel", "channels.readHistory", |ctx| {
                Ok(json!({ "channel": channel(ctx, "read_channel")?, "max_id": 0 }))
            })
            .extract(done),
        )
        .then(
            MethodCall::new("read", "messages.readHistory", |ctx| {
                Ok(json!({ "peer": peer(ctx, 0)?, "max_id": 0 }))
            })
            .extract(done),
        ),

        Op::GetChat => chain(
            MethodCall::new("full_channel", "channels.getFullChannel", |ctx| {
                Ok(json!({ "channel": channel(ctx, "full_channel")? }))
            })
            .extract(|v| pick(v, &["full_chat"])),
        )
        .then(
            MethodCall::new("full_chat", "messages.getFullChat", |ctx| {
                Ok(json!({ "chat_id": basic_group(ctx, "full_chat")? }))
            })
            .extract(|v| pick(v, &["full_chat"])),
        )
        .then(
            MethodCall::new("full_user", "users.getFullUser", |ctx| {
                let h = ctx.target(0)?;
                require(h, &[EntityKind::User], "full_user")?;
                Ok(json!({ "id": h.peer() }))
            })
            .extract(|v| pick(v, &["full_user"])),
        ),

        Op::ListMessages => chain(MethodCall::new("search", "messages.search", |ctx| {
            Ok(json!({
                "peer": peer(ctx, 0)?,
                "q": ctx.opt_str("search_query").unwrap_or_default(),
                "min_date": ctx.value("min_date"),
                "max_date": ctx.value("max_date"),
                "limit": ctx.opt_i64("limit").unwrap_or(20),
            }))
        })),

        Op::GetMessageContext => chain(MethodCall::new("history", "messages.getHistory", |ctx| {
            let id = message_id(ctx)?;
            let size = ctx.opt_i64("context_size").unwrap_or(3).clamp(0, 50);
            let offset_id = id
                .checked_add(size + 1)
                .ok_or_else(|| RemoteError::Invalid("'message_id' is too large".into()))?;
            Ok(json!({
                "peer": peer(ctx, 0)?,
                "offset_id": offset_id,
                "limit": 2 * size + 1,
            }))
        })),

        Op::GetPinnedMessages => chain(MethodCall::new("pinned_filter", "messages.search", |ctx| {
            Ok(json!({ "peer": peer(ctx, 0)?, "q": "", "filter": "pinned", "limit": 100 }))
        }))
        .then(ScanPinned),

        Op::MuteChat | Op::UnmuteChat => {
            // Typed settings object first, then the raw dictionary form.
            if op == Op::MuteChat {
                chain(
                    MethodCall::new("typed_settings", "account.updateNotifySettings", |ctx| {
                        Ok(json!({
                            "peer": peer(ctx, 0)?,
                            "settings": { "_": "inputPeerNotifySettings", "mute_until": MUTE_FOREVER },
                        }))
                    })
                    .extract(done),
                )
                .then(
                    MethodCall::new("raw_settings", "account.updateNotifySettings", |ctx| {
                        Ok(json!({
                            "peer": peer(ctx, 0)?,
                            "settings": { "mute_until": MUTE_FOREVER, "show_previews": false, "silent": true },
                        }))
                    })
                    .extract(done),
                )
            } else {
                chain(
                    MethodCall::new("typed_settings", "account.updateNotifySettings", |ctx| {
                        Ok(json!({
                            "peer": peer(ctx, 0)?,
                            "settings": { "_": "inputPeerNotifySettings", "mute_until": 0 },
                        }))
                    })
                    .extract(done),
                )
                .then(
                    MethodCall::new("raw_settings", "account.updateNotifySettings", |ctx| {
                        Ok(json!({
                            "peer": peer(ctx, 0)?,
                            "settings": { "mute_until": 0, "show_previews": true, "silent": false },
                        }))
                    })
                    .extract(done),
                )
            }
        }

        Op::ArchiveChat => chain(
            MethodCall::new("edit_folder", "folders.editPeerFolders", |ctx| {
                Ok(json!({ "folder_peers": [{ "peer": peer(ctx, 0)?, "folder_id": ARCHIVE_FOLDER }] }))
            })
            .extract(done),
        ),

        Op::UnarchiveChat => chain(
            MethodCall::new("edit_folder", "folders.editPeerFolders", |ctx| {
                Ok(json!({ "folder_peers": [{ "peer": peer(ctx, 0)?, "folder_id": 0 }] }))
            })
            .extract(done),
        ),

        Op::LeaveChat => chain(
            MethodCall::new("leave_channel", "channels.leaveChannel", |ctx| {
                let h = ctx.target(0)?;
                if h.kind() == EntityKind::User {
                    return Err(RemoteError::Invalid(
                        "leaving only works for groups and channels".into(),
                    ));
                }
                Ok(json!({ "channel": channel(ctx, "leave_channel")? }))
            })
            .extract(done),
        )
        .then(
            MethodCall::new("delete_self", "messages.deleteChatUser", |ctx| {
                Ok(json!({
                    "chat_id": basic_group(ctx, "delete_self")?,
                    "user_id": { "type": "self" },
                }))
            })
            .extract(done),
        )
        .then(LeaveByOwnId),

        Op::SearchContacts => chain(MethodCall::new("search", "contacts.search", |ctx| {
            Ok(json!({ "q": non_empty(ctx, "query")?, "limit": ctx.opt_i64("limit").unwrap_or(20) }))
        })),

        Op::AddContact => chain(
            MethodCall::new("import", "contacts.importContacts", |ctx| {
                Ok(json!({
                    "contacts": [{
                        "client_id": 0,
                        "phone": non_empty(ctx, "phone")?,
                        "first_name": non_empty(ctx, "first_name")?,
                        "last_name": ctx.opt_str("last_name").unwrap_or_default(),
                    }],
                }))
            })
            .extract(|v| first(v, "users")),
        ),

        Op::DeleteContact => chain(
            MethodCall::new("delete", "contacts.deleteContacts", |ctx| {
                Ok(json!({ "id": [peer(ctx, 0)?] }))
            })
            .extract(done),
        ),

        Op::BlockUser => chain(
            MethodCall::new("block", "contacts.block", |ctx| Ok(json!({ "id": peer(ctx, 0)? })))
                .extract(done),
        ),

        Op::UnblockUser => chain(
            MethodCall::new("unblock", "contacts.unblock", |ctx| Ok(json!({ "id": peer(ctx, 0)? })))
                .extract(done),
        ),

        Op::ResolveUsername => chain(MethodCall::new(
            "resolve",
            "contacts.resolveUsername",
            |ctx| {
                let name = non_empty(ctx, "username")?;
                Ok(json!({ "username": name.trim_start_matches('@') }))
            },
        )),

        Op::GetMe => chain(MethodCall::new("me", "users.getMe", |_| Ok(json!({})))),

        Op::GetUserStatus => chain(
            MethodCall::new("users", "users.getUsers", |ctx| Ok(json!({ "id": [peer(ctx, 0)?] })))
                .extract(|v| first(v, "users")),
        ),

        Op::GetContactIds => chain(MethodCall::new(
            "contact_ids",
            "contacts.getContactIDs",
            |_| Ok(json!({ "hash": 0 })),
        )),

        Op::ImportContacts => chain(
            MethodCall::new("import", "contacts.importContacts", |ctx| {
                Ok(json!({ "contacts": phone_contacts(ctx)? }))
            })
            .extract(|v| {
                let imported = pick(v, &["imported"])?;
                let count = imported.as_array().map_or(0, Vec::len);
                Ok(json!({ "imported": count }))
            }),
        ),

        Op::ExportContacts => chain(
            MethodCall::new("contacts", "contacts.getContacts", |_| Ok(json!({ "hash": 0 })))
                .extract(|v| pick(v, &["users"])),
        ),

        Op::GetCommonChats => chain(
            MethodCall::new("common_chats", "messages.getCommonChats", |ctx| {
                let h = ctx.target(0)?;
                require(h, &[EntityKind::User], "common_chats")?;
                Ok(json!({ "user_id": h.peer(), "max_id": 0, "limit": 100 }))
            })
            .extract(|v| pick(v, &["chats"])),
        ),

        Op::CreateGroup => chain(MethodCall::new("create_chat", "messages.createChat", |ctx| {
            let users = peers_from(ctx, 0);
            if users.is_empty() {
                return Err(RemoteError::Invalid("at least one user is required".into()));
            }
            Ok(json!({ "title": non_empty(ctx, "title")?, "users": users }))
        })),

        Op::CreateChannel => chain(MethodCall::new("create_channel", "channels.createChannel", |ctx| {
            Ok(json!({
                "title": non_empty(ctx, "title")?,
                "about": ctx.opt_str("about").unwrap_or_default(),
                "megagroup": ctx.bool_arg("megagroup", false),
                "broadcast": !ctx.bool_arg("megagroup", false),
            }))
        })),

        Op::InviteToGroup => chain(
            MethodCall::new("invite_channel", "channels.inviteToChannel", |ctx| {
                let users = peers_from(ctx, 1);
                if users.is_empty() {
                    return Err(RemoteError::Invalid("at least one user is required".into()));
                }
                Ok(json!({ "channel": channel(ctx, "invite_channel")?, "users": users }))
            })
            .extract(done),
        )
        .then(AddChatUsers),

        Op::EditChatTitle => chain(
            MethodCall::new("channel_title", "channels.editTitle", |ctx| {
                Ok(json!({ "channel": channel(ctx, "channel_title")?, "title": non_empty(ctx, "title")? }))
            })
            .extract(done),
        )
        .then(
            MethodCall::new("chat_title", "messages.editChatTitle", |ctx| {
                Ok(json!({ "chat_id": basic_group(ctx, "chat_title")?, "title": non_empty(ctx, "title")? }))
            })
            .extract(done),
        ),

        Op::PromoteAdmin => chain(
            MethodCall::new("channel_admin", "channels.editAdmin", |ctx| {
                let rights = match ctx.value("rights") {
                    Value::Null => default_admin_rights(),
                    Value::Object(map) => Value::Object(map),
                    _ => return Err(RemoteError::Invalid("'rights' must be an object".into())),
                };
                Ok(json!({
                    "channel": channel(ctx, "channel_admin")?,
                    "user_id": peer(ctx, 1)?,
                    "admin_rights": rights,
                    "rank": ctx.opt_str("rank").unwrap_or_default(),
                }))
            })
            .extract(done),
        )
        .then(
            MethodCall::new("chat_admin", "messages.editChatAdmin", |ctx| {
                Ok(json!({
                    "chat_id": basic_group(ctx, "chat_admin")?,
                    "user_id": peer(ctx, 1)?,
                    "is_admin": true,
                }))
            })
            .extract(done),
        ),

        Op::DemoteAdmin => chain(
            MethodCall::new("channel_admin", "channels.editAdmin", |ctx| {
                Ok(json!({
                    "channel": channel(ctx, "channel_admin")?,
                    "user_id": peer(ctx, 1)?,
                    "admin_rights": {},
                    "rank": "",
                }))
            })
            .extract(done),
        )
        .then(
            MethodCall::new("chat_admin", "messages.editChatAdmin", |ctx| {
                Ok(json!({
                    "chat_id": basic_group(ctx, "chat_admin")?,
                    "user_id": peer(ctx, 1)?,
                    "is_admin": false,
                }))
            })
            .extract(done),
        ),

        Op::BanUser => chain(
            MethodCall::new("channel_ban", "channels.editBanned", |ctx| {
                Ok(json!({
                    "channel": channel(ctx, "channel_ban")?,
                    "participant": peer(ctx, 1)?,
                    "banned_rights": { "view_messages": true, "until_date": 0 },
                }))
            })
            .extract(done),
        )
        .then(
            MethodCall::new("chat_kick", "messages.deleteChatUser", |ctx| {
                Ok(json!({ "chat_id": basic_group(ctx, "chat_kick")?, "user_id": peer(ctx, 1)? }))
            })
            .extract(done),
        ),

        Op::UnbanUser => chain(
            MethodCall::new("channel_unban", "channels.editBanned", |ctx| {
                Ok(json!({
                    "channel": channel(ctx, "channel_unban")?,
                    "participant": peer(ctx, 1)?,
                    "banned_rights": { "view_messages": false, "until_date": 0 },
                }))
            })
            .extract(done),
        ),

        Op::GetInviteLink => invite_chain(chain).then(
            MethodCall::new("full_chat_link", "messages.getFullChat", |ctx| {
                let h = ctx.target(0)?;
                require(h, &[EntityKind::Group, EntityKind::Channel], "full_chat_link")?;
                Ok(json!({ "chat_id": h.id().0 }))
            })
            .extract(|v| {
                let full = pick(v, &["full_chat"])?;
                pick(full.clone(), &["exported_invite", "link"])
                    .or_else(|_| pick(full, &["invite_link"]))
                    .map(|link| json!({ "link": link }))
            }),
        ),

        Op::ExportChatInvite => invite_chain(chain),

        Op::JoinChat => StrategyChain::new(name, class, CheckInvite).then(
            MethodCall::new("import_invite", "messages.importChatInvite", |ctx| {
                Ok(json!({ "hash": non_empty(ctx, "hash")? }))
            })
            .extract(|v| {
                let chat = first(v, "chats").unwrap_or(Value::Null);
                Ok(json!({ "joined": true, "chat": chat }))
            }),
        ),

        Op::DeleteChatPhoto => chain(
            MethodCall::new("channel_photo", "channels.editPhoto", |ctx| {
                let h = ctx.target(0)?;
                if h.kind() == EntityKind::User {
                    return Err(RemoteError::Invalid(
                        "only groups and channels have a chat photo".into(),
                    ));
                }
                Ok(json!({ "channel": channel(ctx, "channel_photo")?, "photo": { "type": "empty" } }))
            })
            .extract(done),
        )
        .then(
            MethodCall::new("chat_photo", "messages.editChatPhoto", |ctx| {
                Ok(json!({ "chat_id": basic_group(ctx, "chat_photo")?, "photo": { "type": "empty" } }))
            })
            .extract(done),
        ),

        Op::GetAdminLog => chain(
            MethodCall::new("admin_log", "channels.getAdminLog", |ctx| {
                let h = ctx.target(0)?;
                if h.kind() != EntityKind::Channel {
                    return Err(RemoteError::Invalid(
                        "recent actions exist only for supergroups and channels".into(),
                    ));
                }
                Ok(json!({
                    "channel": h.peer(),
                    "q": "",
                    "admins": [],
                    "max_id": 0,
                    "min_id": 0,
                    "limit": ADMIN_LOG_LIMIT,
                }))
            })
            .extract(|v| pick(v, &["events"])),
        ),

        Op::GetMediaInfo => chain(
            MethodCall::new("channel_message", "channels.getMessages", |ctx| {
                Ok(json!({ "channel": channel(ctx, "channel_message")?, "id": [message_id(ctx)?] }))
            })
            .extract(|v| first(v, "messages")),
        )
        .then(
            MethodCall::new("message", "messages.getMessages", |ctx| {
                Ok(json!({ "id": [message_id(ctx)?] }))
            })
            .extract(|v| first(v, "messages")),
        ),

        Op::GetStickerSets => chain(
            MethodCall::new("all_stickers", "messages.getAllStickers", |_| Ok(json!({ "hash": 0 })))
                .extract(|v| pick(v, &["sets"])),
        ),

        Op::GifSearch => chain(
            MethodCall::new("search_gifs", "messages.searchGifs", |ctx| {
                Ok(json!({
                    "q": non_empty(ctx, "query")?,
                    "offset_id": 0,
                    "limit": ctx.opt_i64("limit").unwrap_or(10),
                }))
            })
            .extract(|v| Ok(document_ids(pick(v, &["gifs"])?, &["document", "id"]))),
        )
        .then(
            MethodCall::new("gif_filter", "messages.search", |ctx| {
                Ok(json!({
                    "peer": "gif",
                    "q": non_empty(ctx, "query")?,
                    "filter": "gif",
                    "limit": ctx.opt_i64("limit").unwrap_or(10),
                }))
            })
            .extract(|v| Ok(document_ids(pick(v, &["messages"])?, &["media", "document", "id"]))),
        ),

        Op::GetUserPhotos => chain(
            MethodCall::new("user_photos", "photos.getUserPhotos", |ctx| {
                Ok(json!({
                    "user_id": peer(ctx, 0)?,
                    "offset": 0,
                    "max_id": 0,
                    "limit": ctx.opt_i64("limit").unwrap_or(10),
                }))
            })
            .extract(|v| pick(v, &["photos"])),
        ),

        Op::UpdateProfile => chain(
            MethodCall::new("update_profile", "account.updateProfile", |ctx| {
                let first_name = ctx.value("first_name");
                let last_name = ctx.value("last_name");
                let about = ctx.value("about");
                if first_name.is_null() && last_name.is_null() && about.is_null() {
                    return Err(RemoteError::Invalid(
                        "at least one of first_name, last_name or about is required".into(),
                    ));
                }
                Ok(json!({ "first_name": first_name, "last_name": last_name, "about": about }))
            }),
        ),

        Op::DeleteProfilePhoto => StrategyChain::new(name, class, DeleteLatestPhoto),

        Op::GetPrivacy => chain(MethodCall::new("get_privacy", "account.getPrivacy", |ctx| {
            Ok(json!({ "key": privacy_key(ctx)? }))
        })),

        Op::SetPrivacy => chain(MethodCall::new("set_privacy", "account.setPrivacy", |ctx| {
            Ok(json!({ "key": privacy_key(ctx)?, "rules": privacy_rules(ctx)? }))
        })),

        Op::SetBotCommands => StrategyChain::new(name, class, SetCommandsAsBot),
    }
}

fn invite_chain(chain: impl Fn(MethodCall) -> StrategyChain) -> StrategyChain {
    chain(
        MethodCall::new("export_invite", "messages.exportChatInvite", |ctx| {
            Ok(json!({ "peer": peer(ctx, 0)? }))
        })
        .extract(|v| pick(v, &["link"]).map(|link| json!({ "link": link }))),
    )
    .then(
        MethodCall::new("exported_invites", "messages.getExportedChatInvites", |ctx| {
            Ok(json!({ "peer": peer(ctx, 0)?, "admin_id": { "type": "self" }, "limit": 1 }))
        })
        .extract(|v| pick(first(v, "invites")?, &["link"]).map(|link| json!({ "link": link }))),
    )
}

fn default_admin_rights() -> Value {
    json!({
        "change_info": true,
        "post_messages": true,
        "edit_messages": true,
        "delete_messages": true,
        "ban_users": true,
        "invite_users": true,
        "pin_messages": true,
        "add_admins": false,
        "anonymous": false,
        "manage_call": true,
        "other": true,
    })
}

/// Collect `path` out of each list item, skipping items without it.
fn document_ids(items: Value, path: &[&str]) -> Value {
    let ids: Vec<Value> = match items {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| pick(item, path).ok())
            .collect(),
        _ => Vec::new(),
    };
    Value::Array(ids)
}

fn phone_contacts(ctx: &StrategyContext<'_>) -> Result<Vec<Value>, RemoteError> {
    let Value::Array(items) = ctx.value("contacts") else {
        return Err(RemoteError::Invalid("'contacts' must be a list".into()));
    };
    if items.is_empty() {
        return Err(RemoteError::Invalid("'contacts' must not be empty".into()));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let field = |key: &str| c.get(key).and_then(Value::as_str).map(str::trim);
            let (Some(phone), Some(first_name)) = (field("phone"), field("first_name")) else {
                return Err(RemoteError::Invalid(format!(
                    "contact {} needs 'phone' and 'first_name'",
                    i + 1
                )));
            };
            if phone.is_empty() || first_name.is_empty() {
                return Err(RemoteError::Invalid(format!(
                    "contact {} needs 'phone' and 'first_name'",
                    i + 1
                )));
            }
            Ok(json!({
                "client_id": i,
                "phone": phone,
                "first_name": first_name,
                "last_name": field("last_name").unwrap_or_default(),
            }))
        })
        .collect()
}

fn privacy_key(ctx: &StrategyContext<'_>) -> Result<String, RemoteError> {
    let key = ctx.opt_str("key").unwrap_or("status");
    if PRIVACY_KEYS.contains(&key) {
        Ok(key.to_string())
    } else {
        Err(RemoteError::Invalid(format!(
            "unsupported privacy key '{key}', expected one of: {}",
            PRIVACY_KEYS.join(", ")
        )))
    }
}

/// Targets are the allowed users followed by the disallowed ones; `allow_count`
/// splits them. No allowed users means everyone is allowed.
fn privacy_rules(ctx: &StrategyContext<'_>) -> Result<Vec<Value>, RemoteError> {
    let split = ctx.opt_i64("allow_count").unwrap_or(0).max(0);
    let split = usize::try_from(split)
        .unwrap_or(usize::MAX)
        .min(ctx.targets.len());
    let (allow, disallow) = ctx.targets.split_at(split);

    let mut rules = Vec::new();
    if ctx.bool_arg("allow_all", false) {
        rules.push(json!({ "type": "allow_all" }));
    } else if !allow.is_empty() {
        let users: Vec<Value> = allow.iter().map(EntityHandle::peer).collect();
        rules.push(json!({ "type": "allow_users", "users": users }));
    }
    if !disallow.is_empty() {
        let users: Vec<Value> = disallow.iter().map(EntityHandle::peer).collect();
        rules.push(json!({ "type": "disallow_users", "users": users }));
    }
    if rules.is_empty() {
        return Err(RemoteError::Invalid("no privacy rule to apply".into()));
    }
    Ok(rules)
}

fn bot_commands(ctx: &StrategyContext<'_>) -> Result<Vec<Value>, RemoteError> {
    let Value::Array(items) = ctx.value("commands") else {
        return Err(RemoteError::Invalid("'commands' must be a list".into()));
    };
    items
        .iter()
        .map(|c| {
            let command = c.get("command").and_then(Value::as_str).map(str::trim);
            let description = c.get("description").and_then(Value::as_str);
            match (command, description) {
                (Some(command), Some(description)) if !command.is_empty() => Ok(json!({
                    "command": command.trim_start_matches('/'),
                    "description": description,
                })),
                _ => Err(RemoteError::Invalid(
                    "each command needs 'command' and 'description'".into(),
                )),
            }
        })
        .collect()
}
