use serde_json::{json, Value};

use tgmcp_core::{
    domain::{EntityHandle, OperationClass, OperationRequest},
    gateway::{CallMode, ErrorKind, Failure, Gateway, Op, PRIVACY_KEYS},
};

use super::{unknown, Args, Param, ToolDef, ToolResult};
use crate::format::{format_entity, pretty};

const CLASS: OperationClass = OperationClass::Profile;

pub(crate) fn definitions() -> Vec<ToolDef> {
    let key = ("key", Param::Str, false, "status (last seen), phone or profile_photo");
    vec![
        ToolDef::new(
            "update_profile",
            CLASS,
            "Update your name or bio. Omitted fields are left unchanged.",
            &[
                ("first_name", Param::Str, false, "New first name"),
                ("last_name", Param::Str, false, "New last name"),
                ("about", Param::Str, false, "New bio"),
            ],
        ),
        ToolDef::new("delete_profile_photo", CLASS, "Delete your current profile photo.", &[]),
        ToolDef::new(
            "get_privacy_settings",
            CLASS,
            "Get a privacy setting (default: last seen status).",
            &[key],
        ),
        ToolDef::new(
            "set_privacy_settings",
            CLASS,
            "Set who may see a privacy-controlled field. With no allowed users everyone is allowed.",
            &[
                ("key", Param::Str, true, "status (last seen), phone or profile_photo"),
                ("allow_users", Param::Ids, false, "Users to allow"),
                ("disallow_users", Param::Ids, false, "Users to disallow"),
            ],
        ),
        ToolDef::new(
            "set_bot_commands",
            CLASS,
            "Set the command list of a bot. Only works when logged in as that bot.",
            &[
                ("bot_username", Param::Id, true, "Bot @username"),
                ("commands", Param::Objects, true, "Entries with 'command' and 'description'"),
            ],
        ),
    ]
}

pub(crate) async fn call(gw: &Gateway, name: &str, args: &Args<'_>) -> ToolResult {
    let mode = args.mode(gw);
    match name {
        "update_profile" => {
            let first_name = args.opt_text("first_name");
            let last_name = args.opt_text("last_name");
            let about = args.opt_text("about");
            if first_name.is_none() && last_name.is_none() && about.is_none() {
                return Err(Failure::invalid(
                    "Provide at least one of first_name, last_name or about.",
                ));
            }
            let req = OperationRequest::new("update_profile").payload(json!({
                "first_name": first_name,
                "last_name": last_name,
                "about": about,
            }));
            let user = gw.execute(&req, Op::UpdateProfile, mode).await?;
            match user {
                Value::Object(_) => Ok(format!("Profile updated: {}", pretty(&format_entity(&user)))),
                _ => Ok("Profile updated.".to_string()),
            }
        }
        "delete_profile_photo" => {
            let req = OperationRequest::new("delete_profile_photo");
            let out = gw.execute(&req, Op::DeleteProfilePhoto, mode).await?;
            if out.get("deleted").and_then(Value::as_bool) == Some(true) {
                Ok("Profile photo deleted.".to_string())
            } else {
                Ok("No profile photo to delete.".to_string())
            }
        }
        "get_privacy_settings" => {
            let key = privacy_key(args, Some("status"))?;
            let req = OperationRequest::new("get_privacy_settings").payload(json!({ "key": key }));
            let rules = gw.execute(&req, Op::GetPrivacy, mode).await?;
            Ok(pretty(&json!({ "key": key, "rules": rules.get("rules").unwrap_or(&rules) })))
        }
        "set_privacy_settings" => {
            let key = privacy_key(args, None)?;
            let allow = args.opt_ids("allow_users")?;
            let disallow = args.opt_ids("disallow_users")?;

            let mut skipped = Vec::new();
            let allowed = resolve_users(gw, &allow, mode, &mut skipped).await?;
            let disallowed = resolve_users(gw, &disallow, mode, &mut skipped).await?;
            let allow_count = allowed.len();
            let targets: Vec<EntityHandle> = allowed.into_iter().chain(disallowed).collect();

            let mut req = OperationRequest::new("set_privacy_settings").payload(json!({
                "key": key,
                "allow_all": allow.is_empty(),
                "allow_count": allow_count,
            }));
            req.targets = allow.iter().chain(&disallow).cloned().collect();
            gw.execute_on(&req, Op::SetPrivacy, &targets, mode).await?;

            let mut text = format!("Privacy settings for {key} updated.");
            if !skipped.is_empty() {
                text.push_str(&format!(" Skipped unknown users: {}.", skipped.join(", ")));
            }
            Ok(text)
        }
        "set_bot_commands" => {
            let bot = args.id("bot_username")?;
            let req = OperationRequest::new("set_bot_commands")
                .target(bot.clone())
                .payload(json!({ "commands": args.objects("commands")? }));
            gw.execute(&req, Op::SetBotCommands, mode).await?;
            Ok(format!("Bot commands set for {bot}."))
        }
        _ => unknown(name),
    }
}

fn privacy_key(args: &Args<'_>, default: Option<&str>) -> Result<String, Failure> {
    let key = match (args.opt_text("key"), default) {
        (Some(key), _) => key.trim().to_ascii_lowercase(),
        (None, Some(default)) => default.to_string(),
        (None, None) => return Err(Failure::invalid("'key' is required.")),
    };
    if PRIVACY_KEYS.contains(&key.as_str()) {
        Ok(key)
    } else {
        Err(Failure::invalid(format!(
            "Unsupported privacy key '{key}'. Supported keys: {}.",
            PRIVACY_KEYS.join(", ")
        )))
    }
}

/// Resolve each user on its own; unknown users are skipped, not fatal.
async fn resolve_users(
    gw: &Gateway,
    raws: &[String],
    mode: CallMode,
    skipped: &mut Vec<String>,
) -> Result<Vec<EntityHandle>, Failure> {
    let mut handles = Vec::with_capacity(raws.len());
    for raw in raws {
        match gw.resolve(raw, mode).await {
            Ok(h) => handles.push(h),
            Err(f) if f.kind == ErrorKind::RateLimited => return Err(f),
            Err(f) => {
                tracing::warn!(user = %raw, kind = %f.kind, "skipping privacy rule user");
                skipped.push(raw.clone());
            }
        }
    }
    Ok(handles)
}
