use serde_json::{json, Value};

use tgmcp_core::{
    domain::{OperationClass, OperationRequest},
    gateway::{Gateway, Op},
};

use super::{unknown, Args, Param, ToolDef, ToolResult};

const CLASS: OperationClass = OperationClass::Messaging;

pub(crate) fn definitions() -> Vec<ToolDef> {
    let chat = ("chat_id", Param::Id, true, "Chat id, @username or phone number");
    let msg = ("message_id", Param::Int, true, "Message id");
    vec![
        ToolDef::new(
            "send_message",
            CLASS,
            "Send a text message to a user, group or channel.",
            &[chat, ("message", Param::Str, true, "Message text")],
        ),
        ToolDef::new(
            "reply_to_message",
            CLASS,
            "Reply to a specific message in a chat.",
            &[chat, msg, ("text", Param::Str, true, "Reply text")],
        ),
        ToolDef::new(
            "edit_message",
            CLASS,
            "Edit a message you sent.",
            &[chat, msg, ("new_text", Param::Str, true, "Replacement text")],
        ),
        ToolDef::new("delete_message", CLASS, "Delete a message.", &[chat, msg]),
        ToolDef::new(
            "forward_message",
            CLASS,
            "Forward a message from one chat to another.",
            &[
                ("from_chat_id", Param::Id, true, "Source chat"),
                msg,
                ("to_chat_id", Param::Id, true, "Destination chat"),
            ],
        ),
        ToolDef::new("pin_message", CLASS, "Pin a message in a chat.", &[chat, msg]),
        ToolDef::new("unpin_message", CLASS, "Unpin a message in a chat.", &[chat, msg]),
        ToolDef::new("mark_as_read", CLASS, "Mark all messages in a chat as read.", &[chat]),
    ]
}

pub(crate) async fn call(gw: &Gateway, name: &str, args: &Args<'_>) -> ToolResult {
    let mode = args.mode(gw);
    match name {
        "send_message" => {
            let req = OperationRequest::new("send_message")
                .target(args.id("chat_id")?)
                .payload(json!({ "message": args.text("message")? }));
            let out = gw.execute(&req, Op::SendMessage, mode).await?;
            Ok(sent("Message sent", &out))
        }
        "reply_to_message" => {
            let req = OperationRequest::new("reply_to_message")
                .target(args.id("chat_id")?)
                .payload(json!({
                    "message_id": args.int("message_id")?,
                    "text": args.text("text")?,
                }));
            let out = gw.execute(&req, Op::ReplyToMessage, mode).await?;
            Ok(sent("Reply sent", &out))
        }
        "edit_message" => {
            let message_id = args.int("message_id")?;
            let req = OperationRequest::new("edit_message")
                .target(args.id("chat_id")?)
                .payload(json!({ "message_id": message_id, "new_text": args.text("new_text")? }));
            gw.execute(&req, Op::EditMessage, mode).await?;
            Ok(format!("Message {message_id} edited."))
        }
        "delete_message" => {
            let message_id = args.int("message_id")?;
            let req = OperationRequest::new("delete_message")
                .target(args.id("chat_id")?)
                .payload(json!({ "message_id": message_id }));
            gw.execute(&req, Op::DeleteMessage, mode).await?;
            Ok(format!("Message {message_id} deleted."))
        }
        "forward_message" => {
            let message_id = args.int("message_id")?;
            let req = OperationRequest::new("forward_message")
                .target(args.id("from_chat_id")?)
                .target(args.id("to_chat_id")?)
                .payload(json!({ "message_id": message_id }));
            gw.execute(&req, Op::ForwardMessage, mode).await?;
            Ok(format!("Message {message_id} forwarded."))
        }
        "pin_message" | "unpin_message" => {
            let message_id = args.int("message_id")?;
            let (op, verb) = if name == "pin_message" {
                (Op::PinMessage, "pinned")
            } else {
                (Op::UnpinMessage, "unpinned")
            };
            let req = OperationRequest::new(op.name())
                .target(args.id("chat_id")?)
                .payload(json!({ "message_id": message_id }));
            gw.execute(&req, op, mode).await?;
            Ok(format!("Message {message_id} {verb}."))
        }
        "mark_as_read" => {
            let chat = args.id("chat_id")?;
            let req = OperationRequest::new("mark_as_read").target(chat.clone());
            gw.execute(&req, Op::MarkAsRead, mode).await?;
            Ok(format!("Marked all messages as read in chat {chat}."))
        }
        _ => unknown(name),
    }
}

fn sent(what: &str, out: &Value) -> String {
    match out.get("id").and_then(Value::as_i64) {
        Some(id) => format!("{what} (id: {id})."),
        None => format!("{what}."),
    }
}
