use serde_json::{json, Map, Value};

use tgmcp_core::{
    domain::{OperationClass, OperationRequest},
    gateway::{Gateway, Op},
};

use super::{unknown, Args, Param, ToolDef, ToolResult};
use crate::format::{format_date, pretty};

const CLASS: OperationClass = OperationClass::Media;

pub(crate) fn definitions() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "get_media_info",
            CLASS,
            "Describe the media attached to a message.",
            &[
                ("chat_id", Param::Id, true, "Chat id, @username or phone number"),
                ("message_id", Param::Int, true, "Message id"),
            ],
        ),
        ToolDef::new("get_sticker_sets", CLASS, "List your installed sticker sets.", &[]),
        ToolDef::new(
            "get_gif_search",
            CLASS,
            "Search for GIFs and return their document ids.",
            &[
                ("query", Param::Str, true, "Search text"),
                ("limit", Param::Int, false, "Maximum results (default 10)"),
            ],
        ),
        ToolDef::new(
            "get_user_photos",
            CLASS,
            "List a user's profile photos.",
            &[
                ("user_id", Param::Id, true, "User id or @username"),
                ("limit", Param::Int, false, "Maximum photos (default 10)"),
            ],
        ),
    ]
}

pub(crate) async fn call(gw: &Gateway, name: &str, args: &Args<'_>) -> ToolResult {
    let mode = args.mode(gw);
    match name {
        "get_media_info" => {
            let req = OperationRequest::new("get_media_info")
                .target(args.id("chat_id")?)
                .payload(json!({ "message_id": args.int("message_id")? }));
            let msg = gw.execute(&req, Op::GetMediaInfo, mode).await?;
            match msg.get("media").filter(|m| !m.is_null()) {
                Some(media) => Ok(pretty(&media_info(media))),
                None => Ok("No media found in the specified message.".to_string()),
            }
        }
        "get_sticker_sets" => {
            let req = OperationRequest::new("get_sticker_sets");
            let sets = gw.execute(&req, Op::GetStickerSets, mode).await?;
            let sets: Vec<Value> = sets
                .as_array()
                .map(|items| items.iter().map(sticker_set).collect())
                .unwrap_or_default();
            if sets.is_empty() {
                return Ok("No sticker sets installed.".to_string());
            }
            Ok(pretty(&Value::Array(sets)))
        }
        "get_gif_search" => {
            let req = OperationRequest::new("get_gif_search").payload(json!({
                "query": args.text("query")?,
                "limit": args.limit("limit", 10, 50)?,
            }));
            let ids = gw.execute(&req, Op::GifSearch, mode).await?;
            if ids.as_array().map_or(true, Vec::is_empty) {
                return Ok("No GIFs found.".to_string());
            }
            Ok(pretty(&ids))
        }
        "get_user_photos" => {
            let req = OperationRequest::new("get_user_photos")
                .target(args.id("user_id")?)
                .payload(json!({ "limit": args.limit("limit", 10, 100)? }));
            let photos = gw.execute(&req, Op::GetUserPhotos, mode).await?;
            let photos: Vec<Value> = photos
                .as_array()
                .map(|items| items.iter().map(photo).collect())
                .unwrap_or_default();
            if photos.is_empty() {
                return Ok("No profile photos found.".to_string());
            }
            Ok(pretty(&Value::Array(photos)))
        }
        _ => unknown(name),
    }
}

fn pick_into(src: &Value, dst: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(v) = src.get(*key).filter(|v| !v.is_null()) {
            dst.insert((*key).to_string(), v.clone());
        }
    }
}

fn media_info(media: &Value) -> Value {
    let mut out = Map::new();
    out.insert(
        "type".into(),
        media.get("type").cloned().unwrap_or_else(|| json!("unknown")),
    );
    let inner = media
        .get("document")
        .or_else(|| media.get("photo"))
        .unwrap_or(media);
    pick_into(inner, &mut out, &["id", "mime_type", "size", "file_name"]);
    if let Some(date) = inner.get("date") {
        out.insert("date".into(), format_date(date));
    }
    Value::Object(out)
}

fn sticker_set(set: &Value) -> Value {
    let mut out = Map::new();
    pick_into(set, &mut out, &["id", "title", "short_name", "count"]);
    Value::Object(out)
}

fn photo(p: &Value) -> Value {
    let mut out = Map::new();
    pick_into(p, &mut out, &["id"]);
    if let Some(date) = p.get("date") {
        out.insert("date".into(), format_date(date));
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_info_reads_document_fields() {
        let media = json!({
            "type": "document",
            "document": { "id": 9, "mime_type": "video/mp4", "size": 1024, "date": 0, "access_hash": 1 }
        });
        let info = media_info(&media);
        assert_eq!(info["type"], "document");
        assert_eq!(info["mime_type"], "video/mp4");
        assert_eq!(info["size"], 1024);
        assert_eq!(info["date"], "1970-01-01T00:00:00+00:00");
        assert!(info.get("access_hash").is_none());
    }

    #[test]
    fn photos_keep_only_id_and_date() {
        let p = photo(&json!({ "id": 5, "date": 86_400, "sizes": [1, 2] }));
        assert_eq!(p, json!({ "id": 5, "date": "1970-01-02T00:00:00+00:00" }));
    }
}
