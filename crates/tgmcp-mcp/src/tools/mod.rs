//! Tool registry and dispatch.
//!
//! Tools are grouped by operation class; every failure is rendered as the
//! user-safe message plus a stable error code, and logged with its detail.

mod chats;
mod contacts;
mod groups;
mod media;
mod messaging;
mod profile;

use std::sync::OnceLock;

use serde_json::{json, Map, Value};

use tgmcp_core::{
    domain::OperationClass,
    gateway::{error_code, CallMode, Failure, Gateway},
};

/// Result of one tool handler: rendered text or a classified failure.
pub(crate) type ToolResult = Result<String, Failure>;

#[derive(Clone, Copy, Debug)]
pub(crate) enum Param {
    /// Chat/user identifier: numeric id, `@username`, phone or link.
    Id,
    Ids,
    Str,
    Int,
    Bool,
    Object,
    /// List of objects, checked field by field by the operation.
    Objects,
}

impl Param {
    fn schema(self) -> Value {
        match self {
            Param::Id => json!({ "type": ["integer", "string"] }),
            Param::Ids => json!({ "type": "array", "items": { "type": ["integer", "string"] } }),
            Param::Str => json!({ "type": "string" }),
            Param::Int => json!({ "type": "integer" }),
            Param::Bool => json!({ "type": "boolean" }),
            Param::Object => json!({ "type": "object" }),
            Param::Objects => json!({ "type": "array", "items": { "type": "object" } }),
        }
    }
}

/// `(name, type, required, description)`
pub(crate) type ParamSpec = (&'static str, Param, bool, &'static str);

#[derive(Clone, Debug)]
pub struct ToolDef {
    pub name: &'static str,
    pub class: OperationClass,
    pub description: &'static str,
    pub input_schema: Value,
}

impl ToolDef {
    pub(crate) fn new(
        name: &'static str,
        class: OperationClass,
        description: &'static str,
        params: &[ParamSpec],
    ) -> Self {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (pname, kind, is_required, desc) in params {
            let mut schema = kind.schema();
            if let Some(obj) = schema.as_object_mut() {
                obj.insert("description".into(), json!(desc));
            }
            properties.insert((*pname).to_string(), schema);
            if *is_required {
                required.push(json!(pname));
            }
        }
        properties.insert(
            WAIT_PARAM.into(),
            json!({
                "type": "boolean",
                "description": "Wait out short flood limits instead of failing at once (default false)",
            }),
        );
        Self {
            name,
            class,
            description,
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

/// Optional on every tool: run in batch mode.
const WAIT_PARAM: &str = "wait";

pub(crate) const PAGE_PARAMS: [ParamSpec; 2] = [
    ("page", Param::Int, false, "1-based page number (default 1)"),
    ("page_size", Param::Int, false, "Items per page (default 20)"),
];

pub fn definitions() -> &'static [ToolDef] {
    static DEFS: OnceLock<Vec<ToolDef>> = OnceLock::new();
    DEFS.get_or_init(|| {
        let mut defs = Vec::new();
        defs.extend(messaging::definitions());
        defs.extend(chats::definitions());
        defs.extend(contacts::definitions());
        defs.extend(groups::definitions());
        defs.extend(media::definitions());
        defs.extend(profile::definitions());
        defs
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolReply {
    pub text: String,
    pub is_error: bool,
}

impl ToolReply {
    pub fn to_json(&self) -> Value {
        json!({
            "content": [{ "type": "text", "text": self.text }],
            "isError": self.is_error,
        })
    }
}

/// Run tool `name`. `None` means no such tool.
pub async fn call_tool(gw: &Gateway, name: &str, args: &Value) -> Option<ToolReply> {
    let def = definitions().iter().find(|d| d.name == name)?;
    let args = Args(args);

    let result = match def.class {
        OperationClass::Messaging => messaging::call(gw, name, &args).await,
        OperationClass::Chats => chats::call(gw, name, &args).await,
        OperationClass::Contacts => contacts::call(gw, name, &args).await,
        OperationClass::Groups => groups::call(gw, name, &args).await,
        OperationClass::Media => media::call(gw, name, &args).await,
        OperationClass::Profile => profile::call(gw, name, &args).await,
        OperationClass::Lookup => unknown(name),
    };

    Some(match result {
        Ok(text) => ToolReply {
            text,
            is_error: false,
        },
        Err(failure) => {
            let code = error_code(def.class, name);
            tracing::error!(
                tool = name,
                code = %code,
                kind = %failure.kind,
                "tool failed: {}",
                failure.detail
            );
            ToolReply {
                text: format!("{} (code: {code})", failure.message),
                is_error: true,
            }
        }
    })
}

pub(crate) fn unknown(name: &str) -> ToolResult {
    Err(Failure::invalid(format!("Unknown tool: {name}")))
}

/// Typed access to tool arguments. Every miss is `InvalidArgument`.
pub(crate) struct Args<'a>(pub(crate) &'a Value);

impl Args<'_> {
    fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// A chat/user reference as a raw identifier string.
    pub(crate) fn id(&self, key: &str) -> Result<String, Failure> {
        match self.get(key) {
            Some(Value::Number(n)) if n.is_i64() => Ok(n.to_string()),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Some(_) => Err(Failure::invalid(format!(
                "'{key}' must be a chat id, username or phone number."
            ))),
            None => Err(Failure::invalid(format!("'{key}' is required."))),
        }
    }

    pub(crate) fn ids(&self, key: &str) -> Result<Vec<String>, Failure> {
        let Some(Value::Array(items)) = self.get(key) else {
            return Err(Failure::invalid(format!("'{key}' must be a list of ids.")));
        };
        if items.is_empty() {
            return Err(Failure::invalid(format!("'{key}' must not be empty.")));
        }
        items
            .iter()
            .map(|item| match item {
                Value::Number(n) if n.is_i64() => Ok(n.to_string()),
                Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
                _ => Err(Failure::invalid(format!(
                    "'{key}' must contain only ids or usernames."
                ))),
            })
            .collect()
    }

    /// Like `ids`, but absent or empty means no ids.
    pub(crate) fn opt_ids(&self, key: &str) -> Result<Vec<String>, Failure> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) if items.is_empty() => Ok(Vec::new()),
            Some(_) => self.ids(key),
        }
    }

    pub(crate) fn objects(&self, key: &str) -> Result<Value, Failure> {
        match self.get(key) {
            Some(Value::Array(items)) if items.iter().all(Value::is_object) => {
                Ok(Value::Array(items.clone()))
            }
            _ => Err(Failure::invalid(format!("'{key}' must be a list of objects."))),
        }
    }

    pub(crate) fn text(&self, key: &str) -> Result<String, Failure> {
        match self.get(key).and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
            _ => Err(Failure::invalid(format!("'{key}' is required."))),
        }
    }

    pub(crate) fn opt_text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(Value::as_str).map(str::to_string)
    }

    pub(crate) fn int(&self, key: &str) -> Result<i64, Failure> {
        self.get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| Failure::invalid(format!("'{key}' must be an integer.")))
    }

    pub(crate) fn int_or(&self, key: &str, default: i64) -> Result<i64, Failure> {
        match self.get(key) {
            None => Ok(default),
            Some(_) => self.int(key),
        }
    }

    /// Positive limit, defaulted and clamped to `max`.
    pub(crate) fn limit(&self, key: &str, default: i64, max: i64) -> Result<i64, Failure> {
        let v = self.int_or(key, default)?;
        if v < 1 {
            return Err(Failure::invalid(format!("'{key}' must be 1 or greater.")));
        }
        Ok(v.min(max))
    }

    pub(crate) fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub(crate) fn object(&self, key: &str) -> Result<Option<Value>, Failure> {
        match self.get(key) {
            None => Ok(None),
            Some(v @ Value::Object(_)) => Ok(Some(v.clone())),
            Some(_) => Err(Failure::invalid(format!("'{key}' must be an object."))),
        }
    }

    pub(crate) fn page(&self) -> Result<(i64, i64), Failure> {
        Ok((self.int_or("page", 1)?, self.int_or("page_size", 20)?))
    }

    /// Batch mode when the caller asked to wait, interactive otherwise.
    pub(crate) fn mode(&self, gw: &Gateway) -> CallMode {
        if self.bool_or(WAIT_PARAM, false) {
            gw.batch()
        } else {
            gw.interactive()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn tool_names_are_unique_and_schemas_are_objects() {
        let mut seen = HashSet::new();
        for def in definitions() {
            assert!(seen.insert(def.name), "duplicate tool {}", def.name);
            assert_eq!(def.input_schema["type"], "object");
            assert!(!def.description.is_empty());
        }
    }

    #[test]
    fn every_class_module_contributes_tools() {
        for class in [
            OperationClass::Messaging,
            OperationClass::Chats,
            OperationClass::Contacts,
            OperationClass::Groups,
            OperationClass::Media,
            OperationClass::Profile,
        ] {
            assert!(definitions().iter().any(|d| d.class == class), "{class}");
        }
    }

    #[test]
    fn args_accept_numeric_and_textual_ids() {
        let v = json!({ "a": 12, "b": " @news ", "c": 1.5, "d": ["x", 3] });
        let args = Args(&v);
        assert_eq!(args.id("a").unwrap(), "12");
        assert_eq!(args.id("b").unwrap(), "@news");
        assert!(args.id("c").is_err());
        assert!(args.id("missing").is_err());
        assert_eq!(args.ids("d").unwrap(), vec!["x", "3"]);
        assert!(args.opt_ids("missing").unwrap().is_empty());
        assert_eq!(args.opt_ids("d").unwrap(), vec!["x", "3"]);
    }

    #[test]
    fn objects_must_all_be_objects() {
        let v = json!({ "ok": [{ "a": 1 }], "mixed": [{ "a": 1 }, 2], "scalar": 3 });
        let args = Args(&v);
        assert_eq!(args.objects("ok").unwrap(), json!([{ "a": 1 }]));
        assert!(args.objects("mixed").is_err());
        assert!(args.objects("scalar").is_err());
        assert!(args.objects("missing").is_err());
    }

    #[test]
    fn every_tool_accepts_an_optional_wait_flag() {
        for def in definitions() {
            assert_eq!(def.input_schema["properties"]["wait"]["type"], "boolean", "{}", def.name);
            let required = def.input_schema["required"].as_array().unwrap();
            assert!(!required.contains(&json!("wait")), "{}", def.name);
        }
    }

    #[test]
    fn limit_rejects_zero_and_clamps() {
        let v = json!({ "zero": 0, "big": 10_000 });
        let args = Args(&v);
        assert!(args.limit("zero", 20, 100).is_err());
        assert_eq!(args.limit("big", 20, 100).unwrap(), 100);
        assert_eq!(args.limit("absent", 20, 100).unwrap(), 20);
    }
}
