//! MCP server surface: JSON-RPC over stdio and the Telegram tool set.
//!
//! Every tool is a thin caller of [`tgmcp_core::gateway::Gateway`]; this crate
//! only validates arguments and renders results.

pub mod format;
pub mod protocol;
pub mod tools;

pub use protocol::{handle_rpc, serve, serve_stdio, RpcRequest, RpcResponse};
pub use tools::{call_tool, definitions, ToolDef, ToolReply};
