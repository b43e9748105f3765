//! Newline-delimited JSON-RPC 2.0.
//!
//! Requests are handled concurrently; responses are written in completion
//! order, each on its own line.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
};

use tgmcp_core::gateway::Gateway;

use crate::tools;

pub const SERVER_NAME: &str = "telegram";

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

fn respond_ok(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id,
        result: Some(result),
        error: None,
    }
}

fn respond_err(id: Value, code: i64, message: &str) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(json!({ "code": code, "message": message })),
    }
}

pub async fn handle_rpc(gw: &Gateway, req: RpcRequest) -> Option<RpcResponse> {
    // Notifications have no id => no response.
    if req.method.starts_with("notifications/") {
        return None;
    }
    let id = req.id?;

    match req.method.as_str() {
        "initialize" => {
            let proto = req
                .params
                .as_ref()
                .and_then(|p| p.get("protocolVersion"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            Some(respond_ok(
                id,
                json!({
                  "protocolVersion": proto,
                  "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
                  "capabilities": { "tools": {} }
                }),
            ))
        }

        "ping" => Some(respond_ok(id, json!({}))),

        "tools/list" => {
            let list: Vec<Value> = tools::definitions().iter().map(|t| t.to_json()).collect();
            Some(respond_ok(id, json!({ "tools": list })))
        }

        "tools/call" => {
            let Some(params) = req.params.as_ref() else {
                return Some(respond_err(id, -32602, "Missing params"));
            };

            let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let args = params.get("arguments").cloned().unwrap_or(Value::Null);

            match tools::call_tool(gw, name, &args).await {
                Some(reply) => Some(respond_ok(id, reply.to_json())),
                None => Some(respond_err(id, -32602, &format!("Unknown tool: {name}"))),
            }
        }

        _ => Some(respond_err(id, -32601, "Method not found")),
    }
}

/// Serve requests from `reader` until EOF.
pub async fn serve<R, W>(gw: Arc<Gateway>, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<RpcResponse>();

    let write_task = tokio::spawn(async move {
        while let Some(resp) = rx.recv().await {
            let out = serde_json::to_string(&resp)?;
            writer.write_all(out.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        anyhow::Ok(())
    });

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let req = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("skipping unparseable line: {e}");
                continue;
            }
        };

        let gw = Arc::clone(&gw);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(resp) = handle_rpc(&gw, req).await {
                let _ = tx.send(resp);
            }
        });
    }

    // In-flight handlers hold their own senders; the writer ends after the last one.
    drop(tx);
    write_task.await??;
    Ok(())
}

pub async fn serve_stdio(gw: Arc<Gateway>) -> anyhow::Result<()> {
    tracing::info!("telegram MCP server running on stdio");
    serve(gw, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}
