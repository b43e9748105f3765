use std::sync::Arc;

use tgmcp_core::{config::Config, gateway::Gateway};
use tgmcp_http::HttpConnection;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;
    tgmcp_core::logging::init("tgmcp", cfg.log_file.as_deref())?;

    let conn = HttpConnection::new(&cfg)?;
    tracing::info!(
        bridge = %cfg.bridge_url,
        session = ?cfg.session,
        "connecting through Telegram bridge"
    );

    let gateway = Arc::new(Gateway::new(Arc::new(conn), cfg.gateway.clone()));
    tgmcp_mcp::serve_stdio(gateway).await
}
