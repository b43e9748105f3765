use std::{fs::OpenOptions, path::Path, sync::Mutex};

use tracing_subscriber::{fmt, fmt::writer::MakeWriterExt, EnvFilter};

use crate::{errors::Error, Result};

/// Initialize tracing for the server.
///
/// Logs always go to stderr: stdout carries the JSON-RPC stream. When
/// `log_file` is set, every line is also appended to that file.
pub fn init(service_name: &str, log_file: Option<&Path>) -> Result<()> {
    // Default: info for our crates, warn for everything else.
    // Can be overridden with `RUST_LOG`.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,tgmcp=info,tgmcp_core=info,tgmcp_http=info,tgmcp_mcp=info,{service_name}=info"
        ))
    });

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false);

    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    installed.map_err(|e| Error::External(format!("logging init failed: {e}")))
}
