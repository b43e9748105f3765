/// Infrastructure error type for the gateway crates.
///
/// Remote-call failures do not use this type: they are classified into
/// [`crate::gateway::Failure`] so every tool can report them uniformly.
/// This enum covers everything around the gateway (config, I/O, adapters).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
