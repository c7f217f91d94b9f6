use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download engine error: {0}")]
    Engine(#[from] hls_dl_engine::EngineError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// File-path-contextualized errors built with `anyhow::Context`, e.g.
    /// "parsing job descriptor file jobs.json: ...".
    #[error("{0}")]
    Context(#[from] anyhow::Error),
}
