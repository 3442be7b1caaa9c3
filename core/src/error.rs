use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    /// Topology construction failure. Fatal: the engine refuses to start.
    #[error("config error: {0}")]
    Config(String),

    #[error("station '{id}' not found")]
    StationNotFound { id: String },

    #[error("line '{shop}-{line}' not found")]
    LineNotFound { shop: String, line: String },

    #[error("buffer '{id}' not found")]
    BufferNotFound { id: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("clock is {state} - operation requires a running engine")]
    NotRunning { state: &'static str },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SimResult<T> = Result<T, SimError>;
