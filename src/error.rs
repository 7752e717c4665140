use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Input retrieval failed: network, non-success response or local write.
    #[error("Input fetch error: {0}")]
    Fetch(String),

    /// The encoding engine exited with an error or produced malformed output.
    #[error("Encoding error: {0}")]
    Encode(String),

    /// The coordinator rejected or never received the result submission.
    #[error("Result report error: {0}")]
    Report(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RunnerError {
    /// Short machine-friendly label, used in failure reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RunnerError::Io(_) => "io",
            RunnerError::Json(_) => "json",
            RunnerError::Toml(_) => "toml",
            RunnerError::Fetch(_) => "fetch",
            RunnerError::Encode(_) => "encode",
            RunnerError::Report(_) => "report",
            RunnerError::Cancelled => "cancelled",
            RunnerError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
