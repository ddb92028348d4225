use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("TOML Parsing Error: {0}")]
    TomlParse(String),

    #[error("JSON Serialization Error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("YAML Parsing Error: {0}")]
    YamlError(#[from] serde_yml::Error),

    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File Read Error: Path '{path}', Error: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File Write Error: Path '{path}', Error: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ignore Error: {0}")]
    Ignore(#[from] ignore::Error),

    #[error("Glob Pattern Error: {0}")]
    Glob(String),

    #[error("Invalid Argument: {0}")]
    InvalidArgument(String),

    #[error("TikToken Error: {0}")]
    TikToken(String),

    #[error("Request Document Error: {0}")]
    RequestDocument(String),

    #[error("Missing Credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API Error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Stream Error: {0}")]
    Stream(String),

    #[error("Context Limit Exceeded: {tokens} input tokens exceed the limit of {limit}")]
    ContextLimit { tokens: usize, limit: usize },
}

impl From<globset::Error> for AppError {
    fn from(err: globset::Error) -> Self {
        AppError::Glob(format!("Globset error: {}", err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::TomlParse(err.to_string())
    }
}
