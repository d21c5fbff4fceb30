use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LSError {
    // Standard errors with From implementations
    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("String UTF8 error: {0}")]
    StringUtf8(#[from] std::string::FromUtf8Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    // Tree-sitter errors
    #[error("Tree-sitter language error: {0}")]
    TreeSitterLanguage(#[from] tree_sitter::LanguageError),

    #[error("Tree-sitter parse failed")]
    TreeSitterParse,

    // Run errors
    #[error("Command spawn failed: {0}")]
    CommandSpawn(String),

    #[error("Unknown run mode: {0}")]
    UnknownRunMode(String),

    #[error("Run mode `{0}` needs a document")]
    MissingDocument(String),

    // Protocol and configuration errors
    #[error("Not a file URI: {0}")]
    InvalidUri(String),

    #[error("Malformed message header: {0}")]
    MalformedHeader(String),

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),
}
