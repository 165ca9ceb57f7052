//! Error types for the rebase engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RebaseError {
    #[error("Git error: {0}")]
    GitError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Options error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Malformed todo: {0}")]
    TodoError(String),

    #[error("{0}")]
    PreconditionError(String),

    #[error("Editor error: {0}")]
    EditorError(String),
}
