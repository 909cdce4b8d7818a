use std::path::PathBuf;

use thiserror::Error;

/// Failures that stop a patch. Each maps to the exit code the calling shell expects.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("save file not found: {path}")]
    SaveNotFound {
        path: PathBuf,
        suggestion: Option<PathBuf>,
    },
    #[error("cancelled by user")]
    Cancelled,
    #[error("entity `Type {0}` not found")]
    EntityNotFound(String),
    #[error("`Type {entity}` on line {line} is not inside any block")]
    EnclosingBlockMissing { entity: String, line: usize },
    #[error("identifier fields {missing} missing from the {entity} block")]
    IdentifiersMissing { entity: String, missing: String },
    #[error("anchor field `{key}` missing from the {entity} block")]
    AnchorMissing { entity: String, key: String },
    #[error("malformed document at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("document is not valid UTF-8")]
    InvalidUtf8,
    #[error(
        "refusing to write: {new_len} bytes is below 75% of the original {original_len} bytes"
    )]
    RegressionGuard { original_len: usize, new_len: usize },
    #[error("writing {path} failed: {reason}; {rollback}")]
    Write {
        path: PathBuf,
        reason: String,
        rollback: String,
    },
    #[error("no backup #{index} for {path}")]
    BackupNotFound { path: PathBuf, index: usize },
}

impl PatchError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PatchError::SaveNotFound { .. } | PatchError::Cancelled => 1,
            PatchError::EntityNotFound(_) | PatchError::EnclosingBlockMissing { .. } => 2,
            PatchError::IdentifiersMissing { .. } => 3,
            PatchError::AnchorMissing { .. } => 4,
            PatchError::Malformed { .. } | PatchError::InvalidUtf8 => 5,
            PatchError::RegressionGuard { .. } => 6,
            PatchError::Write { .. } => 7,
            PatchError::BackupNotFound { .. } => 1,
        }
    }

    pub(crate) fn malformed(line_idx: usize, reason: impl Into<String>) -> Self {
        PatchError::Malformed {
            line: line_idx + 1,
            reason: reason.into(),
        }
    }
}
