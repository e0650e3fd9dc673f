mod bucket;
mod entity;
mod hasher;
mod mime;
mod path;

pub use bucket::*;
pub use entity::*;
pub use hasher::*;
pub use mime::*;
pub use path::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MosError {
    #[error("internal error: {0}")]
    Internal(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("file already exists: {0}")]
    FileExists(String),
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("type mismatch: expected {0}, got {1}")]
    TypeMismatch(String, String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("db error: {0}")]
    DbError(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid param: {0}")]
    InvalidParam(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("aggregate error: [{}]", join_errors(.0))]
    Aggregate(Vec<MosError>),
}

fn join_errors(errors: &[MosError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl MosError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MosError::FileNotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, MosError::FileExists(_))
    }
}

impl From<std::io::Error> for MosError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            MosError::FileNotFound(err.to_string())
        } else {
            MosError::IoError(err.to_string())
        }
    }
}

pub type MosResult<T> = std::result::Result<T, MosError>;
