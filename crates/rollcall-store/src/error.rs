use rollcall_core::RosterError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write image: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid roster: {0}")]
    Roster(#[from] RosterError),
    #[error("student id {0} is already enrolled")]
    DuplicateStudent(String),
    #[error("a student named {0:?} is already enrolled")]
    DuplicateName(String),
    #[error("student not found: {0}")]
    StudentNotFound(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("{field} must not be blank")]
    Blank { field: &'static str },
    #[error("{0:?} cannot be used as a file name")]
    InvalidPathComponent(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
