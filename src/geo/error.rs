use crate::geo::SlotKind;

use hyper::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The decoder refused to open a database file
#[derive(Error, Debug)]
pub enum OpenError {
    #[error(r#"Error while attempting to read database "{path}": {error}"#)]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error(r#"File "{path}" is not a valid database: {reason}"#)]
    Format { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
#[error("Error while decoding record: {0}")]
pub struct DecodeError(pub String);

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error("Slot is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    #[error(transparent)]
    Http(#[from] hyper::http::Error),
    #[error("Non-success status code: {0}")]
    NonSuccess(StatusCode),
    #[error("Too many redirects, last status code: {0}")]
    TooManyRedirects(StatusCode),
    #[error("Download did not finish in {0:?}")]
    Timeout(Duration),
    #[error(r#"Error while writing "{path}": {error}"#)]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
}

impl From<StatusCode> for FetchError {
    fn from(status_code: StatusCode) -> Self {
        FetchError::NonSuccess(status_code)
    }
}

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Downloaded file is invalid: {0}")]
    Validation(#[source] OpenError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(r#"Error while replacing "{path}": {error}"#)]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error(transparent)]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
#[error(r#"Failed to initialize "{slot}" database: {source}"#)]
pub struct InitError {
    pub slot: SlotKind,
    #[source]
    pub source: RefreshError,
}

/// The only outcomes a lookup caller ever observes besides a record
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    #[error("invalid IP address")]
    InvalidAddress,
    #[error("IP not found in database")]
    NotFound,
    #[error("database not ready")]
    NotReady,
}
