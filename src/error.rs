use datafusion::{arrow::error::ArrowError, error::DataFusionError, parquet::errors::ParquetError};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{message}")]
    Configuration { message: String },

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("Failed to read profile {path}: {source}")]
    ProfileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid profile {path}: {source}")]
    ProfileParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid service account credentials: {message}")]
    Credentials { message: String },

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("API request failed: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("API responded with {status}: {message}")]
    ApiResponse { status: u16, message: String },

    #[error("API returned a malformed paging link '{link}': {source}")]
    PagingLink {
        link: String,
        #[source]
        source: url::ParseError,
    },

    #[error("{message}")]
    Schema { message: String },

    #[error("{message}")]
    Store { message: String },

    #[error("Store request failed: {0}")]
    StoreRequest(#[source] reqwest::Error),

    #[error("The table was modified by another writer since it was read; nothing was written")]
    ConcurrentModification,

    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet: {0}")]
    Parquet(#[from] ParquetError),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], used for the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fetch,
    Store,
    Schema,
    Configuration,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Fetch => 1,
            ErrorKind::Store => 2,
            ErrorKind::Schema | ErrorKind::Configuration => 3,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Fetch => "fetch",
            ErrorKind::Store => "store",
            ErrorKind::Schema => "schema",
            ErrorKind::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

impl Error {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Error::Schema {
            message: message.into(),
        }
    }

    pub(crate) fn store(message: impl Into<String>) -> Self {
        Error::Store {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. }
            | Error::StartDateAfterEndDate { .. }
            | Error::ProfileRead { .. }
            | Error::ProfileParse { .. }
            | Error::Credentials { .. }
            | Error::UrlParsingFailed(_) => ErrorKind::Configuration,
            Error::ApiFailure(_) | Error::ApiResponse { .. } | Error::PagingLink { .. } => {
                ErrorKind::Fetch
            }
            Error::Schema { .. } => ErrorKind::Schema,
            Error::Store { .. }
            | Error::StoreRequest(_)
            | Error::ConcurrentModification
            | Error::DataFusion(_)
            | Error::Arrow(_)
            | Error::Parquet(_)
            | Error::Io(_) => ErrorKind::Store,
        }
    }
}
