use std::io;
use std::path::Path;

use thiserror::Error;

use crate::db;
use crate::utils::path_str;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("required binary `{0}` not available to context")]
    MissingBin(String),
    #[error("missing required env var: {0}")]
    MissingEnv(String),

    #[error("{0}")]
    IO(io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(db::Error),

    #[error("command failed with status {0}: {1}")]
    CommandError(i32, String),

    #[error("task was cancelled by user")]
    Cancelled,

    #[error("no adb device connected")]
    NoAdbDevice,
    #[error("adb device {0} not found")]
    AdbDeviceNotFound(String),

    #[error("report error: {0}")]
    Report(String),

    #[error("generic error: {0}")]
    Generic(String),

    #[error("invalid config {0}: {1}")]
    InvalidConfig(String, String),

    #[error("file {0} doesn't exist")]
    MissingFile(String),
}

impl Error {
    pub fn new_generic<S: ToString + ?Sized>(s: &S) -> Self {
        Self::Generic(s.to_string())
    }

    pub fn new_cfg<S: ToString + ?Sized>(path: &Path, s: &S) -> Self {
        Self::InvalidConfig(path_str(path).into_owned(), s.to_string())
    }

    pub fn new_parse<S: ToString + ?Sized>(s: &S) -> Self {
        Self::Parse(s.to_string())
    }
}

impl From<db::Error> for Error {
    fn from(value: db::Error) -> Self {
        Self::Database(value)
    }
}

impl From<quick_xml::de::DeError> for Error {
    fn from(value: quick_xml::de::DeError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(value: csv::Error) -> Self {
        Self::Report(value.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for Error {
    fn from(value: rust_xlsxwriter::XlsxError) -> Self {
        Self::Report(value.to_string())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(value: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Generic(value.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::IO(err)
    }
}
