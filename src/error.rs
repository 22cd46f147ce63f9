use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PackError {
    #[error("no transfer descriptors found")]
    NoSourcesFound,

    #[error("failed to open session for {descriptor}: {message}")]
    SessionOpenFailed { descriptor: String, message: String },

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("unsupported archive format: {0}")]
    UnsupportedArchive(String),

    #[error("no content folders")]
    NoContentFoundInArchive,

    #[error("destination unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("could not remove source file {0}")]
    DeleteRetryExhausted(String),

    #[error("transfer engine error: {0}")]
    TransferFault(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to read catalog at {0}")]
    CatalogRead(PathBuf),

    #[error("failed to parse catalog: {0}")]
    CatalogParse(String),

    #[error("invalid content identity: {0}")]
    InvalidIdentity(String),

    #[error("no files selected")]
    EmptySelection,

    #[error("no file with global index {0} in the loaded batch")]
    UnknownFile(usize),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
