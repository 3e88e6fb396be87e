use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ArchiveError {
    #[error("configuration error: {0}")]
    #[diagnostic(help("set ZENODO_ACCESS_TOKEN or add access_token to labarchive.json"))]
    Configuration(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("Zenodo request failed: {0}")]
    ArchiveHttp(String),

    #[error("Zenodo returned status {status}: {body}")]
    ArchiveService { status: u16, body: String },

    #[error("download request failed: {0}")]
    TransferHttp(String),

    #[error("download of {url} returned status {status}")]
    Transfer { status: u16, url: String },

    #[error("{0}")]
    RegistryNotFound(String),

    #[error("failed to parse registry: {0}")]
    RegistryParse(String),

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid checksum (expected <algorithm>:<hex>): {0}")]
    InvalidChecksum(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
