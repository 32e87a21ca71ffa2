use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message stored in the genesis block of every fresh ledger.
pub const GENESIS_MESSAGE: &str = "Genesis Block - File Sharing System";

/// Reasons a transaction is rejected before it is sealed into a block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid version {version}: versions start at 1")]
    InvalidVersion { version: u32 },
}

/// A file upload event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUpload {
    /// Display name (already version-suffixed, e.g. `report_v2.txt`).
    pub file_name: String,
    /// Hex SHA-256 of the stored bytes; the file's identity everywhere.
    pub file_hash: String,
    pub file_size: u64,
    pub uploader: String,
    /// Storage path or handle of the blob, opaque to the ledger.
    pub file_path: String,
    pub is_encrypted: bool,
    /// Base64 key-derivation salt when `is_encrypted` is set.
    #[serde(default)]
    pub salt: Option<String>,
    pub version: u32,
    #[serde(default)]
    pub previous_version_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A successful, authorized file download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDownload {
    pub file_name: String,
    pub file_hash: String,
    pub downloader: String,
    pub timestamp: DateTime<Utc>,
}

/// Block payload. Every block carries exactly one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transaction {
    FileUpload(FileUpload),
    FileDownload(FileDownload),
    Genesis { message: String },
}

impl FileUpload {
    /// Build an upload event stamped with the current time.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_name: impl Into<String>,
        file_hash: impl Into<String>,
        file_size: u64,
        uploader: impl Into<String>,
        file_path: impl Into<String>,
        is_encrypted: bool,
        salt: Option<String>,
        version: u32,
        previous_version_hash: Option<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_hash: file_hash.into(),
            file_size,
            uploader: uploader.into(),
            file_path: file_path.into(),
            is_encrypted,
            salt,
            version,
            previous_version_hash,
            timestamp: Utc::now(),
        }
    }

    /// Extension after the last `.`, or `"unknown"` when there is none.
    pub fn extension(&self) -> &str {
        file_extension(&self.file_name)
    }
}

impl FileDownload {
    pub fn new(
        file_name: impl Into<String>,
        file_hash: impl Into<String>,
        downloader: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_hash: file_hash.into(),
            downloader: downloader.into(),
            timestamp: Utc::now(),
        }
    }
}

impl Transaction {
    pub fn genesis() -> Self {
        Transaction::Genesis {
            message: GENESIS_MESSAGE.to_string(),
        }
    }

    /// Short label matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::FileUpload(_) => "file_upload",
            Transaction::FileDownload(_) => "file_download",
            Transaction::Genesis { .. } => "genesis",
        }
    }

    /// Reject malformed transactions before they are sealed.
    pub fn validate(&self) -> Result<(), TransactionError> {
        match self {
            Transaction::FileUpload(upload) => {
                require("file_name", &upload.file_name)?;
                require("file_hash", &upload.file_hash)?;
                require("uploader", &upload.uploader)?;
                if upload.version == 0 {
                    return Err(TransactionError::InvalidVersion {
                        version: upload.version,
                    });
                }
                Ok(())
            }
            Transaction::FileDownload(download) => {
                require("file_name", &download.file_name)?;
                require("file_hash", &download.file_hash)?;
                require("downloader", &download.downloader)
            }
            Transaction::Genesis { message } => require("message", message),
        }
    }
}

impl From<FileUpload> for Transaction {
    fn from(upload: FileUpload) -> Self {
        Transaction::FileUpload(upload)
    }
}

impl From<FileDownload> for Transaction {
    fn from(download: FileDownload) -> Self {
        Transaction::FileDownload(download)
    }
}

/// Extension after the last `.` of a file name, or `"unknown"`.
pub fn file_extension(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => "unknown",
    }
}

fn require(field: &'static str, value: &str) -> Result<(), TransactionError> {
    if value.trim().is_empty() {
        return Err(TransactionError::MissingField { field });
    }
    Ok(())
}
