//! Read-side views folded over the block sequence.
//!
//! Every function here is a single linear pass over `&[Block]` with no side
//! effects; [`crate::Ledger`] exposes them as methods and caches the hot ones.

use chrono::{DateTime, Timelike, Utc};
use fileledger_types::{file_extension, Block, FileUpload, Hash, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Default length of the top-uploader/top-downloader lists.
pub const DEFAULT_TOP_N: usize = 10;

/// Marker separating a base file name from its version number.
pub const VERSION_MARKER: &str = "_v";

/// Latest known metadata for an uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_name: String,
    pub file_hash: Hash,
    pub file_size: u64,
    pub uploader: String,
    pub file_path: String,
    pub is_encrypted: bool,
    pub salt: Option<String>,
    pub version: u32,
    pub previous_version_hash: Option<Hash>,
    pub timestamp: DateTime<Utc>,
    /// Index of the block that recorded this upload.
    pub block_index: u64,
}

impl FileRecord {
    fn from_upload(upload: &FileUpload, block_index: u64) -> Self {
        Self {
            file_name: upload.file_name.clone(),
            file_hash: upload.file_hash.clone(),
            file_size: upload.file_size,
            uploader: upload.uploader.clone(),
            file_path: upload.file_path.clone(),
            is_encrypted: upload.is_encrypted,
            salt: upload.salt.clone(),
            version: upload.version,
            previous_version_hash: upload.previous_version_hash.clone(),
            timestamp: upload.timestamp,
            block_index,
        }
    }

    pub fn extension(&self) -> &str {
        file_extension(&self.file_name)
    }
}

/// One entry of a file's version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub file_name: String,
    pub file_hash: Hash,
    pub version: u32,
    pub uploader: String,
    pub timestamp: DateTime<Utc>,
    pub block_index: u64,
}

/// Version number and stored name to use for a new upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPlan {
    pub version: u32,
    pub previous_version_hash: Option<Hash>,
    /// `report.txt` for a first upload, `report_v3.txt` for the third.
    pub stored_name: String,
}

/// Chain-wide counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStats {
    pub total_blocks: usize,
    pub total_uploads: usize,
    pub total_downloads: usize,
    pub unique_uploaders: usize,
    pub unique_downloaders: usize,
    pub total_storage_bytes: u64,
    pub encrypted_files: usize,
    pub is_valid: bool,
    pub difficulty: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounts {
    pub uploads: u64,
    pub downloads: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    /// `YYYY-MM-DD`, UTC.
    pub date: String,
    #[serde(flatten)]
    pub counts: ActivityCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyActivity {
    /// Hour of day, 0-23, UTC.
    pub hour: u32,
    #[serde(flatten)]
    pub counts: ActivityCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCount {
    pub user: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTypeCount {
    #[serde(rename = "type")]
    pub extension: String,
    pub count: u64,
}

/// Activity breakdown for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analytics {
    pub activity_timeline: Vec<DailyActivity>,
    pub hourly_activity: Vec<HourlyActivity>,
    pub top_uploaders: Vec<UserCount>,
    pub top_downloaders: Vec<UserCount>,
    pub file_type_distribution: Vec<FileTypeCount>,
}

/// Filters for [`search`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileQuery {
    /// Case-insensitive substring of the file name.
    pub text: Option<String>,
    /// Case-insensitive substring of the uploader.
    pub uploader: Option<String>,
    /// Exact extension, compared case-insensitively.
    pub extension: Option<String>,
    pub encrypted_only: bool,
}

impl FileQuery {
    pub fn matches(&self, file: &FileRecord) -> bool {
        if let Some(text) = non_empty(&self.text) {
            if !file.file_name.to_lowercase().contains(&text.to_lowercase()) {
                return false;
            }
        }
        if let Some(uploader) = non_empty(&self.uploader) {
            if !file.uploader.to_lowercase().contains(&uploader.to_lowercase()) {
                return false;
            }
        }
        if let Some(extension) = non_empty(&self.extension) {
            if !file.extension().eq_ignore_ascii_case(extension) {
                return false;
            }
        }
        !(self.encrypted_only && !file.is_encrypted)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Latest upload per content hash; later blocks overwrite earlier ones.
pub fn files_by_hash(chain: &[Block]) -> BTreeMap<Hash, FileRecord> {
    let mut files = BTreeMap::new();
    for block in chain {
        if let Transaction::FileUpload(upload) = &block.payload {
            files.insert(
                upload.file_hash.clone(),
                FileRecord::from_upload(upload, block.index),
            );
        }
    }
    files
}

/// Files ordered by the block that last recorded them.
pub fn files_in_chain_order(index: &BTreeMap<Hash, FileRecord>) -> Vec<FileRecord> {
    let mut files: Vec<FileRecord> = index.values().cloned().collect();
    files.sort_by_key(|file| file.block_index);
    files
}

/// Base name shared by every version of `file_name`: the part before the
/// first `_v` marker.
pub fn version_base(file_name: &str) -> &str {
    file_name
        .split(VERSION_MARKER)
        .next()
        .unwrap_or(file_name)
}

/// Every upload whose name shares `file_name`'s base, newest version first.
pub fn file_versions(chain: &[Block], file_name: &str) -> Vec<VersionEntry> {
    let base = version_base(file_name);
    let mut versions: Vec<VersionEntry> = chain
        .iter()
        .filter_map(|block| match &block.payload {
            Transaction::FileUpload(upload) if upload.file_name.starts_with(base) => {
                Some(VersionEntry {
                    file_name: upload.file_name.clone(),
                    file_hash: upload.file_hash.clone(),
                    version: upload.version,
                    uploader: upload.uploader.clone(),
                    timestamp: upload.timestamp,
                    block_index: block.index,
                })
            }
            _ => None,
        })
        .collect();
    versions.sort_by(|a, b| b.version.cmp(&a.version));
    versions
}

/// Split `name` into stem and extension (with its dot); dotfiles have no extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Decide the version number and stored name for a new upload of `file_name`.
pub fn next_version(chain: &[Block], file_name: &str) -> VersionPlan {
    let (stem, extension) = split_extension(file_name);
    let base = version_base(stem);

    let latest = files_by_hash(chain)
        .into_values()
        .filter(|file| file.file_name.starts_with(base))
        .max_by_key(|file| (file.version, file.block_index));

    match latest {
        Some(previous) => {
            let version = previous.version.saturating_add(1);
            VersionPlan {
                version,
                previous_version_hash: Some(previous.file_hash),
                stored_name: format!("{base}{VERSION_MARKER}{version}{extension}"),
            }
        }
        None => VersionPlan {
            version: 1,
            previous_version_hash: None,
            stored_name: file_name.to_string(),
        },
    }
}

/// Counters over the whole chain. `is_valid` is supplied by the caller.
pub fn chain_stats(chain: &[Block], difficulty: u32, is_valid: bool) -> ChainStats {
    let mut uploaders = BTreeSet::new();
    let mut downloaders = BTreeSet::new();
    let mut total_uploads = 0;
    let mut total_downloads = 0;
    let mut total_storage_bytes = 0u64;
    let mut encrypted_files = 0;

    for block in chain {
        match &block.payload {
            Transaction::FileUpload(upload) => {
                total_uploads += 1;
                uploaders.insert(upload.uploader.as_str());
                total_storage_bytes = total_storage_bytes.saturating_add(upload.file_size);
                if upload.is_encrypted {
                    encrypted_files += 1;
                }
            }
            Transaction::FileDownload(download) => {
                total_downloads += 1;
                downloaders.insert(download.downloader.as_str());
            }
            Transaction::Genesis { .. } => {}
        }
    }

    ChainStats {
        total_blocks: chain.len(),
        total_uploads,
        total_downloads,
        unique_uploaders: uploaders.len(),
        unique_downloaders: downloaders.len(),
        total_storage_bytes,
        encrypted_files,
        is_valid,
        difficulty,
    }
}

/// Activity buckets, top users and the extension histogram.
pub fn analytics(chain: &[Block], top_n: usize) -> Analytics {
    let mut by_date: BTreeMap<String, ActivityCounts> = BTreeMap::new();
    let mut by_hour: BTreeMap<u32, ActivityCounts> = BTreeMap::new();
    let mut uploaders: HashMap<&str, u64> = HashMap::new();
    let mut downloaders: HashMap<&str, u64> = HashMap::new();
    let mut file_types: HashMap<&str, u64> = HashMap::new();

    for block in chain {
        match &block.payload {
            Transaction::FileUpload(upload) => {
                let date = upload.timestamp.format("%Y-%m-%d").to_string();
                by_date.entry(date).or_default().uploads += 1;
                by_hour.entry(upload.timestamp.hour()).or_default().uploads += 1;
                *uploaders.entry(upload.uploader.as_str()).or_default() += 1;
                *file_types.entry(upload.extension()).or_default() += 1;
            }
            Transaction::FileDownload(download) => {
                let date = download.timestamp.format("%Y-%m-%d").to_string();
                by_date.entry(date).or_default().downloads += 1;
                by_hour.entry(download.timestamp.hour()).or_default().downloads += 1;
                *downloaders.entry(download.downloader.as_str()).or_default() += 1;
            }
            Transaction::Genesis { .. } => {}
        }
    }

    Analytics {
        activity_timeline: by_date
            .into_iter()
            .map(|(date, counts)| DailyActivity { date, counts })
            .collect(),
        hourly_activity: by_hour
            .into_iter()
            .map(|(hour, counts)| HourlyActivity { hour, counts })
            .collect(),
        top_uploaders: ranked(uploaders, Some(top_n))
            .into_iter()
            .map(|(user, count)| UserCount { user, count })
            .collect(),
        top_downloaders: ranked(downloaders, Some(top_n))
            .into_iter()
            .map(|(user, count)| UserCount { user, count })
            .collect(),
        file_type_distribution: ranked(file_types, None)
            .into_iter()
            .map(|(extension, count)| FileTypeCount { extension, count })
            .collect(),
    }
}

/// Count descending, ties broken by key so output is stable.
fn ranked(counts: HashMap<&str, u64>, limit: Option<usize>) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts
        .into_iter()
        .map(|(key, count)| (key.to_string(), count))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    entries
}

/// Files matching `query`, in chain order.
pub fn search(index: &BTreeMap<Hash, FileRecord>, query: &FileQuery) -> Vec<FileRecord> {
    files_in_chain_order(index)
        .into_iter()
        .filter(|file| query.matches(file))
        .collect()
}
