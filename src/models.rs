use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/* ----------------------------- enums & models ----------------------------- */

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Queued,
    Downloading,
    Paused,
    Cancelled,
    Completed,
    Error,
    Removed,
    Deleted,
    Invalid,
}

impl Status {
    pub const ALL: [Status; 9] = [
        Status::Queued,
        Status::Downloading,
        Status::Paused,
        Status::Cancelled,
        Status::Completed,
        Status::Error,
        Status::Removed,
        Status::Deleted,
        Status::Invalid,
    ];

    /// Token persisted in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued      => "queued",
            Status::Downloading => "downloading",
            Status::Paused      => "paused",
            Status::Cancelled   => "cancelled",
            Status::Completed   => "completed",
            Status::Error       => "error",
            Status::Removed     => "removed",
            Status::Deleted     => "deleted",
            Status::Invalid     => "invalid",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "queued"            => Status::Queued,
            "downloading"       => Status::Downloading,
            "paused"            => Status::Paused,
            "cancelled"         => Status::Cancelled,
            "completed"         => Status::Completed,
            "error"             => Status::Error,
            "removed"           => Status::Removed,
            "deleted"           => Status::Deleted,
            _                   => Status::Invalid,             // Unknown tokens never pass the state machine
        }
    }
}

/// Failure codes reported to callbacks and listeners.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    None,
    Unknown,
    RequestAlreadyExist,
    RequestNotFoundInDatabase,
    NoNetworkConnection,
    ConnectionTimedOut,
    HttpNotFound,
    EmptyResponseFromServer,
    FileNotCreated,
    WriteFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::None                      => "none",
            ErrorKind::Unknown                   => "unknown",
            ErrorKind::RequestAlreadyExist       => "request_already_exist",
            ErrorKind::RequestNotFoundInDatabase => "request_not_found_in_database",
            ErrorKind::NoNetworkConnection       => "no_network_connection",
            ErrorKind::ConnectionTimedOut        => "connection_timed_out",
            ErrorKind::HttpNotFound              => "http_not_found",
            ErrorKind::EmptyResponseFromServer   => "empty_response_from_server",
            ErrorKind::FileNotCreated            => "file_not_created",
            ErrorKind::WriteFailed               => "write_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorKind {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "none"                          => ErrorKind::None,
            "request_already_exist"         => ErrorKind::RequestAlreadyExist,
            "request_not_found_in_database" => ErrorKind::RequestNotFoundInDatabase,
            "no_network_connection"         => ErrorKind::NoNetworkConnection,
            "connection_timed_out"          => ErrorKind::ConnectionTimedOut,
            "http_not_found"                => ErrorKind::HttpNotFound,
            "empty_response_from_server"    => ErrorKind::EmptyResponseFromServer,
            "file_not_created"              => ErrorKind::FileNotCreated,
            "write_failed"                  => ErrorKind::WriteFailed,
            _                               => ErrorKind::Unknown,
        }
    }
}

/// Scheduling hint for the transfer worker; higher runs first.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Value persisted in the `priority` column.
    pub fn value(&self) -> i64 {
        match self {
            Priority::Low    => -1,
            Priority::Normal => 0,
            Priority::High   => 1,
        }
    }
}

impl From<i64> for Priority {
    fn from(v: i64) -> Self {
        match v {
            i64::MIN..=-1 => Priority::Low,
            0             => Priority::Normal,
            _             => Priority::High,
        }
    }
}

/// Networks a request may transfer on.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkType {
    #[default]
    All,
    WifiOnly,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::All      => "all",
            NetworkType::WifiOnly => "wifi_only",
        }
    }

    /// Whether a transfer may run given the current connectivity.
    pub fn allows(&self, available: bool, on_wifi: bool) -> bool {
        match self {
            NetworkType::All      => available,
            NetworkType::WifiOnly => available && on_wifi,
        }
    }
}

impl From<String> for NetworkType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "wifi_only" => NetworkType::WifiOnly,
            _           => NetworkType::All,
        }
    }
}

/// A download request as handed in by the caller. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: i64,
    pub url: String,
    pub file_path: String,
    #[serde(default)]
    pub group_id: String,
    /// Symbolic name, e.g. for display.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub network_type: NetworkType,
}

impl Request {
    /// Build a request whose id is derived from `url` and `file_path`.
    pub fn new(url: impl Into<String>, file_path: impl Into<String>) -> Self {
        let url = url.into();
        let file_path = file_path.into();
        let id = derive_id(&url, &file_path);
        Self::with_id(id, url, file_path)
    }

    pub fn with_id(id: i64, url: impl Into<String>, file_path: impl Into<String>) -> Self {
        Request {
            id,
            url: url.into(),
            file_path: file_path.into(),
            group_id: String::new(),
            name: String::new(),
            headers: BTreeMap::new(),
            priority: Priority::Normal,
            network_type: NetworkType::All,
        }
    }

    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn network_type(mut self, network_type: NetworkType) -> Self {
        self.network_type = network_type;
        self
    }

    /// Reject malformed input before anything touches the repository.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.url.trim().is_empty() {
            return Err(FetchError::InvalidRequest {
                id: self.id,
                reason: "url is empty".into(),
            });
        }
        if !Path::new(&self.file_path).is_absolute() {
            return Err(FetchError::InvalidRequest {
                id: self.id,
                reason: format!("file path '{}' is not absolute", self.file_path),
            });
        }
        Ok(())
    }
}

/// Persisted state of a request plus live progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub id: i64,
    pub url: String,
    pub file_path: String,
    pub group_id: String,
    pub name: String,
    pub headers: BTreeMap<String, String>,
    pub priority: Priority,
    pub network_type: NetworkType,
    pub status: Status,
    pub error: ErrorKind,
    pub downloaded_bytes: u64,
    /// `None` while the server has not reported a size.
    pub total_bytes: Option<u64>,
    /// Unix millis.
    pub created_at: i64,
}

impl DownloadRecord {
    /// Fresh `QUEUED` record for a request.
    pub fn queued(request: &Request) -> Self {
        DownloadRecord {
            id: request.id,
            url: request.url.clone(),
            file_path: request.file_path.clone(),
            group_id: request.group_id.clone(),
            name: request.name.clone(),
            headers: request.headers.clone(),
            priority: request.priority,
            network_type: request.network_type,
            status: Status::Queued,
            error: ErrorKind::None,
            downloaded_bytes: 0,
            total_bytes: None,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn progress(&self) -> u32 {
        calculate_progress(self.downloaded_bytes, self.total_bytes)
    }

    pub fn request(&self) -> Request {
        Request {
            id: self.id,
            url: self.url.clone(),
            file_path: self.file_path.clone(),
            group_id: self.group_id.clone(),
            name: self.name.clone(),
            headers: self.headers.clone(),
            priority: self.priority,
            network_type: self.network_type,
        }
    }
}

/// Query result handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestData {
    pub id: i64,
    pub url: String,
    pub file_path: String,
    pub group_id: String,
    pub name: String,
    pub headers: BTreeMap<String, String>,
    pub priority: Priority,
    pub network_type: NetworkType,
    pub status: Status,
    pub error: ErrorKind,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub progress: u32,
    pub created_at: i64,
}

/* ------------------------------ conversions ------------------------------ */

impl From<DownloadRecord> for RequestData {
    fn from(record: DownloadRecord) -> Self {
        let progress = record.progress();
        RequestData {
            id: record.id,
            url: record.url,
            file_path: record.file_path,
            group_id: record.group_id,
            name: record.name,
            headers: record.headers,
            priority: record.priority,
            network_type: record.network_type,
            status: record.status,
            error: record.error,
            downloaded_bytes: record.downloaded_bytes,
            total_bytes: record.total_bytes,
            progress,
            created_at: record.created_at,
        }
    }
}

/// Whole percent downloaded; 0 while the total is unknown or zero.
pub fn calculate_progress(downloaded_bytes: u64, total_bytes: Option<u64>) -> u32 {
    match total_bytes {
        Some(total) if total > 0 => {
            let percent = (downloaded_bytes as u128 * 100) / total as u128;
            std::cmp::min(percent, 100) as u32
        }
        _ => 0,
    }
}

fn string_hash(s: &str) -> i64 {
    s.bytes()
        .fold(0i64, |h, b| h.wrapping_mul(31).wrapping_add(b as i64))
}

/// Stable id for a url/destination pair.
pub fn derive_id(url: &str, file_path: &str) -> i64 {
    string_hash(url)
        .wrapping_mul(31)
        .wrapping_add(string_hash(file_path))
}
