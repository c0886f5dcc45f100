use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ImportError;

/// One highlighted text slice in global character offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightRecord {
    pub start: usize,
    pub end: usize,
    pub color: String,
    #[serde(default)]
    pub id: String,
}

/// Value stored under `autosave_<url>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredHighlights {
    pub highlights: Vec<HighlightRecord>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// One-shot restore left behind by an import meant for another page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRestore {
    pub url: String,
    pub data: Vec<HighlightRecord>,
}

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub version: u32,
    pub highlights: Vec<HighlightRecord>,
}

impl ExportFile {
    pub fn new(url: &str, highlights: Vec<HighlightRecord>) -> Self {
        ExportFile {
            url: url.to_string(),
            created_at: Utc::now(),
            version: EXPORT_VERSION,
            highlights,
        }
    }
}

/// A parsed backup file, either format.
#[derive(Debug, Clone, PartialEq)]
pub struct Backup {
    /// Page the backup was taken from. Legacy backups carry no url.
    pub url: Option<String>,
    pub highlights: Vec<HighlightRecord>,
    /// Entries that could not be read as records.
    pub dropped: usize,
}

/// Parses backup contents. A bare array is the legacy format, an object with
/// a `highlights` array is the current one. Entries that are not records are
/// dropped rather than failing the whole import.
pub fn parse_backup(contents: &str) -> Result<Backup, ImportError> {
    let json: Value = serde_json::from_str(contents)?;
    let (url, entries) = match json {
        Value::Array(entries) => (None, entries),
        Value::Object(mut map) => {
            let Some(Value::Array(entries)) = map.remove("highlights") else {
                return Err(ImportError::UnrecognizedShape);
            };
            let url = map
                .remove("url")
                .and_then(|u| u.as_str().map(str::to_string))
                .filter(|u| !u.is_empty());
            (url, entries)
        }
        _ => return Err(ImportError::UnrecognizedShape),
    };

    let total = entries.len();
    let highlights: Vec<HighlightRecord> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect();
    let dropped = total - highlights.len();
    if dropped > 0 {
        tracing::debug!(dropped, "ignored unreadable backup entries");
    }
    Ok(Backup {
        url,
        highlights,
        dropped,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub is_highlighting: bool,
    pub active_color: String,
    pub can_undo: bool,
    pub can_redo: bool,
}
