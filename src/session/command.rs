use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::capture::{ExportArtifact, Quality};
use crate::highlight::RestoreReport;
use crate::model::{ExportFile, Status};
use crate::range::SelectionSpec;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    ToggleGlobal(bool),
    ToggleHighlight(bool),
    SetColor(String),
    ClearHighlights,
    Undo,
    Redo,
    GetStatus,
    ExportData,
    TriggerImport(ImportRequest),
    ExportPng,
    ExportPdf(Option<PdfOptions>),
    Selection(SelectionSpec),
    PickColor(String),
    RemoveHighlight(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImportRequest {
    /// Text of the backup file picked by the user.
    pub contents: String,
    /// Whether a backup for another page may redirect there.
    #[serde(default = "default_redirect")]
    pub redirect: bool,
}

fn default_redirect() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PdfOptions {
    #[serde(default)]
    pub quality: Quality,
}

/// Broadcast to every listener after a state change or a failed export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    GetStatus(Status),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageEvent {
    pub url: String,
    #[serde(flatten)]
    pub notification: Notification,
}

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack(&'static str),
    Status(Status),
    Exported { filename: String, data: ExportFile },
    Imported { report: RestoreReport, dropped: usize },
    Redirect { url: String },
    Artifact(ExportArtifact),
    /// The request itself was unusable, e.g. an unreadable backup.
    Rejected(String),
    Failed(String),
}

impl Reply {
    /// JSON body for the reply. Artifacts carry binary data and have none.
    pub fn to_json(&self) -> Option<Value> {
        let body = match self {
            Reply::Ack(status) => json!({ "status": status }),
            Reply::Status(status) => serde_json::to_value(status).ok()?,
            Reply::Exported { filename, data } => {
                json!({ "status": "ok", "filename": filename, "data": data })
            }
            Reply::Imported { report, dropped } => json!({
                "status": "imported",
                "applied": report.applied,
                "failed": report.failed,
                "dropped": dropped,
            }),
            Reply::Redirect { url } => json!({ "status": "redirect", "url": url }),
            Reply::Artifact(_) => return None,
            Reply::Rejected(message) | Reply::Failed(message) => {
                json!({ "status": "error", "message": message })
            }
        };
        Some(body)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Reply::Rejected(_) | Reply::Failed(_))
    }
}
