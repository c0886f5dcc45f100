use std::{error::Error, fmt};

use thiserror::Error;

use crate::dom::{DomError, NodeId};

#[derive(Debug, Error, PartialEq)]
pub enum HighlightError {
    #[error("selection is empty")]
    EmptySelection,
    #[error("node {0} does not belong to this page")]
    UnknownNode(NodeId),
    #[error("no node with index {0}")]
    NoSuchNode(usize),
    #[error("offset {offset} is outside the page text of length {len}")]
    OffsetOutOfRange { offset: usize, len: usize },
    #[error("could not wrap selection: {0}")]
    Wrap(#[from] DomError),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to parse Import file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Failed to parse Import file: unrecognized backup shape")]
    UnrecognizedShape,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Cannot export {0} system pages.")]
    RestrictedPage(String),
    #[error("{0} library not loaded.")]
    RendererMissing(&'static str),
    #[error("Export timed out (page too large)")]
    Timeout,
    #[error("{0}")]
    Render(String),
}

#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("malformed markup at byte {position}: {message}")]
    Malformed { position: u64, message: String },
    #[error("unbalanced closing tag </{0}>")]
    Unbalanced(String),
}

#[derive(Debug)]
pub enum StoreError {
    Database(Box<dyn Error + Send + Sync + 'static>),
    Encoding(serde_json::Error),
    Closed,
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use StoreError::*;
        match self {
            Database(e) => Some(e.as_ref() as &dyn Error),
            Encoding(e) => Some(e),
            Closed => None,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use StoreError::*;
        match self {
            Database(e) => write!(f, "DatabaseError: {}", e),
            Encoding(e) => write!(f, "EncodingError: {}", e),
            Closed => write!(f, "StoreClosed"),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Encoding(error)
    }
}

impl From<libsql::Error> for StoreError {
    fn from(error: libsql::Error) -> Self {
        StoreError::Database(Box::new(error))
    }
}
