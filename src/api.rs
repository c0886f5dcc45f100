use serde::{Deserialize, Serialize};

/// Identifies the page a request is about.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub url: String,
}

#[derive(Debug, Serialize, Default)]
pub struct APIResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl APIResponse {
    pub fn new_from_msg(msg: &str) -> Self {
        APIResponse {
            status: msg.to_owned(),
            message: None,
        }
    }

    pub fn new(msg: Option<&str>, message: Option<String>) -> Self {
        APIResponse {
            status: msg.unwrap_or_default().to_owned(),
            message,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        APIResponse {
            status: "error".to_owned(),
            message: Some(message.into()),
        }
    }
}
