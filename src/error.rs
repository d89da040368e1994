use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid configuration: {}", .0.join("; "))]
    Config(Vec<String>),
    #[error("authorization failed: {0}")]
    Auth(String),
    #[error("{0}")]
    Request(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn request(err: impl ToString) -> Self {
        SyncError::Request(err.to_string())
    }
}

/// Collapse an error body to a single short line for log output.
pub fn truncate_error(message: &str) -> String {
    let mut out = message.trim().replace(['\n', '\r'], " ");
    if out.len() > 240 {
        let mut cut = 240;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str("...");
    }
    out
}

/// Turn a non-success response into a `Request` error carrying the body summary.
pub fn status_error(what: &str, resp: reqwest::blocking::Response) -> SyncError {
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    if body.trim().is_empty() {
        SyncError::Request(format!("{what} failed: HTTP {status}"))
    } else {
        SyncError::Request(format!(
            "{what} failed: HTTP {status}: {}",
            truncate_error(&body)
        ))
    }
}
