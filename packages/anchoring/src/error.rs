use thiserror::Error;

/// Errors talking to an anchoring ledger.
#[derive(Debug, Error)]
pub enum AnchorError {
    /// The ledger could not be reached at all.
    #[error("ledger unreachable: {0}")]
    Unreachable(String),

    /// The ledger answered but refused the request.
    #[error("ledger rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnchorError {
    /// Whether retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnchorError::Unreachable(_) | AnchorError::Http(_) => true,
            AnchorError::Rejected { status, .. } => *status >= 500,
            AnchorError::Url(_) | AnchorError::Json(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AnchorError>;
