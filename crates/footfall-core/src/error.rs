//! Error types for Footfall

use thiserror::Error;

/// Result type alias using Footfall's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Footfall error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Fact errors (E001-E099)
    #[error("Malformed row at line {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("Could not load fact data: {0}")]
    DataSource(String),

    // Retrieval errors (E100-E199)
    #[error("Entity '{0}' does not exist in the fact graph")]
    UnknownEntity(String),

    #[error("No sites, dates, regions or areas were recognized in the question")]
    EmptySelection,

    // Upstream errors (E200-E299)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Language model service error: {0}")]
    UpstreamService(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Language model request timed out after {0} seconds")]
    Timeout(u64),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedRow { .. } => "E001",
            Self::DataSource(_) => "E002",
            Self::UnknownEntity(_) => "E100",
            Self::EmptySelection => "E101",
            Self::NetworkError(_) => "E200",
            Self::UpstreamService(_) => "E201",
            Self::RateLimited(_) => "E202",
            Self::Timeout(_) => "E203",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Json(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::DataSource(_) => Some("footfall config set data.path <file>".to_string()),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::UpstreamService(_) => {
                Some("Check FOOTFALL_API_KEY or GROQ_API_KEY is set".to_string())
            }
            Self::Timeout(secs) => Some(format!("footfall config set llm.timeout_secs {}", secs * 2)),
            Self::EmptySelection => {
                Some("Mention a site, region, area or a DD-MM-YYYY date".to_string())
            }
            _ => None,
        }
    }

    /// Whether a retry of the same request could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::Timeout(_) => true,
            Self::NetworkError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::UpstreamService(msg) => msg.starts_with("Server error"),
            _ => false,
        }
    }
}
