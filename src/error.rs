use serde::Serialize;

/// All errors that can occur while preparing, streaming, or packaging a generation.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("{0}")]
    Validation(String),

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("Payment required. Please add credits.")]
    PaymentRequired,

    #[error("Failed to start generation")]
    StartFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

impl GeneratorError {
    /// Maps a non-success HTTP status from the generation endpoint.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            429 => GeneratorError::RateLimited,
            402 => GeneratorError::PaymentRequired,
            _ => GeneratorError::StartFailed,
        }
    }
}

// Errors travel inside serialized events, so they serialize as their message.
impl Serialize for GeneratorError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GeneratorError>;
