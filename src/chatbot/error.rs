//! Error types shared by the HTTP-backed providers.

use thiserror::Error;

/// Failure talking to a speech, transcription or language-model service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: String,
        status: u16,
        /// First 200 characters of the response body.
        body: String,
    },

    #[error("{service} rate limit exceeded")]
    RateLimited { service: String },

    #[error("{service} is not available in this region")]
    RegionBlocked { service: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("{0} timed out")]
    Timeout(String),
}

impl ServiceError {
    /// Build a [`ServiceError::Status`] keeping only the start of the body.
    pub fn status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        Self::Status {
            service: service.to_string(),
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        }
    }
}

/// Failure talking to the Telegram Bot API.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),

    #[error("Telegram download failed: {0}")]
    Download(#[from] teloxide::DownloadError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid Bot API URL '{0}'")]
    ApiUrl(String),
}

/// Failure turning a reply into a delivered voice message.
#[derive(Debug, Error)]
pub enum SpeakError {
    #[error("speech synthesis failed: {0}")]
    Tts(#[from] ServiceError),

    #[error("failed to store audio: {0}")]
    Store(#[from] std::io::Error),

    #[error(transparent)]
    Telegram(#[from] TelegramError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_body_truncated() {
        let body = "x".repeat(500);
        let err = ServiceError::status("OpenAI", reqwest::StatusCode::BAD_GATEWAY, &body);
        match err {
            ServiceError::Status { service, status, body } => {
                assert_eq!(service, "OpenAI");
                assert_eq!(status, 502);
                assert_eq!(body.len(), 200);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_display() {
        let err = ServiceError::RateLimited { service: "Groq".into() };
        assert_eq!(err.to_string(), "Groq rate limit exceeded");
    }
}
