//! Provider setup errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}
