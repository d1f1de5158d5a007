use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected status {status} from {url}")]
    Http { status: u16, url: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document error: {0}")]
    Document(String),
}

impl From<reqwest::Error> for DriverError {
    fn from(err: reqwest::Error) -> Self {
        DriverError::Network(err.to_string())
    }
}
