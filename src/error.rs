use thiserror::Error;

#[derive(Debug, Error)]
pub enum CvwatchError {
    #[error("missing required configuration value: {0}")]
    MissingConfig(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("price table missing or invalid: {0}")]
    PriceTable(String),
    #[error("login failed: expected {expected}, landed on {actual}")]
    LoginFailed { expected: String, actual: String },
    #[error("conversion table did not appear within {timeout_secs}s")]
    TableNotFound { timeout_secs: u64 },
    #[error("notification delivery failed: {0}")]
    Notification(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvwatchErrorCode {
    E001ConfigMissing,
    E002ConfigInvalid,
    E003PriceTable,
    E004LoginFailed,
    E005TableNotFound,
    E006NotifyFailed,
}

impl CvwatchErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001ConfigMissing => "E001_CONFIG_MISSING",
            Self::E002ConfigInvalid => "E002_CONFIG_INVALID",
            Self::E003PriceTable => "E003_PRICE_TABLE",
            Self::E004LoginFailed => "E004_LOGIN_FAILED",
            Self::E005TableNotFound => "E005_TABLE_NOT_FOUND",
            Self::E006NotifyFailed => "E006_NOTIFY_FAILED",
        }
    }
}

impl CvwatchError {
    pub fn code(&self) -> &'static str {
        let code = match self {
            Self::MissingConfig(_) => CvwatchErrorCode::E001ConfigMissing,
            Self::InvalidConfig(_) => CvwatchErrorCode::E002ConfigInvalid,
            Self::PriceTable(_) => CvwatchErrorCode::E003PriceTable,
            Self::LoginFailed { .. } => CvwatchErrorCode::E004LoginFailed,
            Self::TableNotFound { .. } => CvwatchErrorCode::E005TableNotFound,
            Self::Notification(_) => CvwatchErrorCode::E006NotifyFailed,
        };
        code.as_str()
    }
}
