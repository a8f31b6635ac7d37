use serde::Serialize;
use std::fmt;

/// Structured error type shared by every fallible operation in the core
#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error codes for categorizing different error types
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // File errors
    FileReadError,
    FileWriteError,

    // Lookup errors
    AgentNotFound,
    ProfileNotFound,
    RuleNotFound,

    // Process errors
    LaunchFailed,

    // Validation errors
    InvalidCron,
    InvalidConfig,

    // Webhook receiver
    ServerError,

    // Generic
    Unknown,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(details) = &self.details {
            write!(f, "{:?}: {} - {}", self.code, self.message, details)
        } else {
            write!(f, "{:?}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for AppError {}

impl From<AppError> for String {
    fn from(err: AppError) -> String {
        serde_json::to_string(&err).unwrap_or_else(|_| err.message)
    }
}

// Convenience constructors
impl AppError {
    pub fn file_read(path: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::FileReadError,
            message: "Failed to read file".to_string(),
            details: Some(path.into()),
        }
    }

    pub fn file_write(path: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::FileWriteError,
            message: "Failed to write file".to_string(),
            details: Some(path.into()),
        }
    }

    pub fn agent_not_found(agent: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::AgentNotFound,
            message: "Agent directory not found".to_string(),
            details: Some(agent.into()),
        }
    }

    pub fn profile_not_found(agent: &str, label: &str) -> Self {
        Self {
            code: ErrorCode::ProfileNotFound,
            message: "Run profile not found".to_string(),
            details: Some(format!("{}::{}", agent, label)),
        }
    }

    pub fn rule_not_found(rule_id: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::RuleNotFound,
            message: "Trigger rule not found".to_string(),
            details: Some(rule_id.into()),
        }
    }

    pub fn launch_failed(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::LaunchFailed,
            message: msg.into(),
            details: None,
        }
    }

    pub fn invalid_cron(expression: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidCron,
            message: "Invalid cron expression".to_string(),
            details: Some(expression.into()),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidConfig,
            message: msg.into(),
            details: None,
        }
    }

    pub fn server_error(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ServerError,
            message: msg.into(),
            details: None,
        }
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Unknown,
            message: msg.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// Conversions from common error types
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::file_read(err.to_string()),
            _ => Self::unknown(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::unknown(format!("JSON serialization error: {}", err))
    }
}
