//! Unified application error model and mapping helpers.
//! This module provides the common error enum used by the tools, the record engines and the
//! HTTP frontend, along with helper mappers to the HTTP status and the in-band tool payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    Auth { code: String, message: String },
    Exec { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Exec { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Exec { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn exec<S: Into<String>>(code: S, msg: S) -> Self { AppError::Exec { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Missing or malformed top-level tool parameter.
    pub fn invalid_param(name: &str, msg: impl Into<String>) -> Self {
        AppError::UserInput { code: format!("invalid_param:{}", name), message: msg.into() }
    }

    /// Access failures deliberately look the same as a missing table.
    pub fn table_unavailable(table: &str) -> Self {
        AppError::UserInput {
            code: "table_unavailable".into(),
            message: format!("Table '{}' does not exist or is not accessible", table),
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Auth { .. } => 401,
            AppError::Exec { .. } => 422,
            AppError::Io { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }

    /// In-band tool error payload: `{ "error": { "code", "message" } }`.
    pub fn tool_payload(&self) -> Value {
        json!({ "error": { "code": self.code_str(), "message": self.message() } })
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as Exec unless downcasted elsewhere
        AppError::Exec { code: "exec_error".into(), message: err.to_string() }
    }
}

impl From<crate::engine::EngineError> for AppError {
    fn from(err: crate::engine::EngineError) -> Self {
        use crate::engine::EngineError;
        match &err {
            EngineError::AlreadyLocalized { .. } => AppError::conflict("already_localized".to_string(), err.to_string()),
            EngineError::PermissionDenied(_) => AppError::auth("permission_denied".to_string(), err.to_string()),
            _ => AppError::exec("engine_error".to_string(), err.to_string()),
        }
    }
}

impl From<crate::validation::ValidationErrors> for AppError {
    fn from(err: crate::validation::ValidationErrors) -> Self {
        AppError::user("validation_failed".to_string(), err.to_string())
    }
}
