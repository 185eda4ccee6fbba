//! Discriminated result envelope handed to route handlers.
//!
//! Serializes as `{"ok":true,"data":...}` or
//! `{"ok":false,"error":{"code":"NOT_FOUND","message":"..."}}`. Messages
//! are fixed per code so callers never learn why a lookup missed, and
//! storage errors never leak driver details.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// Transport-neutral failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Input failed shape validation or named non-writable fields.
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    /// Tenant + id matched no live record.
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    /// The store was unreachable or errored.
    #[serde(rename = "PERSISTENCE_ERROR")]
    Persistence,
}

impl ErrorCode {
    /// Wire spelling of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Persistence => "PERSISTENCE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a kernel error into an [`ErrorCode`].
pub trait ErrorClass: std::fmt::Display {
    /// The code this error maps to.
    fn code(&self) -> ErrorCode;

    /// Caller-facing message. Validation errors echo their detail; other
    /// codes use a fixed message.
    fn public_message(&self) -> String {
        match self.code() {
            ErrorCode::Validation => self.to_string(),
            ErrorCode::NotFound => "record not found".to_owned(),
            ErrorCode::Persistence => "storage unavailable".to_owned(),
        }
    }
}

/// Failure half of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Failure class.
    pub code: ErrorCode,
    /// Caller-facing message.
    pub message: String,
}

impl ErrorBody {
    /// Build the body for a classified error.
    pub fn from_error<E: ErrorClass + ?Sized>(err: &E) -> Self {
        Self {
            code: err.code(),
            message: err.public_message(),
        }
    }
}

/// Success payload or classified failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    /// The operation succeeded.
    Success(T),
    /// The operation failed.
    Failure(ErrorBody),
}

impl<T> Envelope<T> {
    /// Wrap a kernel result.
    pub fn from_result<E: ErrorClass>(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::Success(data),
            Err(err) => Self::Failure(ErrorBody::from_error(&err)),
        }
    }

    /// Returns `true` for [`Envelope::Success`].
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Failure code, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Success(_) => None,
            Self::Failure(body) => Some(body.code),
        }
    }
}

impl<T: Serialize> Serialize for Envelope<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Envelope", 2)?;
        match self {
            Self::Success(data) => {
                state.serialize_field("ok", &true)?;
                state.serialize_field("data", data)?;
            }
            Self::Failure(body) => {
                state.serialize_field("ok", &false)?;
                state.serialize_field("error", body)?;
            }
        }
        state.end()
    }
}
