//! Validated tenant and record identifiers, and inbound shape errors.
//!
//! Both are opaque strings checked for shape before any query runs: not
//! blank, at most [`MAX_IDENTIFIER_LEN`] bytes, no control characters.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::envelope::{ErrorClass, ErrorCode};

/// Maximum identifier length in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Shape errors for inbound identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    /// The identifier was empty or whitespace.
    #[error("{field} must not be empty")]
    Empty {
        /// Which identifier.
        field: &'static str,
    },

    /// The identifier exceeded [`MAX_IDENTIFIER_LEN`].
    #[error("{field} is {len} bytes, limit is {max}")]
    TooLong {
        /// Which identifier.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Allowed length.
        max: usize,
    },

    /// The identifier contained a control character.
    #[error("{field} contains control characters")]
    ControlCharacter {
        /// Which identifier.
        field: &'static str,
    },

    /// A payload value does not fit its column kind. Only the field name
    /// is reported, never the value.
    #[error("{field} must be {expected}")]
    InvalidValue {
        /// Offending payload key.
        field: String,
        /// What the column accepts.
        expected: &'static str,
    },

    /// An enumerated setting had an unrecognised value.
    #[error("invalid {field}: {value}")]
    InvalidEnum {
        /// Which setting.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The named entity is not registered.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The named aggregate is not registered.
    #[error("unknown aggregate: {0}")]
    UnknownAggregate(String),
}

impl ErrorClass for InputError {
    fn code(&self) -> ErrorCode {
        ErrorCode::Validation
    }
}

fn check_identifier(field: &'static str, raw: &str) -> Result<(), InputError> {
    if raw.trim().is_empty() {
        return Err(InputError::Empty { field });
    }
    if raw.len() > MAX_IDENTIFIER_LEN {
        return Err(InputError::TooLong {
            field,
            len: raw.len(),
            max: MAX_IDENTIFIER_LEN,
        });
    }
    if raw.chars().any(char::is_control) {
        return Err(InputError::ControlCharacter { field });
    }
    Ok(())
}

/// Organization-level partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a raw tenant identifier.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] if the value is blank, too long, or
    /// contains control characters.
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        check_identifier("tenant", raw)?;
        Ok(Self(raw.to_owned()))
    }

    /// Borrow the raw value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Primary key of a header or line record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Validate and wrap a raw record identifier.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] if the value is blank, too long, or
    /// contains control characters.
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        check_identifier("id", raw)?;
        Ok(Self(raw.to_owned()))
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the raw value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TenantId {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl FromStr for RecordId {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is writing, and on behalf of which tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteContext {
    /// Tenant every statement is scoped to.
    pub tenant: TenantId,
    /// Acting user, recorded in `created_by` / `updated_by` when the entity
    /// has those columns.
    pub actor: Option<RecordId>,
}

impl WriteContext {
    /// Context for an anonymous (system) writer.
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            actor: None,
        }
    }

    /// Attach the acting user.
    pub fn with_actor(mut self, actor: RecordId) -> Self {
        self.actor = Some(actor);
        self
    }
}
