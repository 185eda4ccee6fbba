//! Mutation sanitization against per-entity writable allowlists.
//!
//! [`sanitize`] is the allowlist filter: keys outside the entity's writable
//! set are dropped without error. [`sanitize_strict`] is the reject policy:
//! any non-writable key fails the whole mutation. [`Sanitizer`] binds a
//! policy to an [`AllowlistCache`] for the write path.
//!
//! Either way the output key set is a subset of
//! [`resolve_writable`]`(schema)`, so no system field survives.

pub mod system;
pub mod writable;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::envelope::{ErrorClass, ErrorCode};
use crate::schema::EntitySchema;
use crate::scope::InputError;

pub use self::system::{is_system_field, SYSTEM_FIELDS};
pub use self::writable::{resolve_writable, AllowlistCache};

/// How a mutation carrying non-writable keys is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizePolicy {
    /// Silently drop non-writable keys.
    #[default]
    Drop,
    /// Reject the whole mutation.
    Reject,
}

impl SanitizePolicy {
    /// Returns the configuration spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Reject => "reject",
        }
    }

    /// Parse from the configuration spelling.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::InvalidEnum`] for an unrecognised value.
    pub fn parse(s: &str) -> Result<Self, InputError> {
        match s {
            "drop" => Ok(Self::Drop),
            "reject" => Ok(Self::Reject),
            other => Err(InputError::InvalidEnum {
                field: "policy",
                value: other.to_owned(),
            }),
        }
    }
}

/// Errors from strict sanitization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanitizeError {
    /// The mutation named fields the caller may not set.
    #[error("{entity}: fields not writable: {}", fields.join(", "))]
    NonWritableFields {
        /// Entity the mutation targeted.
        entity: String,
        /// Offending keys, sorted.
        fields: Vec<String>,
    },
}

impl ErrorClass for SanitizeError {
    fn code(&self) -> ErrorCode {
        ErrorCode::Validation
    }
}

/// Keep only the keys of `input` that `schema` allows callers to set.
///
/// Never fails; disallowed keys are dropped and logged by name only.
pub fn sanitize(schema: &EntitySchema, input: Map<String, Value>) -> Map<String, Value> {
    retain_allowed(schema.name(), &resolve_writable(schema), input)
}

/// Like [`sanitize`], but any non-writable key rejects the whole input.
///
/// # Errors
///
/// Returns [`SanitizeError::NonWritableFields`] listing every offending key.
pub fn sanitize_strict(
    schema: &EntitySchema,
    input: Map<String, Value>,
) -> Result<Map<String, Value>, SanitizeError> {
    reject_disallowed(schema.name(), &resolve_writable(schema), input)
}

fn retain_allowed(
    entity: &str,
    allowlist: &BTreeSet<String>,
    input: Map<String, Value>,
) -> Map<String, Value> {
    let mut dropped = Vec::new();
    let mut out = Map::new();
    for (key, value) in input {
        if allowlist.contains(&key) {
            out.insert(key, value);
        } else {
            dropped.push(key);
        }
    }
    if !dropped.is_empty() {
        debug!(entity, dropped = ?dropped, "dropped non-writable fields");
    }
    out
}

fn reject_disallowed(
    entity: &str,
    allowlist: &BTreeSet<String>,
    input: Map<String, Value>,
) -> Result<Map<String, Value>, SanitizeError> {
    let mut offending: Vec<String> = input
        .keys()
        .filter(|key| !allowlist.contains(key.as_str()))
        .cloned()
        .collect();
    if offending.is_empty() {
        return Ok(input);
    }
    offending.sort();
    debug!(entity, rejected = ?offending, "rejected mutation with non-writable fields");
    Err(SanitizeError::NonWritableFields {
        entity: entity.to_owned(),
        fields: offending,
    })
}

/// Policy-aware sanitizer backed by a shared [`AllowlistCache`].
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    cache: Arc<AllowlistCache>,
    policy: SanitizePolicy,
}

impl Sanitizer {
    /// Create a sanitizer over an injected cache.
    pub fn new(cache: Arc<AllowlistCache>, policy: SanitizePolicy) -> Self {
        Self { cache, policy }
    }

    /// Active policy.
    pub fn policy(&self) -> SanitizePolicy {
        self.policy
    }

    /// The underlying allowlist cache.
    pub fn cache(&self) -> &Arc<AllowlistCache> {
        &self.cache
    }

    /// Cached writable allowlist for `schema`.
    pub fn writable(&self, schema: &EntitySchema) -> Arc<BTreeSet<String>> {
        self.cache.writable(schema)
    }

    /// Sanitize `input` under the configured policy.
    ///
    /// # Errors
    ///
    /// Only under [`SanitizePolicy::Reject`], when `input` names a
    /// non-writable key.
    pub fn apply(
        &self,
        schema: &EntitySchema,
        input: Map<String, Value>,
    ) -> Result<Map<String, Value>, SanitizeError> {
        let allowlist = self.cache.writable(schema);
        match self.policy {
            SanitizePolicy::Drop => Ok(retain_allowed(schema.name(), &allowlist, input)),
            SanitizePolicy::Reject => reject_disallowed(schema.name(), &allowlist, input),
        }
    }
}
