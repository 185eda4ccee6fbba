//! Entity schemas: ordered field descriptors per entity type.
//!
//! Schemas come from the build-time [`registry`] (generated from
//! `schema/entities.toml`) or are constructed directly by callers that own
//! their own schema source. The kernel only ever reads them.

pub mod registry;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Field descriptors
// ---------------------------------------------------------------------------

/// Semantic type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Free text or opaque identifiers.
    Text,
    /// Whole numbers.
    Integer,
    /// Exact decimal amounts (quantities, prices), stored and read back as
    /// decimal text.
    Decimal,
    /// True/false flags.
    Boolean,
    /// RFC 3339 timestamps.
    Timestamp,
    /// Structured JSON stored as text.
    Json,
}

impl FieldKind {
    /// Returns the lowercase name used in `schema/entities.toml`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Json => "json",
        }
    }
}

/// One named, typed field of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Column name.
    pub name: String,
    /// Semantic type.
    pub kind: FieldKind,
}

/// A named, ordered collection of field descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl EntitySchema {
    /// Create a schema from an entity name and its ordered fields.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Convenience constructor from `(name, kind)` pairs.
    pub fn from_pairs<'a>(
        name: impl Into<String>,
        fields: impl IntoIterator<Item = (&'a str, FieldKind)>,
    ) -> Self {
        let fields = fields
            .into_iter()
            .map(|(name, kind)| FieldDescriptor {
                name: name.to_owned(),
                kind,
            })
            .collect();
        Self::new(name, fields)
    }

    /// Entity type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field by exact name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns `true` if the schema declares a field with this exact name.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// The full set of field names, see [`field_names`].
    pub fn field_names(&self) -> BTreeSet<&str> {
        field_names(self)
    }
}

/// Return every field name declared by `schema`.
///
/// Descriptors with a blank name are malformed and skipped; a schema made up
/// only of malformed descriptors yields an empty set.
pub fn field_names(schema: &EntitySchema) -> BTreeSet<&str> {
    schema
        .fields
        .iter()
        .map(|f| f.name.as_str())
        .filter(|name| !name.trim().is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Static (generated) declarations
// ---------------------------------------------------------------------------

/// Field declaration emitted by the build script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticField {
    /// Column name.
    pub name: &'static str,
    /// Semantic type.
    pub kind: FieldKind,
}

/// Entity declaration emitted by the build script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticEntity {
    /// Entity (and table) name.
    pub name: &'static str,
    /// Ordered field list.
    pub fields: &'static [StaticField],
}

impl From<&StaticEntity> for EntitySchema {
    fn from(entity: &StaticEntity) -> Self {
        Self::from_pairs(entity.name, entity.fields.iter().map(|f| (f.name, f.kind)))
    }
}

/// Header/line aggregate declaration emitted by the build script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAggregate {
    /// Aggregate name used by callers.
    pub name: &'static str,
    /// Header entity (and table) name.
    pub header: &'static str,
    /// Line entity (and table) name.
    pub lines: &'static str,
    /// Column on the line table referencing the header `id`.
    pub foreign_key: &'static str,
    /// Column on the line table that orders lines under their header.
    pub order_by: &'static str,
}
