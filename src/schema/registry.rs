//! Build-time entity registry.
//!
//! The static tables are generated by `build.rs` from `schema/entities.toml`;
//! there is no runtime reflection over database metadata.

use super::{EntitySchema, FieldKind, StaticAggregate, StaticEntity, StaticField};

include!(concat!(env!("OUT_DIR"), "/entity_registry.rs"));

/// Resolved header/line aggregate: both schemas plus the join columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSpec {
    /// Aggregate name used by callers.
    pub name: String,
    /// Header entity schema (also the header table name).
    pub header: EntitySchema,
    /// Line entity schema (also the line table name).
    pub lines: EntitySchema,
    /// Line column referencing the header `id`.
    pub foreign_key: String,
    /// Line column that orders lines.
    pub order_by: String,
}

/// Look up a generated entity declaration by name.
pub fn static_entity(name: &str) -> Option<&'static StaticEntity> {
    ENTITIES.iter().find(|e| e.name == name)
}

/// Look up an entity schema by name.
pub fn entity(name: &str) -> Option<EntitySchema> {
    static_entity(name).map(EntitySchema::from)
}

/// Names of every registered entity, in declaration order.
pub fn entity_names() -> impl Iterator<Item = &'static str> {
    ENTITIES.iter().map(|e| e.name)
}

/// Look up an aggregate by name, resolving both of its schemas.
///
/// The build script guarantees both entities exist, so `None` means only
/// that no aggregate of this name was declared.
pub fn aggregate(name: &str) -> Option<AggregateSpec> {
    let decl = AGGREGATES.iter().find(|a| a.name == name)?;
    Some(AggregateSpec {
        name: decl.name.to_owned(),
        header: entity(decl.header)?,
        lines: entity(decl.lines)?,
        foreign_key: decl.foreign_key.to_owned(),
        order_by: decl.order_by.to_owned(),
    })
}

/// Names of every registered aggregate, in declaration order.
pub fn aggregate_names() -> impl Iterator<Item = &'static str> {
    AGGREGATES.iter().map(|a| a.name)
}
