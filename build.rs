//! Build script for the ERP kernel.
//!
//! Reads the declarative entity source `schema/entities.toml` and emits the
//! static entity/aggregate registry into `$OUT_DIR/entity_registry.rs`, which
//! `src/schema/registry.rs` pulls in with `include!`. Malformed declarations
//! fail the build rather than surfacing at runtime.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Deserialize;

const SCHEMA_SOURCE: &str = "schema/entities.toml";

/// Columns every aggregate header table must carry.
const HEADER_KERNEL_COLUMNS: &[&str] = &[
    "id",
    "org_id",
    "created_at",
    "updated_at",
    "version",
    "deleted_at",
];

/// Columns every aggregate line table must carry.
const LINE_KERNEL_COLUMNS: &[&str] = &["id", "org_id", "created_at", "updated_at", "deleted_at"];

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    entity: Vec<EntityDecl>,
    #[serde(default)]
    aggregate: Vec<AggregateDecl>,
}

#[derive(Debug, Deserialize)]
struct EntityDecl {
    name: String,
    fields: Vec<FieldDecl>,
}

#[derive(Debug, Deserialize)]
struct FieldDecl {
    name: String,
    kind: String,
}

#[derive(Debug, Deserialize)]
struct AggregateDecl {
    name: String,
    header: String,
    lines: String,
    foreign_key: String,
    order_by: String,
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={SCHEMA_SOURCE}");

    let source = match std::fs::read_to_string(SCHEMA_SOURCE) {
        Ok(source) => source,
        Err(err) => panic!("failed to read {SCHEMA_SOURCE}: {err}"),
    };
    let schema: SchemaFile = match toml::from_str(&source) {
        Ok(schema) => schema,
        Err(err) => panic!("failed to parse {SCHEMA_SOURCE}: {err}"),
    };

    if let Err(err) = validate(&schema) {
        panic!("invalid {SCHEMA_SOURCE}: {err}");
    }

    let out_dir = match std::env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(err) => panic!("OUT_DIR not set: {err}"),
    };
    let out_path = out_dir.join("entity_registry.rs");
    if let Err(err) = std::fs::write(&out_path, render(&schema)) {
        panic!("failed to write {}: {err}", out_path.display());
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn kind_variant(kind: &str) -> Option<&'static str> {
    match kind {
        "text" => Some("Text"),
        "integer" => Some("Integer"),
        "decimal" => Some("Decimal"),
        "boolean" => Some("Boolean"),
        "timestamp" => Some("Timestamp"),
        "json" => Some("Json"),
        _ => None,
    }
}

fn validate(schema: &SchemaFile) -> Result<(), String> {
    let mut entity_names = BTreeSet::new();
    for entity in &schema.entity {
        if !is_identifier(&entity.name) {
            return Err(format!("entity name {:?} is not a snake_case identifier", entity.name));
        }
        if !entity_names.insert(entity.name.as_str()) {
            return Err(format!("entity {:?} declared twice", entity.name));
        }
        let mut field_names = BTreeSet::new();
        for field in &entity.fields {
            if !is_identifier(&field.name) {
                return Err(format!(
                    "{}.{:?} is not a snake_case identifier",
                    entity.name, field.name
                ));
            }
            if !field_names.insert(field.name.as_str()) {
                return Err(format!("{}.{} declared twice", entity.name, field.name));
            }
            if kind_variant(&field.kind).is_none() {
                return Err(format!(
                    "{}.{} has unknown kind {:?}",
                    entity.name, field.name, field.kind
                ));
            }
        }
    }

    let mut aggregate_names = BTreeSet::new();
    for aggregate in &schema.aggregate {
        if !aggregate_names.insert(aggregate.name.as_str()) {
            return Err(format!("aggregate {:?} declared twice", aggregate.name));
        }
        let header = find_entity(schema, &aggregate.header)
            .ok_or_else(|| format!("aggregate {}: unknown header {}", aggregate.name, aggregate.header))?;
        let lines = find_entity(schema, &aggregate.lines)
            .ok_or_else(|| format!("aggregate {}: unknown lines {}", aggregate.name, aggregate.lines))?;

        require_columns(header, HEADER_KERNEL_COLUMNS)?;
        require_columns(lines, LINE_KERNEL_COLUMNS)?;
        require_columns(lines, &[aggregate.foreign_key.as_str(), aggregate.order_by.as_str()])?;
    }
    Ok(())
}

fn find_entity<'a>(schema: &'a SchemaFile, name: &str) -> Option<&'a EntityDecl> {
    schema.entity.iter().find(|e| e.name == name)
}

fn require_columns(entity: &EntityDecl, columns: &[&str]) -> Result<(), String> {
    for column in columns {
        if !entity.fields.iter().any(|f| f.name == *column) {
            return Err(format!("entity {} is missing column {column}", entity.name));
        }
    }
    Ok(())
}

fn render(schema: &SchemaFile) -> String {
    let mut out = String::new();
    out.push_str("// @generated by build.rs from schema/entities.toml. Do not edit.\n\n");

    out.push_str("/// Entities declared in `schema/entities.toml`, in declaration order.\n");
    out.push_str("pub static ENTITIES: &[StaticEntity] = &[\n");
    for entity in &schema.entity {
        let _ = writeln!(out, "    StaticEntity {{");
        let _ = writeln!(out, "        name: {:?},", entity.name);
        let _ = writeln!(out, "        fields: &[");
        for field in &entity.fields {
            let variant = kind_variant(&field.kind).unwrap_or("Text");
            let _ = writeln!(
                out,
                "            StaticField {{ name: {:?}, kind: FieldKind::{variant} }},",
                field.name
            );
        }
        let _ = writeln!(out, "        ],");
        let _ = writeln!(out, "    }},");
    }
    out.push_str("];\n\n");

    out.push_str("/// Header/line aggregates declared in `schema/entities.toml`.\n");
    out.push_str("pub static AGGREGATES: &[StaticAggregate] = &[\n");
    for aggregate in &schema.aggregate {
        let _ = writeln!(out, "    StaticAggregate {{");
        let _ = writeln!(out, "        name: {:?},", aggregate.name);
        let _ = writeln!(out, "        header: {:?},", aggregate.header);
        let _ = writeln!(out, "        lines: {:?},", aggregate.lines);
        let _ = writeln!(out, "        foreign_key: {:?},", aggregate.foreign_key);
        let _ = writeln!(out, "        order_by: {:?},", aggregate.order_by);
        let _ = writeln!(out, "    }},");
    }
    out.push_str("];\n");
    out
}
