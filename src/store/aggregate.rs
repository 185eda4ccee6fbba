//! Tenant-scoped header/line aggregate reads.
//!
//! One statement fetches the header and all of its live lines
//! (`header LEFT JOIN lines`), so a concurrent writer can never be observed
//! between a header fetch and a line fetch. Both sides of the join carry the
//! `org_id` equality predicate.
//!
//! A header that is absent, soft-deleted, or owned by another tenant all
//! produce the same [`ReadError::NotFound`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::SqlitePool;

use crate::envelope::{ErrorClass, ErrorCode};
use crate::schema::registry::AggregateSpec;
use crate::schema::{EntitySchema, FieldKind};
use crate::scope::{InputError, RecordId, TenantId};

/// SQLite caps function arguments; each row is emitted as a `json_array` of
/// `json_object` chunks holding at most this many `'key', value` pairs.
const JSON_OBJECT_PAIRS_PER_CALL: usize = 48;

/// A header record with its ordered line records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderAggregate {
    /// Header columns keyed by field name.
    pub header: Map<String, Value>,
    /// Live lines in line order; empty when the header has none.
    pub lines: Vec<Map<String, Value>>,
}

/// Errors from aggregate reads.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// No live header matched tenant + id.
    #[error("record not found")]
    NotFound,

    /// Identifier shape or aggregate name was invalid.
    #[error(transparent)]
    Input(#[from] InputError),

    /// Database operation failed.
    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl ErrorClass for ReadError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::Input(_) => ErrorCode::Validation,
            Self::Persistence(_) => ErrorCode::Persistence,
        }
    }
}

/// Read side of the kernel, the seam route handlers depend on.
#[async_trait]
pub trait AggregateReader: Send + Sync {
    /// Fetch one aggregate instance owned by `tenant`.
    ///
    /// # Errors
    ///
    /// [`ReadError::NotFound`] when no live header matches both `tenant`
    /// and `id`; [`ReadError::Persistence`] when the store fails.
    async fn read_aggregate(
        &self,
        aggregate: &str,
        tenant: &TenantId,
        id: &RecordId,
    ) -> Result<HeaderAggregate, ReadError>;
}

/// Raw row: header JSON, and line JSON (`None` when the header has no lines).
type AggregateRow = (String, Option<String>);

/// Run the aggregate query for `spec`.
pub async fn read_aggregate(
    db: &SqlitePool,
    spec: &AggregateSpec,
    tenant: &TenantId,
    id: &RecordId,
) -> Result<HeaderAggregate, ReadError> {
    let sql = select_sql(spec);
    let rows: Vec<AggregateRow> = sqlx::query_as(&sql)
        .bind(tenant.as_str())
        .bind(id.as_str())
        .fetch_all(db)
        .await?;

    let mut rows = rows.into_iter();
    let Some((header_json, first_line)) = rows.next() else {
        return Err(ReadError::NotFound);
    };

    let header = decode_object(&spec.header, &header_json)?;
    let lines = first_line
        .into_iter()
        .chain(rows.filter_map(|(_, line)| line))
        .map(|line| decode_object(&spec.lines, &line))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HeaderAggregate { header, lines })
}

/// Build the single header-join-lines statement.
///
/// `?1` is the tenant, `?2` the header id.
pub(crate) fn select_sql(spec: &AggregateSpec) -> String {
    let header_table = quote_ident(spec.header.name());
    let line_table = quote_ident(spec.lines.name());
    let fk = quote_ident(&spec.foreign_key);
    let order_by = quote_ident(&spec.order_by);

    format!(
        "SELECT {header_obj} AS header, \
                CASE WHEN l.\"id\" IS NULL THEN NULL ELSE {line_obj} END AS line \
         FROM {header_table} h \
         LEFT JOIN {line_table} l \
           ON l.{fk} = h.\"id\" \
          AND l.\"org_id\" = h.\"org_id\" \
          AND l.\"deleted_at\" IS NULL \
         WHERE h.\"org_id\" = ?1 \
           AND h.\"id\" = ?2 \
           AND h.\"deleted_at\" IS NULL \
         ORDER BY l.{order_by} ASC, l.\"id\" ASC",
        header_obj = json_object_expr("h", &spec.header),
        line_obj = json_object_expr("l", &spec.lines),
    )
}

/// Quote an SQL identifier, doubling embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn json_object_expr(alias: &str, schema: &EntitySchema) -> String {
    let pairs: Vec<String> = schema
        .fields()
        .iter()
        .map(|field| {
            let column = format!("{alias}.{}", quote_ident(&field.name));
            let value = match field.kind {
                // Stored as JSON text; embed as structure, not as a string.
                FieldKind::Json => format!("json({column})"),
                _ => column,
            };
            format!("'{}', {value}", field.name.replace('\'', "''"))
        })
        .collect();

    let chunks: Vec<String> = pairs
        .chunks(JSON_OBJECT_PAIRS_PER_CALL)
        .map(|chunk| format!("json_object({})", chunk.join(", ")))
        .collect();
    if chunks.is_empty() {
        return "json_array(json_object())".to_owned();
    }
    format!("json_array({})", chunks.join(", "))
}

/// Merge the JSON object chunks produced by the query into one map and
/// normalise booleans, which SQLite stores as integers.
fn decode_object(schema: &EntitySchema, raw: &str) -> Result<Map<String, Value>, ReadError> {
    let malformed = || {
        ReadError::Persistence(sqlx::Error::Decode(
            format!("{}: row is not an array of JSON objects", schema.name()).into(),
        ))
    };
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ReadError::Persistence(sqlx::Error::Decode(Box::new(e))))?;
    let Value::Array(chunks) = value else {
        return Err(malformed());
    };
    let mut map = Map::new();
    for chunk in chunks {
        let Value::Object(part) = chunk else {
            return Err(malformed());
        };
        map.extend(part);
    }

    for field in schema.fields() {
        if field.kind != FieldKind::Boolean {
            continue;
        }
        if let Some(slot) = map.get_mut(&field.name) {
            if let Some(n) = slot.as_i64() {
                *slot = Value::Bool(n != 0);
            }
        }
    }
    Ok(map)
}
