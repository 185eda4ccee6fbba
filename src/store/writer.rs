//! Single-writer actor for kernel-managed aggregate writes.
//!
//! Payloads arrive here already sanitized; this module is the only place
//! that sets system fields (`id`, `org_id`, audit columns, `version`,
//! `deleted_at`). Each header+lines write runs in one transaction, and every
//! statement carries the `org_id` equality predicate.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::Row as _;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace};

use super::aggregate::quote_ident;
use crate::envelope::{ErrorClass, ErrorCode};
use crate::sanitize::{is_system_field, SanitizeError};
use crate::schema::registry::AggregateSpec;
use crate::schema::{EntitySchema, FieldKind};
use crate::scope::{InputError, RecordId, WriteContext};

/// Errors from kernel writes.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// No live header matched tenant + id.
    #[error("record not found")]
    NotFound,

    /// Identifier shape or aggregate name was invalid.
    #[error(transparent)]
    Input(#[from] InputError),

    /// The reject policy refused the payload.
    #[error(transparent)]
    Rejected(#[from] SanitizeError),

    /// Database operation failed.
    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Write channel is closed (writer actor stopped).
    #[error("kernel writer channel closed")]
    WriterClosed,
}

impl ErrorClass for WriteError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::Input(_) | Self::Rejected(_) => ErrorCode::Validation,
            Self::Persistence(_) | Self::WriterClosed => ErrorCode::Persistence,
        }
    }
}

/// Operations that can be sent to the write actor.
#[derive(Debug)]
pub enum WriteOp {
    /// Insert a header and its lines.
    CreateAggregate {
        /// Target aggregate.
        spec: AggregateSpec,
        /// Tenant and actor.
        ctx: WriteContext,
        /// Sanitized header fields.
        header: Map<String, Value>,
        /// Sanitized line fields, in caller order.
        lines: Vec<Map<String, Value>>,
        /// Receives the new header id.
        reply: oneshot::Sender<Result<RecordId, WriteError>>,
    },

    /// Update writable header fields and bump `version`.
    UpdateHeader {
        /// Target aggregate.
        spec: AggregateSpec,
        /// Tenant and actor.
        ctx: WriteContext,
        /// Header id.
        id: RecordId,
        /// Sanitized header fields.
        changes: Map<String, Value>,
        /// Receives the header's version after the update.
        reply: oneshot::Sender<Result<i64, WriteError>>,
    },

    /// Soft-delete a header and its lines.
    SoftDelete {
        /// Target aggregate.
        spec: AggregateSpec,
        /// Tenant and actor.
        ctx: WriteContext,
        /// Header id.
        id: RecordId,
        /// Receives the outcome.
        reply: oneshot::Sender<Result<(), WriteError>>,
    },
}

/// Run the single-writer actor loop.
///
/// Processes [`WriteOp`] messages until the sender half is dropped.
pub async fn run_writer(db: SqlitePool, mut rx: mpsc::Receiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::CreateAggregate {
                spec,
                ctx,
                header,
                lines,
                reply,
            } => {
                let result = create_aggregate(&db, &spec, &ctx, header, lines).await;
                log_failure(&spec, "create", &result);
                let _ = reply.send(result);
            }
            WriteOp::UpdateHeader {
                spec,
                ctx,
                id,
                changes,
                reply,
            } => {
                let result = update_header(&db, &spec, &ctx, &id, changes).await;
                log_failure(&spec, "update", &result);
                let _ = reply.send(result);
            }
            WriteOp::SoftDelete {
                spec,
                ctx,
                id,
                reply,
            } => {
                let result = soft_delete(&db, &spec, &ctx, &id).await;
                log_failure(&spec, "soft_delete", &result);
                let _ = reply.send(result);
            }
        }
    }
    trace!("kernel writer actor stopped");
}

fn log_failure<T>(spec: &AggregateSpec, op: &str, result: &Result<T, WriteError>) {
    if let Err(WriteError::Persistence(err)) = result {
        error!(aggregate = %spec.name, op, error = %err, "kernel write failed");
    }
}

// ---------------------------------------------------------------------------
// Value binding
// ---------------------------------------------------------------------------

/// Owned SQLite value converted from a JSON payload value.
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

/// Convert the payload value of `field` for storage in a column of `kind`.
///
/// Decimal columns hold decimal text so amounts keep every digit, including
/// trailing zeros. Exact amounts should arrive as strings; JSON numbers are
/// stored in their shortest textual form.
///
/// # Errors
///
/// [`InputError::InvalidValue`] when an integer or decimal column receives
/// a value of another shape.
fn to_sql(field: &str, kind: FieldKind, value: &Value) -> Result<SqlValue, InputError> {
    let invalid = |expected: &'static str| InputError::InvalidValue {
        field: field.to_owned(),
        expected,
    };
    let converted = match (kind, value) {
        (_, Value::Null) => SqlValue::Null,
        // Json columns always hold JSON text, even for scalars.
        (FieldKind::Json, other) => SqlValue::Text(other.to_string()),
        (FieldKind::Integer, Value::Number(n)) => {
            SqlValue::Int(n.as_i64().ok_or_else(|| invalid("an integer"))?)
        }
        (FieldKind::Integer, _) => return Err(invalid("an integer")),
        (FieldKind::Decimal, Value::Number(n)) => SqlValue::Text(n.to_string()),
        (FieldKind::Decimal, Value::String(s)) if is_decimal_literal(s) => {
            SqlValue::Text(s.clone())
        }
        (FieldKind::Decimal, _) => return Err(invalid("a decimal number or decimal string")),
        (_, Value::Bool(b)) => SqlValue::Bool(*b),
        (_, Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Int(i),
            None => n
                .as_f64()
                .map_or_else(|| SqlValue::Text(n.to_string()), SqlValue::Real),
        },
        (_, Value::String(s)) => SqlValue::Text(s.clone()),
        (_, other) => SqlValue::Text(other.to_string()),
    };
    Ok(converted)
}

/// `[+-]digits[.digits]`, no exponent, no separators.
fn is_decimal_literal(s: &str) -> bool {
    let unsigned = s.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(s);
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    all_digits(whole) && fraction.map_or(true, all_digits)
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(mut query: SqliteQuery<'q>, values: Vec<SqlValue>) -> SqliteQuery<'q> {
    for value in values {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(b),
            SqlValue::Int(i) => query.bind(i),
            SqlValue::Real(r) => query.bind(r),
            SqlValue::Text(s) => query.bind(s),
        };
    }
    query
}

/// Columns and values for one row, in bind order.
#[derive(Debug, Default)]
struct ColumnValues {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl ColumnValues {
    /// Build from a sanitized payload, ignoring keys the schema lacks.
    ///
    /// System fields are skipped here as well, so a [`WriteOp`] built from
    /// an unsanitized map still cannot set them.
    fn from_payload(
        schema: &EntitySchema,
        payload: Map<String, Value>,
    ) -> Result<Self, InputError> {
        let mut row = Self::default();
        for (key, value) in payload {
            if is_system_field(&key) {
                continue;
            }
            if let Some(field) = schema.field(&key) {
                row.values.push(to_sql(&key, field.kind, &value)?);
                row.columns.push(key);
            }
        }
        Ok(row)
    }

    /// Set a kernel column if the schema declares it, replacing any
    /// caller-supplied value.
    fn set(&mut self, schema: &EntitySchema, column: &str, value: SqlValue) {
        if !schema.has_field(column) {
            return;
        }
        if let Some(pos) = self.columns.iter().position(|c| c == column) {
            self.values[pos] = value;
        } else {
            self.columns.push(column.to_owned());
            self.values.push(value);
        }
    }

    /// Whether `column` is present with a non-null value.
    fn has_value(&self, column: &str) -> bool {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|pos| self.values.get(pos))
            .is_some_and(|value| *value != SqlValue::Null)
    }

    fn insert_sql(&self, table: &str) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        )
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn actor_value(ctx: &WriteContext) -> SqlValue {
    ctx.actor
        .as_ref()
        .map_or(SqlValue::Null, |a| SqlValue::Text(a.as_str().to_owned()))
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

async fn create_aggregate(
    db: &SqlitePool,
    spec: &AggregateSpec,
    ctx: &WriteContext,
    header: Map<String, Value>,
    lines: Vec<Map<String, Value>>,
) -> Result<RecordId, WriteError> {
    let header_id = RecordId::generate();
    let now = now_rfc3339();
    let tenant = ctx.tenant.as_str();

    let mut header_row = ColumnValues::from_payload(&spec.header, header)?;
    stamp_new(&mut header_row, &spec.header, ctx, &header_id, &now);

    let mut tx = db.begin().await?;

    let sql = header_row.insert_sql(spec.header.name());
    bind_all(sqlx::query(&sql), header_row.values)
        .execute(&mut *tx)
        .await?;

    for (index, line) in lines.into_iter().enumerate() {
        let mut line_row = ColumnValues::from_payload(&spec.lines, line)?;
        stamp_new(&mut line_row, &spec.lines, ctx, &RecordId::generate(), &now);
        line_row.set(
            &spec.lines,
            &spec.foreign_key,
            SqlValue::Text(header_id.as_str().to_owned()),
        );
        // An explicit null order counts as absent.
        if !line_row.has_value(&spec.order_by) {
            let position = i64::try_from(index).unwrap_or(i64::MAX).saturating_add(1);
            line_row.set(&spec.lines, &spec.order_by, SqlValue::Int(position));
        }

        let sql = line_row.insert_sql(spec.lines.name());
        bind_all(sqlx::query(&sql), line_row.values)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    trace!(aggregate = %spec.name, tenant, id = %header_id, "aggregate created");
    Ok(header_id)
}

/// Set every kernel column of a freshly inserted row.
fn stamp_new(row: &mut ColumnValues, schema: &EntitySchema, ctx: &WriteContext, id: &RecordId, now: &str) {
    row.set(schema, "id", SqlValue::Text(id.as_str().to_owned()));
    row.set(
        schema,
        "org_id",
        SqlValue::Text(ctx.tenant.as_str().to_owned()),
    );
    row.set(schema, "created_at", SqlValue::Text(now.to_owned()));
    row.set(schema, "updated_at", SqlValue::Text(now.to_owned()));
    row.set(schema, "created_by", actor_value(ctx));
    row.set(schema, "updated_by", actor_value(ctx));
    row.set(schema, "version", SqlValue::Int(1));
}

async fn update_header(
    db: &SqlitePool,
    spec: &AggregateSpec,
    ctx: &WriteContext,
    id: &RecordId,
    changes: Map<String, Value>,
) -> Result<i64, WriteError> {
    let table = quote_ident(spec.header.name());
    let row = ColumnValues::from_payload(&spec.header, changes)?;

    if row.columns.is_empty() {
        // Nothing writable survived sanitization: report existence only.
        let sql = format!(
            "SELECT \"version\" FROM {table} \
             WHERE \"org_id\" = ?1 AND \"id\" = ?2 AND \"deleted_at\" IS NULL"
        );
        let current: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(ctx.tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(db)
            .await?;
        return current.map(|(v,)| v).ok_or(WriteError::NotFound);
    }

    // ?1 tenant, ?2 id, ?3 timestamp, ?4 actor, ?5.. changed columns.
    let mut assignments: Vec<String> = row
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote_ident(c), i.saturating_add(5)))
        .collect();
    assignments.push("\"updated_at\" = ?3".to_owned());
    if spec.header.has_field("updated_by") {
        assignments.push("\"updated_by\" = ?4".to_owned());
    }
    assignments.push("\"version\" = \"version\" + 1".to_owned());

    let sql = format!(
        "UPDATE {table} SET {} \
         WHERE \"org_id\" = ?1 AND \"id\" = ?2 AND \"deleted_at\" IS NULL \
         RETURNING \"version\"",
        assignments.join(", ")
    );

    let mut values = vec![
        SqlValue::Text(ctx.tenant.as_str().to_owned()),
        SqlValue::Text(id.as_str().to_owned()),
        SqlValue::Text(now_rfc3339()),
        actor_value(ctx),
    ];
    values.extend(row.values);

    let Some(updated) = bind_all(sqlx::query(&sql), values)
        .fetch_optional(db)
        .await?
    else {
        return Err(WriteError::NotFound);
    };
    let version: i64 = updated.try_get(0)?;
    trace!(aggregate = %spec.name, id = %id, version, "header updated");
    Ok(version)
}

async fn soft_delete(
    db: &SqlitePool,
    spec: &AggregateSpec,
    ctx: &WriteContext,
    id: &RecordId,
) -> Result<(), WriteError> {
    let header_table = quote_ident(spec.header.name());
    let line_table = quote_ident(spec.lines.name());
    let fk = quote_ident(&spec.foreign_key);
    let now = now_rfc3339();

    let header_version = if spec.header.has_field("version") {
        ", \"version\" = \"version\" + 1"
    } else {
        ""
    };
    let line_version = if spec.lines.has_field("version") {
        ", \"version\" = \"version\" + 1"
    } else {
        ""
    };

    let mut tx = db.begin().await?;

    let header_sql = format!(
        "UPDATE {header_table} SET \"deleted_at\" = ?3, \"updated_at\" = ?3{header_version} \
         WHERE \"org_id\" = ?1 AND \"id\" = ?2 AND \"deleted_at\" IS NULL"
    );
    let affected = sqlx::query(&header_sql)
        .bind(ctx.tenant.as_str())
        .bind(id.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if affected == 0 {
        // Dropping the transaction rolls it back.
        return Err(WriteError::NotFound);
    }

    let line_sql = format!(
        "UPDATE {line_table} SET \"deleted_at\" = ?3, \"updated_at\" = ?3{line_version} \
         WHERE \"org_id\" = ?1 AND {fk} = ?2 AND \"deleted_at\" IS NULL"
    );
    let lines = sqlx::query(&line_sql)
        .bind(ctx.tenant.as_str())
        .bind(id.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;
    trace!(aggregate = %spec.name, id = %id, lines, "aggregate soft-deleted");
    Ok(())
}
