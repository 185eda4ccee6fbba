//! Aggregate store with SQLite persistence.
//!
//! The [`Store`] is the kernel's gateway to the aggregate tables. Reads go
//! straight through the connection pool (concurrent). Writes are sanitized
//! in the caller's task and then handed to a single-writer actor backed by
//! an [`mpsc`] channel, which is the only code that sets system fields.

pub mod aggregate;
pub mod writer;

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use self::aggregate::{AggregateReader, HeaderAggregate, ReadError};
use self::writer::{WriteError, WriteOp};
use crate::envelope::Envelope;
use crate::sanitize::Sanitizer;
use crate::schema::registry::{self, AggregateSpec};
use crate::scope::{InputError, RecordId, TenantId, WriteContext};

/// Writer channel capacity, bounded to provide backpressure.
const WRITER_CHANNEL_CAPACITY: usize = 256;

/// Bootstrap schema for the aggregate tables.
pub const BOOTSTRAP_SQL: &str = include_str!("../../migrations/001_kernel_schema.sql");

/// Open (or create) the database at `path` and apply the bootstrap schema.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created, the database
/// cannot be opened, or the bootstrap schema fails to apply.
pub async fn open_pool(path: &Path, max_connections: u32) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create database directory {}", parent.display())
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .pragma("trusted_schema", "OFF")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    apply_bootstrap(&pool)
        .await
        .context("failed to apply kernel bootstrap schema")?;

    Ok(pool)
}

/// Open an existing database at `path` without creating or bootstrapping it.
///
/// For read-only tooling: a mistyped path fails here instead of yielding a
/// fresh empty database.
///
/// # Errors
///
/// Returns an error if no database exists at `path` or it cannot be opened.
pub async fn open_existing(path: &Path, max_connections: u32) -> anyhow::Result<SqlitePool> {
    if !path.is_file() {
        anyhow::bail!(
            "no database at {} (run `erp-kernel init` first)",
            path.display()
        );
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .pragma("trusted_schema", "OFF")
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))
}

/// Open a private in-memory database with the bootstrap schema applied.
///
/// In-memory databases are per connection, so the pool holds exactly one.
///
/// # Errors
///
/// Returns an error if the connection or bootstrap fails.
pub async fn open_in_memory() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("failed to open in-memory database")?;
    apply_bootstrap(&pool)
        .await
        .context("failed to apply kernel bootstrap schema")?;
    Ok(pool)
}

/// Apply [`BOOTSTRAP_SQL`]. Idempotent.
pub async fn apply_bootstrap(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(BOOTSTRAP_SQL).execute(pool).await?;
    Ok(())
}

/// Resolve an aggregate name against the generated registry.
///
/// # Errors
///
/// Returns [`InputError::UnknownAggregate`] for undeclared names.
pub fn aggregate_spec(name: &str) -> Result<AggregateSpec, InputError> {
    registry::aggregate(name).ok_or_else(|| InputError::UnknownAggregate(name.to_owned()))
}

/// Kernel store: tenant-scoped aggregate reads and sanitized writes.
pub struct Store {
    /// Connection pool for reads.
    db: SqlitePool,
    /// Channel to the single-writer actor.
    writer_tx: mpsc::Sender<WriteOp>,
    /// Writer actor join handle (held so we can await on shutdown).
    writer_handle: tokio::task::JoinHandle<()>,
    /// Policy-aware sanitizer applied to every inbound payload.
    sanitizer: Sanitizer,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("policy", &self.sanitizer.policy())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Create a store over `db`, spawning the writer actor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(db: SqlitePool, sanitizer: Sanitizer) -> Self {
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(writer::run_writer(db.clone(), writer_rx));

        info!(policy = sanitizer.policy().as_str(), "kernel store initialised");

        Self {
            db,
            writer_tx,
            writer_handle,
            sanitizer,
        }
    }

    /// Create a header and its lines for `ctx.tenant`. Returns the new id.
    ///
    /// Header and line payloads are sanitized against their own schemas;
    /// the line foreign key and order column are assigned by the kernel.
    ///
    /// # Errors
    ///
    /// [`WriteError::Input`] for an unknown aggregate,
    /// [`WriteError::Rejected`] under the reject policy,
    /// [`WriteError::Persistence`] / [`WriteError::WriterClosed`] when the
    /// store fails.
    pub async fn create_aggregate(
        &self,
        aggregate: &str,
        ctx: &WriteContext,
        header: Map<String, Value>,
        lines: Vec<Map<String, Value>>,
    ) -> Result<RecordId, WriteError> {
        let spec = aggregate_spec(aggregate)?;
        let header = self.sanitizer.apply(&spec.header, header)?;
        let lines = lines
            .into_iter()
            .map(|line| self.sanitizer.apply(&spec.lines, line))
            .collect::<Result<Vec<_>, _>>()?;

        let (reply, rx) = oneshot::channel();
        self.send(WriteOp::CreateAggregate {
            spec,
            ctx: ctx.clone(),
            header,
            lines,
            reply,
        })
        .await?;
        rx.await.map_err(|_| WriteError::WriterClosed)?
    }

    /// Update writable header fields. Returns the header's version.
    ///
    /// When nothing writable survives sanitization no row is touched and
    /// the current version is returned.
    ///
    /// # Errors
    ///
    /// [`WriteError::NotFound`] when no live header matches tenant + id;
    /// otherwise as [`create_aggregate`](Self::create_aggregate).
    pub async fn update_header(
        &self,
        aggregate: &str,
        ctx: &WriteContext,
        id: &RecordId,
        changes: Map<String, Value>,
    ) -> Result<i64, WriteError> {
        let spec = aggregate_spec(aggregate)?;
        let changes = self.sanitizer.apply(&spec.header, changes)?;

        let (reply, rx) = oneshot::channel();
        self.send(WriteOp::UpdateHeader {
            spec,
            ctx: ctx.clone(),
            id: id.clone(),
            changes,
            reply,
        })
        .await?;
        rx.await.map_err(|_| WriteError::WriterClosed)?
    }

    /// Soft-delete a header and its lines.
    ///
    /// # Errors
    ///
    /// [`WriteError::NotFound`] when no live header matches tenant + id.
    pub async fn soft_delete(
        &self,
        aggregate: &str,
        ctx: &WriteContext,
        id: &RecordId,
    ) -> Result<(), WriteError> {
        let spec = aggregate_spec(aggregate)?;

        let (reply, rx) = oneshot::channel();
        self.send(WriteOp::SoftDelete {
            spec,
            ctx: ctx.clone(),
            id: id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| WriteError::WriterClosed)?
    }

    async fn send(&self, op: WriteOp) -> Result<(), WriteError> {
        self.writer_tx
            .send(op)
            .await
            .map_err(|_| WriteError::WriterClosed)
    }

    /// The sanitizer applied to inbound payloads.
    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Returns a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Gracefully shut down the writer actor.
    ///
    /// Drops the sender channel and awaits the writer task to drain.
    pub async fn shutdown(self) {
        drop(self.writer_tx);
        let _ = self.writer_handle.await;
        info!("kernel store shut down");
    }
}

#[async_trait]
impl AggregateReader for Store {
    async fn read_aggregate(
        &self,
        aggregate: &str,
        tenant: &TenantId,
        id: &RecordId,
    ) -> Result<HeaderAggregate, ReadError> {
        let spec = aggregate_spec(aggregate)?;
        aggregate::read_aggregate(&self.db, &spec, tenant, id).await
    }
}

/// Validate raw identifiers and read an aggregate into an [`Envelope`].
///
/// This is the whole read path a generated route handler needs. Persistence
/// failures are logged here with their cause; the envelope carries only the
/// fixed public message.
pub async fn fetch_aggregate(
    reader: &dyn AggregateReader,
    aggregate: &str,
    tenant: &str,
    id: &str,
) -> Envelope<HeaderAggregate> {
    let result = async {
        let tenant = TenantId::parse(tenant)?;
        let id = RecordId::parse(id)?;
        reader.read_aggregate(aggregate, &tenant, &id).await
    }
    .await;

    if let Err(ReadError::Persistence(err)) = &result {
        error!(aggregate, error = %err, "aggregate read failed");
    }
    Envelope::from_result(result)
}
