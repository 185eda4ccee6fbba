//! erp-kernel CLI entry point.
//!
//! Operator tooling around the kernel library: bootstrap the database,
//! inspect entity allowlists, dry-run sanitization, and read aggregates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::info;

use erp_kernel::config::{default_config_path, load_config, Config};
use erp_kernel::sanitize::{AllowlistCache, SanitizePolicy, Sanitizer};
use erp_kernel::schema::registry;
use erp_kernel::scope::InputError;
use erp_kernel::store::{self, fetch_aggregate, Store};

/// erp-kernel: write sanitization and tenant-scoped aggregate reads.
#[derive(Parser)]
#[command(name = "erp-kernel", version, about)]
struct Cli {
    /// Config file (default `~/.erp-kernel/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Create the database and apply the bootstrap schema.
    Init,
    /// List registered entities and aggregates.
    Entities,
    /// Print the writable allowlist of an entity.
    Fields {
        /// Entity name.
        entity: String,
    },
    /// Sanitize a JSON object against an entity and print the result.
    Sanitize {
        /// Entity name.
        entity: String,
        /// JSON object payload.
        payload: String,
        /// Reject the payload instead of dropping non-writable keys.
        #[arg(long)]
        strict: bool,
    },
    /// Read one aggregate and print the result envelope.
    Show {
        /// Tenant (organization) id.
        tenant: String,
        /// Aggregate name.
        aggregate: String,
        /// Header id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;
    let _logging_guard = match &config.logging.dir {
        Some(dir) => Some(erp_kernel::logging::init_file(dir, &config.logging.level)?),
        None => {
            erp_kernel::logging::init_cli(&config.logging.level);
            None
        }
    };

    match cli.command {
        Command::Init => handle_init(&config).await,
        Command::Entities => {
            handle_entities();
            Ok(())
        }
        Command::Fields { entity } => handle_fields(&entity),
        Command::Sanitize {
            entity,
            payload,
            strict,
        } => handle_sanitize(&config, &entity, &payload, strict),
        Command::Show {
            tenant,
            aggregate,
            id,
        } => handle_show(&config, &tenant, &aggregate, &id).await,
    }
}

fn resolve_config(explicit: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    load_config(&path)
}

/// Create the database file and apply the bootstrap schema.
async fn handle_init(config: &Config) -> anyhow::Result<()> {
    let pool = store::open_pool(&config.database.path, config.database.max_connections).await?;
    pool.close().await;
    info!(path = %config.database.path.display(), "database initialised");
    println!("initialised {}", config.database.path.display());
    Ok(())
}

fn handle_entities() {
    for name in registry::entity_names() {
        println!("entity    {name}");
    }
    for name in registry::aggregate_names() {
        println!("aggregate {name}");
    }
}

fn handle_fields(entity: &str) -> anyhow::Result<()> {
    let schema = registry::entity(entity)
        .ok_or_else(|| InputError::UnknownEntity(entity.to_owned()))?;
    let cache = AllowlistCache::new();
    for field in cache.writable(&schema).iter() {
        println!("{field}");
    }
    Ok(())
}

fn handle_sanitize(
    config: &Config,
    entity: &str,
    payload: &str,
    strict: bool,
) -> anyhow::Result<()> {
    let schema = registry::entity(entity)
        .ok_or_else(|| InputError::UnknownEntity(entity.to_owned()))?;
    let input: Map<String, Value> =
        serde_json::from_str(payload).context("payload must be a JSON object")?;

    let policy = if strict {
        SanitizePolicy::Reject
    } else {
        config.sanitize.policy
    };
    let sanitizer = Sanitizer::new(Arc::new(AllowlistCache::new()), policy);
    let output = sanitizer.apply(&schema, input)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Read an aggregate and print its envelope as JSON.
async fn handle_show(
    config: &Config,
    tenant: &str,
    aggregate: &str,
    id: &str,
) -> anyhow::Result<()> {
    let pool =
        store::open_existing(&config.database.path, config.database.max_connections).await?;
    let sanitizer = Sanitizer::new(Arc::new(AllowlistCache::new()), config.sanitize.policy);
    let store = Store::new(pool, sanitizer);

    let envelope = fetch_aggregate(&store, aggregate, tenant, id).await;
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    store.shutdown().await;
    Ok(())
}
