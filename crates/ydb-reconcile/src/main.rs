//! ydb-reconcile CLI
//!
//! Command-line tool for planning YDB schema changes from JSON snapshots.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ydb_reconcile::prelude::*;

/// Declarative schema reconciliation for YDB.
#[derive(Parser)]
#[command(name = "ydb-reconcile")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database endpoint host and port.
    #[arg(short, long, env = "YDB_ENDPOINT", default_value = "localhost:2136")]
    endpoint: String,

    /// Database path.
    #[arg(short, long, env = "YDB_DATABASE", default_value = "/local")]
    database: String,

    /// Connect over TLS (grpcs://).
    #[arg(long)]
    tls: bool,

    /// Directory holding observed-state snapshots.
    #[arg(short, long, default_value = "snapshots")]
    snapshots: PathBuf,

    /// Restrict the allowed codecs (comma-separated).
    #[arg(long, value_delimiter = ',')]
    codecs: Vec<String>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the statements that bring a table to its desired state.
    PlanTable {
        /// JSON file with the desired table.
        #[arg(long)]
        desired: PathBuf,

        /// Resource handle (built from --endpoint/--database if not specified).
        #[arg(long)]
        id: Option<String>,

        /// Do not drop an index before re-adding it with a new structure.
        #[arg(long)]
        keep_changed_indexes: bool,

        /// Ignore TTL, partitioning and replication drift.
        #[arg(long)]
        ignore_settings: bool,
    },

    /// Print the statements that bring a topic to its desired state.
    PlanTopic {
        /// JSON file with the desired topic.
        #[arg(long)]
        desired: PathBuf,

        /// Resource handle (built from --endpoint/--database if not specified).
        #[arg(long)]
        id: Option<String>,
    },

    /// Print the resource handle for an object path.
    EncodeId {
        /// Object path relative to the database.
        #[arg(long)]
        path: String,
    },

    /// Print the parts of a resource handle.
    DecodeId {
        /// The handle to decode.
        handle: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let codecs = if cli.codecs.is_empty() {
        CodecTable::new()
    } else {
        CodecTable::with_allowed(CodecTable::standard().parse_list(&cli.codecs)?)
    };

    match &cli.command {
        Commands::PlanTable {
            desired,
            id,
            keep_changed_indexes,
            ignore_settings,
        } => {
            let desired: TableSpec = load_json(desired).await?;
            let id = resolve_id(&cli, id.as_deref(), &desired.path)?;

            let mut options = ReconcilerOptions::new();
            if *keep_changed_indexes {
                options = options.keep_changed_indexes();
            }
            if *ignore_settings {
                options = options.without_settings();
            }

            let describer = SnapshotDescriber::new(&cli.snapshots);
            let reconciler = Reconciler::new(YqlDialect::new(), describer)
                .with_codecs(&codecs)
                .with_options(options);
            let plan = reconciler.plan_table(&id, &desired).await?;
            print_plan(&plan);
        }

        Commands::PlanTopic { desired, id } => {
            let desired: TopicSpecInput = load_json(desired).await?;
            let id = resolve_id(&cli, id.as_deref(), &desired.path)?;

            let describer = SnapshotDescriber::new(&cli.snapshots);
            let reconciler = Reconciler::new(YqlDialect::new(), describer).with_codecs(&codecs);
            let plan = reconciler.plan_topic(&id, &desired).await?;
            print_plan(&plan);
        }

        Commands::EncodeId { path } => {
            let id = resolve_id(&cli, None, path)?;
            println!("{}", id.encode());
        }

        Commands::DecodeId { handle } => {
            let id = EntityIdentifier::decode(handle)?;
            println!("endpoint: {}", id.endpoint_host());
            println!("tls:      {}", id.use_tls());
            println!("database: {}", id.database_path());
            println!("path:     {}", id.entity_path());
        }
    }

    Ok(())
}

async fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn resolve_id(cli: &Cli, handle: Option<&str>, path: &str) -> anyhow::Result<EntityIdentifier> {
    let id = match handle {
        Some(raw) => EntityIdentifier::decode(raw)?,
        None => EntityIdentifier::new(&cli.endpoint, cli.tls, &cli.database, path)?,
    };
    Ok(id)
}

fn print_plan(plan: &Plan) {
    match plan {
        Plan::UpToDate => info!("Nothing to do."),
        Plan::Create(_) | Plan::Alter(_) => {
            for statement in plan.statements() {
                println!("{};", statement.trim_end());
            }
        }
    }
}
