//! nda-function - warehouse synchronization CLI
//!
//! Copies upstream analysis feeds into the warehouse, records named groups
//! over the copied rows and builds per-recording summaries.
//!
//! Exit status 2 means a confirmation gate was declined and nothing was
//! written for that variant.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nda_common::config::{resolve_config_path, ConfirmPolicyKind, TomlConfig};
use nda_function::catalog::ScanCatalog;
use nda_function::config::EngineSettings;
use nda_function::fill::fill_aggregates;
use nda_function::groups::{GroupAggregator, GroupKind};
use nda_function::hash_identity::GroupKey;
use nda_function::populator::{policy_for, Populator};
use nda_function::source::{SourceRegistry, SqliteConnector};
use nda_function::summary::{set_tuning_curves, summarize_pending, SummaryKind};
use nda_function::SyncContext;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MODULE_NAME: &str = "nda-function";
const EXIT_DECLINED: u8 = 2;

/// Command-line arguments for nda-function
#[derive(Parser, Debug)]
#[command(name = "nda-function")]
#[command(about = "Synchronize functional analysis feeds into the NDA warehouse")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "NDA_CONFIG")]
    config: Option<PathBuf>,

    /// Approve every confirmation gate
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the warehouse database and seed settings
    Init,
    /// Copy new recordings and their units from the upstream catalog
    SyncCatalog,
    /// Copy new upstream rows into one aggregate (or all of them)
    Fill {
        #[arg(value_enum)]
        aggregate: AggregateArg,
    },
    /// Record a named group
    Group {
        /// Group kind (scan_set, stim_type_grp, orientation_scan_set, ...)
        kind: GroupKind,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Member keys: scans as `animal-session-idx`, stimulus types, or aggregate hashes
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Summarize every aggregate row that has no summary yet
    Summarize {
        #[arg(value_enum)]
        kind: SummaryArg,
    },
    /// Print the groups recorded under a hash
    ShowGroup { kind: GroupKind, hash: String },
    /// Print the tuning curves of an orientation scan set
    TuningCurves { name: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum AggregateArg {
    Orientation,
    Oracle,
    DynamicModel,
    DynamicModelScore,
    RespCorr,
    All,
}

impl AggregateArg {
    /// Aggregates to fill, models before their scores and scan sets
    fn names(self) -> Vec<&'static str> {
        match self {
            AggregateArg::Orientation => vec!["orientation"],
            AggregateArg::Oracle => vec!["oracle"],
            AggregateArg::DynamicModel => vec!["dynamic_model"],
            AggregateArg::DynamicModelScore => vec!["dynamic_model_score"],
            AggregateArg::RespCorr => vec!["resp_corr"],
            AggregateArg::All => nda_function::aggregate::AGGREGATES.to_vec(),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SummaryArg {
    Orientation,
    Oracle,
}

impl From<SummaryArg> for SummaryKind {
    fn from(arg: SummaryArg) -> Self {
        match arg {
            SummaryArg::Orientation => SummaryKind::Orientation,
            SummaryArg::Oracle => SummaryKind::Oracle,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = TomlConfig::load_or_default(args.config.as_deref(), MODULE_NAME)
        .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting {} v{} ({} {}, built {})",
        MODULE_NAME,
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );
    match resolve_config_path(args.config.as_deref(), MODULE_NAME) {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: compiled defaults"),
    }

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let pool = nda_common::db::init_database(&db_path)
        .await
        .context("Failed to open warehouse database")?;

    let mut settings = EngineSettings::apply_toml(&pool, &config).await?;
    if args.yes {
        settings.confirm_policy = ConfirmPolicyKind::AutoApprove;
    }
    let policy = policy_for(settings.confirm_policy);

    let upstream = config.upstream_folder();
    info!("Upstream schemas: {}", upstream.display());
    let sources = Arc::new(SourceRegistry::new(Arc::new(SqliteConnector::new(upstream))));
    let ctx = SyncContext::new(pool, sources, settings);

    match args.command {
        Command::Init => {
            info!("Warehouse ready");
        }
        Command::SyncCatalog => {
            let report = Populator::new(&ctx, policy.as_ref()).sync(&ScanCatalog).await?;
            print_json(&report)?;
        }
        Command::Fill { aggregate } => {
            let run = fill_aggregates(&ctx, &aggregate.names(), policy.as_ref()).await?;
            print_json(&run)?;

            if run.declined() {
                warn!("Confirmation declined, no changes made for the declined variants");
                return Ok(ExitCode::from(EXIT_DECLINED));
            }
            if !run.is_clean() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Group {
            kind,
            name,
            description,
            keys,
        } => {
            let group = GroupAggregator::new(&ctx).fill(kind, &keys, &name, &description).await?;
            print_json(&group)?;
        }
        Command::Summarize { kind } => {
            let report = summarize_pending(&ctx, kind.into()).await?;
            print_json(&report)?;
            if !report.failed.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::ShowGroup { kind, hash } => {
            let key = GroupKey::from_stored(hash)?;
            let groups = GroupAggregator::new(&ctx).load_all(kind, &key).await?;
            print_json(&groups)?;
        }
        Command::TuningCurves { name } => {
            let aggregator = GroupAggregator::new(&ctx);
            let group = aggregator.load_by_name(GroupKind::OrientationScanSet, &name).await?;
            print_json(&set_tuning_curves(&ctx, &group).await?)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
