//! motif-mine - batch jobs for the motif analysis database
//!
//! Builds the derived similarity tables from extracted pattern occurrences and
//! maintains the staged extraction cache.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use motif_common::cache::StagedCache;
use motif_common::config::{resolve_root_folder, MotifConfig, ROOT_ENV_VAR};
use motif_common::db::init::init_database;
use motif_common::db::seed_configurations;
use motif_common::lock::force_unlock;
use motif_common::{Error, JobSummary, Tolerance};
use motif_mine::index::build_pattern_index;
use motif_mine::logging::startup_filter;
use motif_mine::note_pairs::build_note_pairs;
use motif_mine::pairs::{mine_with_dictionary, Granularity, MinerOptions, PatternDictionary};
use motif_mine::reconcile::{reconcile_table, OccurrenceTable, ReconcileOptions};
use sqlx::SqlitePool;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Derived tables that can hold an advisory lock
const LOCKABLE_TABLES: [&str; 5] = [
    "pattern_index",
    "pattern_index_configs",
    "shared_patterns",
    "shared_pattern_sources",
    "note_pairs",
];

#[derive(Parser, Debug)]
#[command(name = "motif-mine")]
#[command(about = "Pattern index, pair mining and note reconciliation for the motif database")]
#[command(version)]
struct Cli {
    /// Root folder holding the database and cache
    #[arg(short, long, env = ROOT_ENV_VAR, global = true)]
    root_folder: Option<PathBuf>,

    /// TOML configuration file (defaults to the platform config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect or prune the staged extraction cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    #[command(flatten)]
    Database(DbCommand),
}

/// Commands that work on the database
#[derive(Subcommand, Debug)]
enum DbCommand {
    /// Create the database and every table
    InitDb,
    /// Insert the full Configuration catalogue
    SeedConfigurations,
    /// Rebuild pattern_index and pattern_index_configs
    RebuildIndex,
    /// Rebuild shared_patterns and/or shared_pattern_sources
    RebuildPairs(PairArgs),
    /// Rebuild note_pairs
    NotePairs {
        /// Restrict to these pieces
        #[arg(long = "piece", value_name = "PIECE_ID")]
        pieces: Vec<i64>,
    },
    /// Back-fill note references on occurrence rows
    Reconcile(ReconcileArgs),
    /// Remove a stale advisory lock left by a crashed job
    Unlock {
        /// Table to unlock, or "all"
        table: String,
    },
}

#[derive(Args, Debug)]
struct PairArgs {
    #[arg(long, value_enum, default_value_t = PairTarget::All)]
    granularity: PairTarget,

    /// Continue from the last committed piece pair if the source is unchanged
    #[arg(long)]
    resume: bool,

    /// Piece pairs per committed batch (overrides the config file)
    #[arg(long)]
    batch_pairs: Option<usize>,
}

#[derive(Args, Debug)]
struct ReconcileArgs {
    #[arg(long, value_enum, default_value_t = ReconcileTarget::All)]
    table: ReconcileTarget,

    /// Maximum onset difference (overrides the config file)
    #[arg(long)]
    tolerance: Option<Tolerance>,

    /// Row updates per committed batch (overrides the config file)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Restrict to these pieces
    #[arg(long = "piece", value_name = "PIECE_ID")]
    pieces: Vec<i64>,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Entry counts and disk usage
    Stats,
    /// List stages, a stage's Configuration slugs, or a slug's items
    List {
        #[arg(long)]
        stage: Option<String>,
        #[arg(long, requires = "stage")]
        slug: Option<String>,
    },
    /// Remove every entry under one stage and Configuration slug
    Clear {
        #[arg(long)]
        stage: String,
        #[arg(long)]
        slug: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PairTarget {
    Collapsed,
    Sources,
    All,
}

impl PairTarget {
    fn granularities(self) -> Vec<Granularity> {
        match self {
            PairTarget::Collapsed => vec![Granularity::Collapsed],
            PairTarget::Sources => vec![Granularity::Sources],
            PairTarget::All => Granularity::ALL.to_vec(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ReconcileTarget {
    Patterns,
    Intervals,
    All,
}

impl ReconcileTarget {
    fn tables(self) -> Vec<OccurrenceTable> {
        match self {
            ReconcileTarget::Patterns => vec![OccurrenceTable::Patterns],
            ReconcileTarget::Intervals => vec![OccurrenceTable::Intervals],
            ReconcileTarget::All => OccurrenceTable::ALL.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging starts before the config file is read
    let (filter, log_level) = startup_filter(EnvFilter::try_from_default_env().ok());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    info!(
        "Starting motif-mine v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = match &cli.config {
        Some(path) => MotifConfig::load(path),
        None => MotifConfig::load_default(),
    }
    .context("Failed to load configuration")?;

    log_level
        .apply_configured(&config.logging.level)
        .context("Failed to apply configured log level")?;

    let root = resolve_root_folder(cli.root_folder.as_deref(), ROOT_ENV_VAR, &config);
    info!("Root folder: {}", root.display());

    match cli.command {
        Command::Cache { command } => run_cache(command, &config, &root),
        Command::Database(command) => {
            let db_path = config.database_path(&root);
            info!("Database path: {}", db_path.display());
            let pool = init_database(&db_path)
                .await
                .with_context(|| format!("Failed to open database {}", db_path.display()))?;
            let result = run_db_command(command, &config, &pool).await;
            pool.close().await;
            result
        }
    }
}

async fn run_db_command(command: DbCommand, config: &MotifConfig, pool: &SqlitePool) -> Result<()> {
    match command {
        DbCommand::InitDb => {
            println!("Database ready");
        }
        DbCommand::SeedConfigurations => {
            let summary = seed_configurations(pool)
                .await
                .context("Failed to seed configurations")?;
            print_summary("seed-configurations", &summary);
        }
        DbCommand::RebuildIndex => {
            if let Some(report) = allow_empty(build_pattern_index(pool).await)? {
                println!(
                    "pattern_index: {} values, {} breakdown rows, {} occurrences, {} values in several configurations",
                    report.values,
                    report.breakdown_rows,
                    report.occurrences,
                    report.stats.multi_config_values
                );
                print_summary("rebuild-index", &report.summary);
            }
        }
        DbCommand::RebuildPairs(args) => {
            let options = MinerOptions {
                batch_pairs: args.batch_pairs.unwrap_or(config.miner.batch_pairs),
                resume: args.resume,
            };
            let dict = PatternDictionary::load(pool)
                .await
                .context("Failed to load pattern occurrences")?;
            for granularity in args.granularity.granularities() {
                let result = mine_with_dictionary(pool, &dict, granularity, options).await;
                if let Some(report) = allow_empty(result)? {
                    println!(
                        "{}: {} records, {} pairs ({} with shared values), {} pairs already committed",
                        report.table,
                        report.records_written,
                        report.pairs_processed,
                        report.pairs_with_shared,
                        report.pairs_skipped
                    );
                    print_summary(report.table, &report.summary);
                }
            }
        }
        DbCommand::NotePairs { pieces } => {
            let scope = (!pieces.is_empty()).then_some(pieces.as_slice());
            if let Some(report) = allow_empty(build_note_pairs(pool, scope).await)? {
                let s = report.stats;
                println!(
                    "note_pairs: {} pairs from {} notes ({} self, {} same piece, {} same composer, {} same voice)",
                    s.total, report.notes, s.self_pairs, s.same_piece, s.same_composer, s.same_voice
                );
                if !report.integrity.is_clean() {
                    println!(
                        "  flag check: {} of {} rows disagree with notes",
                        report.integrity.mismatched, report.integrity.checked
                    );
                }
                print_summary("note-pairs", &report.summary);
            }
        }
        DbCommand::Reconcile(args) => {
            let options = ReconcileOptions {
                tolerance: args.tolerance.unwrap_or(config.reconcile.tolerance),
                batch_size: args.batch_size.unwrap_or(config.reconcile.batch_size),
                piece_ids: (!args.pieces.is_empty()).then_some(args.pieces),
            };
            info!(tolerance = %options.tolerance, batch_size = options.batch_size, "Reconciling");
            for target in args.table.tables() {
                let report = reconcile_table(pool, target, &options)
                    .await
                    .with_context(|| format!("Failed to reconcile {}", target))?;
                println!(
                    "{}: {} updated, {} already resolved, {} unmatched",
                    report.table, report.updated, report.already_resolved, report.unmatched
                );
                if !report.failed_pieces.is_empty() {
                    println!("  failed pieces: {:?}", report.failed_pieces);
                }
                for sample in &report.unmatched_samples {
                    println!(
                        "  unmatched row {} (piece {}, voice {}, onset {})",
                        sample.row_id, sample.piece_id, sample.voice, sample.onset
                    );
                }
                print_summary(target.table(), &report.summary);
            }
        }
        DbCommand::Unlock { table } => {
            let tables: Vec<&str> = if table == "all" {
                LOCKABLE_TABLES.to_vec()
            } else if LOCKABLE_TABLES.contains(&table.as_str()) {
                vec![table.as_str()]
            } else {
                anyhow::bail!(
                    "Unknown table '{}'; expected one of {} or \"all\"",
                    table,
                    LOCKABLE_TABLES.join(", ")
                );
            };
            for table in tables {
                let removed = force_unlock(pool, table).await?;
                println!("{}: {}", table, if removed { "unlocked" } else { "not locked" });
            }
        }
    }
    Ok(())
}

fn run_cache(command: CacheCommand, config: &MotifConfig, root: &std::path::Path) -> Result<()> {
    let cache_root = config.cache_root(root);
    let cache = StagedCache::open(&cache_root)
        .with_context(|| format!("Failed to open cache {}", cache_root.display()))?;

    match command {
        CacheCommand::Stats => {
            let stats = cache.stats()?;
            println!("{} entries, {} bytes", stats.total_entries, stats.total_bytes);
            for (stage, count) in &stats.per_stage {
                println!("  {}: {}", stage, count);
            }
            for (config_key, count) in &stats.per_config {
                println!("    {}: {}", config_key, count);
            }
        }
        CacheCommand::List { stage, slug } => {
            let names = match (stage, slug) {
                (Some(stage), Some(slug)) => cache.list_items(&stage, &slug)?,
                (Some(stage), None) => cache.list_config_slugs(&stage)?,
                _ => cache.list_stages()?,
            };
            for name in names {
                println!("{}", name);
            }
        }
        CacheCommand::Clear { stage, slug } => {
            let removed = cache.clear(&stage, &slug)?;
            println!("Removed {} entries from {}/{}", removed, stage, slug);
        }
    }
    Ok(())
}

/// An empty source ends the job early with a warning instead of failing
fn allow_empty<T>(result: motif_common::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::SourceEmpty(what)) => {
            warn!("Nothing to do: {}", what);
            println!("Nothing to do: {}", what);
            print_summary("skipped", &JobSummary::default());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_summary(job: &str, summary: &JobSummary) {
    println!("{}: {}", job, summary);
}
