//! Pairwise similarity miner
//!
//! For every unordered piece pair (a < b) finds the pattern values both pieces
//! contain, at two granularities:
//! - [`Granularity::Collapsed`]: all Configurations merged, into `shared_patterns`
//! - [`Granularity::Sources`]: per (Configuration A, Configuration B), into
//!   `shared_pattern_sources`
//!
//! Each run is a destructive refresh committed in batches of piece pairs. The
//! batch transaction also advances the job's checkpoint, so a run started with
//! `resume` continues after the last committed pair as long as the source rows
//! are unchanged.

mod dictionary;
mod progress;
mod records;

pub use dictionary::{shared_values, PatternDictionary, ValueMap};
pub use progress::{load_progress, JobProgress};
pub use records::{
    collapsed_records, source_records, PairRecord, SharedPatternRecord, SharedSourceRecord,
};

use crate::LOCK_RETRY_MS;
use motif_common::config::DEFAULT_BATCH_PAIRS;
use motif_common::lock::with_table_locks;
use motif_common::retry::retry_on_lock;
use motif_common::{Error, JobSummary, Result};
use progress::{mark_completed, record_progress, restart_job};
use records::insert_record;
use sqlx::SqlitePool;
use std::fmt;
use tracing::{debug, info, warn};

const HOLDER: &str = "rebuild-pairs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Collapsed,
    Sources,
}

impl Granularity {
    pub const ALL: [Granularity; 2] = [Granularity::Collapsed, Granularity::Sources];

    /// Output table, also used as the job name for locks and checkpoints
    pub fn table(self) -> &'static str {
        match self {
            Granularity::Collapsed => "shared_patterns",
            Granularity::Sources => "shared_pattern_sources",
        }
    }

    fn records(self, dict: &PatternDictionary, a: i64, b: i64) -> Vec<PairRecord> {
        match self {
            Granularity::Collapsed => collapsed_records(dict, a, b)
                .into_iter()
                .map(PairRecord::Shared)
                .collect(),
            Granularity::Sources => source_records(dict, a, b)
                .into_iter()
                .map(PairRecord::Source)
                .collect(),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinerOptions {
    /// Piece pairs per committed batch
    pub batch_pairs: usize,
    /// Continue from the saved checkpoint when the source is unchanged
    pub resume: bool,
}

impl Default for MinerOptions {
    fn default() -> Self {
        Self {
            batch_pairs: DEFAULT_BATCH_PAIRS,
            resume: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinerReport {
    pub table: &'static str,
    pub records_written: u64,
    pub pairs_processed: u64,
    pub pairs_with_shared: u64,
    /// Pairs already committed by an earlier run
    pub pairs_skipped: u64,
    pub batches_committed: u64,
    pub resumed: bool,
    pub summary: JobSummary,
}

/// Load the dictionary and run one miner
pub async fn mine_shared_patterns(
    pool: &SqlitePool,
    granularity: Granularity,
    options: MinerOptions,
) -> Result<MinerReport> {
    let dict = PatternDictionary::load(pool).await?;
    mine_with_dictionary(pool, &dict, granularity, options).await
}

/// Run one miner against an already loaded dictionary.
///
/// Returns [`Error::SourceEmpty`] without touching the output table when the
/// dictionary holds no occurrences.
pub async fn mine_with_dictionary(
    pool: &SqlitePool,
    dict: &PatternDictionary,
    granularity: Granularity,
    options: MinerOptions,
) -> Result<MinerReport> {
    if dict.occurrences == 0 {
        warn!(table = granularity.table(), "No pattern occurrences to mine");
        return Err(Error::SourceEmpty(
            "pattern_occurrences has no rows with a known Configuration".to_string(),
        ));
    }

    let table = granularity.table();
    with_table_locks(pool, &[table], HOLDER, || run(pool, dict, granularity, options)).await
}

async fn run(
    pool: &SqlitePool,
    dict: &PatternDictionary,
    granularity: Granularity,
    options: MinerOptions,
) -> Result<MinerReport> {
    let table = granularity.table();
    let job = table;
    let mut report = MinerReport {
        table,
        ..Default::default()
    };

    let saved = if options.resume {
        load_progress(pool, job).await?
    } else {
        None
    };

    let resume_after = match saved {
        Some(progress) if progress.source_fingerprint == dict.fingerprint => {
            report.resumed = true;
            if progress.completed {
                info!(table, "Already complete for the current source, nothing to do");
                report.pairs_skipped = dict.pair_count();
                report.summary.skipped = report.pairs_skipped;
                return Ok(report);
            }
            info!(table, last_pair = ?progress.last_pair, "Resuming from checkpoint");
            progress.last_pair
        }
        Some(progress) => {
            warn!(
                table,
                saved = %progress.source_fingerprint,
                current = %dict.fingerprint,
                "Source changed since checkpoint, restarting"
            );
            let cleared = restart_job(pool, job, table, &dict.fingerprint).await?;
            info!(table, cleared, "Cleared previous results");
            None
        }
        None => {
            let cleared = restart_job(pool, job, table, &dict.fingerprint).await?;
            info!(table, cleared, "Cleared previous results");
            None
        }
    };

    let batch_limit = options.batch_pairs.max(1);
    let total_pairs = dict.pair_count();
    let mut batch: Vec<PairRecord> = Vec::new();
    let mut pairs_in_batch = 0usize;
    let mut last_pair = None;

    for pair in dict.piece_pairs() {
        if resume_after.is_some_and(|done| pair <= done) {
            report.pairs_skipped += 1;
            continue;
        }

        let records = granularity.records(dict, pair.0, pair.1);
        if !records.is_empty() {
            report.pairs_with_shared += 1;
        }
        report.pairs_processed += 1;
        batch.extend(records);
        pairs_in_batch += 1;
        last_pair = Some(pair);

        if pairs_in_batch >= batch_limit {
            commit_batch(pool, job, &batch, pair, false).await?;
            report.records_written += batch.len() as u64;
            report.batches_committed += 1;
            debug!(
                table,
                done = report.pairs_processed + report.pairs_skipped,
                total = total_pairs,
                "Committed pair batch"
            );
            batch.clear();
            pairs_in_batch = 0;
        }
    }

    match last_pair {
        Some(pair) if pairs_in_batch > 0 => {
            commit_batch(pool, job, &batch, pair, true).await?;
            report.records_written += batch.len() as u64;
            report.batches_committed += 1;
        }
        _ => mark_completed(pool, job).await?,
    }

    report.summary = JobSummary {
        processed: report.pairs_processed,
        skipped: report.pairs_skipped,
        errored: 0,
    };

    info!(
        table,
        records = report.records_written,
        pairs = report.pairs_processed,
        pairs_with_shared = report.pairs_with_shared,
        skipped = report.pairs_skipped,
        "Pair mining complete"
    );
    Ok(report)
}

async fn commit_batch(
    pool: &SqlitePool,
    job: &str,
    records: &[PairRecord],
    last_pair: (i64, i64),
    completed: bool,
) -> Result<()> {
    retry_on_lock("pair batch", LOCK_RETRY_MS, move || {
        write_batch(pool, job, records, last_pair, completed)
    })
    .await
}

/// Records and checkpoint in one transaction. A constraint failure rolls
/// both back.
async fn write_batch(
    pool: &SqlitePool,
    job: &str,
    records: &[PairRecord],
    last_pair: (i64, i64),
    completed: bool,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for record in records {
        insert_record(&mut tx, record).await?;
    }
    record_progress(&mut tx, job, last_pair, completed).await?;
    tx.commit().await?;
    Ok(())
}
