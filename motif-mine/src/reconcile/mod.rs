//! Fuzzy join reconciler
//!
//! Back-fills `note_id` on occurrence rows by matching each unresolved row to
//! the canonical note of the same piece and voice with the nearest onset.
//! Pieces are processed one at a time in ascending id order. Every UPDATE is
//! guarded by `note_id IS NULL`, so a reference once written is never
//! replaced and rerunning only ever shrinks the unmatched set.
//!
//! A piece whose batch fails is logged and counted as errored; the run
//! moves on to the next piece.

mod matcher;

pub use matcher::{match_bucket, NoteOnset, PendingRow, RowMatch};

use crate::LOCK_RETRY_MS;
use motif_common::config::DEFAULT_BATCH_SIZE;
use motif_common::retry::retry_on_lock;
use motif_common::{JobSummary, Result, Tolerance};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// Unmatched rows kept as examples in the report
pub const MAX_UNMATCHED_SAMPLES: usize = 5;

/// Occurrence tables carrying a nullable note reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OccurrenceTable {
    Patterns,
    Intervals,
}

impl OccurrenceTable {
    pub const ALL: [OccurrenceTable; 2] = [OccurrenceTable::Patterns, OccurrenceTable::Intervals];

    pub fn table(self) -> &'static str {
        match self {
            OccurrenceTable::Patterns => "pattern_occurrences",
            OccurrenceTable::Intervals => "interval_occurrences",
        }
    }

    fn key_column(self) -> &'static str {
        match self {
            OccurrenceTable::Patterns => "occurrence_id",
            OccurrenceTable::Intervals => "interval_id",
        }
    }
}

impl fmt::Display for OccurrenceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOptions {
    pub tolerance: Tolerance,
    /// Row updates per committed transaction
    pub batch_size: usize,
    /// Restrict to these pieces; `None` means every piece
    pub piece_ids: Option<Vec<i64>>,
}

impl ReconcileOptions {
    pub fn new(tolerance: Tolerance) -> Self {
        Self {
            tolerance,
            batch_size: DEFAULT_BATCH_SIZE,
            piece_ids: None,
        }
    }

    fn in_scope(&self, piece_id: i64) -> bool {
        self.piece_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&piece_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UnmatchedSample {
    pub row_id: i64,
    pub piece_id: i64,
    pub voice: i64,
    pub onset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub table: OccurrenceTable,
    pub pieces: u64,
    /// Unresolved rows examined this run
    pub scanned: u64,
    /// Rows for which a note within tolerance was found
    pub matched: u64,
    /// Rows actually written; lower than `matched` only if another writer got there first
    pub updated: u64,
    pub already_resolved: u64,
    pub unmatched: u64,
    pub unmatched_samples: Vec<UnmatchedSample>,
    pub batches_committed: u64,
    /// Pieces whose batch failed; their remaining rows stay unresolved
    pub failed_pieces: Vec<i64>,
    pub summary: JobSummary,
}

impl ReconcileReport {
    fn new(table: OccurrenceTable) -> Self {
        Self {
            table,
            pieces: 0,
            scanned: 0,
            matched: 0,
            updated: 0,
            already_resolved: 0,
            unmatched: 0,
            unmatched_samples: Vec::new(),
            batches_committed: 0,
            failed_pieces: Vec::new(),
            summary: JobSummary::default(),
        }
    }
}

/// Reconcile every target table in turn
pub async fn reconcile_all(
    pool: &SqlitePool,
    options: &ReconcileOptions,
) -> Result<Vec<ReconcileReport>> {
    let mut reports = Vec::with_capacity(OccurrenceTable::ALL.len());
    for target in OccurrenceTable::ALL {
        reports.push(reconcile_table(pool, target, options).await?);
    }
    Ok(reports)
}

pub async fn reconcile_table(
    pool: &SqlitePool,
    target: OccurrenceTable,
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    let table = target.table();
    let mut report = ReconcileReport::new(target);

    let resolved_counts = sqlx::query(&format!(
        "SELECT piece_id, COUNT(*) AS resolved FROM {} WHERE note_id IS NOT NULL GROUP BY piece_id",
        table
    ))
    .fetch_all(pool)
    .await?;
    for row in &resolved_counts {
        let piece_id: i64 = row.try_get("piece_id")?;
        if options.in_scope(piece_id) {
            let resolved: i64 = row.try_get("resolved")?;
            report.already_resolved += resolved as u64;
        }
    }

    let pieces: Vec<i64> = sqlx::query_scalar(&format!(
        "SELECT DISTINCT piece_id FROM {} WHERE note_id IS NULL ORDER BY piece_id",
        table
    ))
    .fetch_all(pool)
    .await?;

    for piece_id in pieces.into_iter().filter(|id| options.in_scope(*id)) {
        report.pieces += 1;
        if let Err(e) = reconcile_piece(pool, target, piece_id, options, &mut report).await {
            warn!(table, piece_id, error = %e, "Failed to reconcile piece, continuing");
            report.failed_pieces.push(piece_id);
        }
    }

    report.summary = JobSummary {
        processed: report.updated,
        skipped: report.already_resolved + report.unmatched,
        errored: report.failed_pieces.len() as u64,
    };

    info!(
        table,
        pieces = report.pieces,
        scanned = report.scanned,
        updated = report.updated,
        already_resolved = report.already_resolved,
        unmatched = report.unmatched,
        failed_pieces = report.failed_pieces.len(),
        "Reconciliation complete"
    );
    if report.unmatched > 0 {
        for sample in &report.unmatched_samples {
            warn!(
                table,
                row_id = sample.row_id,
                piece_id = sample.piece_id,
                voice = sample.voice,
                onset = sample.onset,
                "No note within tolerance"
            );
        }
    }

    Ok(report)
}

async fn reconcile_piece(
    pool: &SqlitePool,
    target: OccurrenceTable,
    piece_id: i64,
    options: &ReconcileOptions,
    report: &mut ReconcileReport,
) -> Result<()> {
    let table = target.table();

    let pending = sqlx::query(&format!(
        "SELECT {key} AS row_id, voice, onset FROM {table} WHERE piece_id = ? AND note_id IS NULL",
        key = target.key_column(),
        table = table
    ))
    .bind(piece_id)
    .fetch_all(pool)
    .await?;

    let mut rows_by_voice: BTreeMap<i64, Vec<PendingRow>> = BTreeMap::new();
    for row in &pending {
        rows_by_voice
            .entry(row.try_get("voice")?)
            .or_default()
            .push(PendingRow {
                row_id: row.try_get("row_id")?,
                onset: row.try_get("onset")?,
            });
    }

    let notes = sqlx::query("SELECT note_id, voice, onset FROM notes WHERE piece_id = ?")
        .bind(piece_id)
        .fetch_all(pool)
        .await?;

    let mut notes_by_voice: HashMap<i64, Vec<NoteOnset>> = HashMap::new();
    for row in &notes {
        notes_by_voice
            .entry(row.try_get("voice")?)
            .or_default()
            .push(NoteOnset {
                note_id: row.try_get("note_id")?,
                onset: row.try_get("onset")?,
            });
    }

    let mut updates: Vec<(i64, i64)> = Vec::new();
    let mut unmatched = 0u64;
    for (voice, rows) in rows_by_voice.iter_mut() {
        let voice_notes = notes_by_voice.entry(*voice).or_default();
        for m in match_bucket(voice_notes, rows, options.tolerance) {
            match m.note_id {
                Some(note_id) => updates.push((m.row.row_id, note_id)),
                None => {
                    unmatched += 1;
                    if report.unmatched_samples.len() < MAX_UNMATCHED_SAMPLES {
                        report.unmatched_samples.push(UnmatchedSample {
                            row_id: m.row.row_id,
                            piece_id,
                            voice: *voice,
                            onset: m.row.onset,
                        });
                    }
                }
            }
        }
    }

    report.scanned += pending.len() as u64;
    report.matched += updates.len() as u64;
    report.unmatched += unmatched;

    for chunk in updates.chunks(options.batch_size.max(1)) {
        let written = retry_on_lock("reconcile batch", LOCK_RETRY_MS, move || {
            apply_updates(pool, target, chunk)
        })
        .await?;
        report.updated += written;
        report.batches_committed += 1;
    }

    debug!(
        table,
        piece_id,
        pending = pending.len(),
        matched = updates.len(),
        unmatched,
        "Reconciled piece"
    );
    Ok(())
}

/// Write one batch of (row id, note id) pairs. Returns rows changed.
async fn apply_updates(
    pool: &SqlitePool,
    target: OccurrenceTable,
    updates: &[(i64, i64)],
) -> Result<u64> {
    let sql = format!(
        "UPDATE {} SET note_id = ? WHERE {} = ? AND note_id IS NULL",
        target.table(),
        target.key_column()
    );

    let mut tx = pool.begin().await?;
    let mut written = 0;
    for &(row_id, note_id) in updates {
        written += sqlx::query(&sql)
            .bind(note_id)
            .bind(row_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}
