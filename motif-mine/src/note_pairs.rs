//! Note pair generator
//!
//! Emits every canonical note pair (note_a_id <= note_b_id, self-pairs
//! included) with piece, voice and composer equality flags. `note_pairs` is
//! emptied and refilled in one transaction, then read back against `notes`
//! to confirm the stored piece and voice flags.

use motif_common::lock::with_table_locks;
use motif_common::{Error, JobSummary, Result};
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info, warn};

const TABLE: &str = "note_pairs";
const HOLDER: &str = "note-pairs";

/// Rows per multi-row INSERT; 13 bound columns each stays under SQLite's
/// host parameter limit
pub const ROWS_PER_STATEMENT: usize = 500;

#[derive(Debug, Clone)]
struct NoteRef {
    note_id: i64,
    piece_id: i64,
    voice: i64,
    onset: f64,
    composer: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotePairStats {
    pub total: u64,
    pub self_pairs: u64,
    pub same_piece: u64,
    pub same_composer: u64,
    pub same_voice: u64,
}

/// Read-back of stored flags against the current `notes` rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PairIntegrity {
    pub checked: u64,
    /// Rows whose `same_piece` or `same_voice` disagrees with `notes`, or
    /// whose notes no longer exist
    pub mismatched: u64,
}

impl PairIntegrity {
    pub fn is_clean(&self) -> bool {
        self.mismatched == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotePairReport {
    pub notes: u64,
    pub stats: NotePairStats,
    pub integrity: PairIntegrity,
    pub summary: JobSummary,
}

/// Rebuild `note_pairs` over the notes of `piece_ids`, or every note when
/// `None`.
pub async fn build_note_pairs(
    pool: &SqlitePool,
    piece_ids: Option<&[i64]>,
) -> Result<NotePairReport> {
    with_table_locks(pool, &[TABLE], HOLDER, || rebuild(pool, piece_ids)).await
}

async fn rebuild(pool: &SqlitePool, piece_ids: Option<&[i64]>) -> Result<NotePairReport> {
    let notes = load_notes(pool, piece_ids).await?;
    if notes.is_empty() {
        warn!("No notes in scope; note_pairs left unchanged");
        return Err(Error::SourceEmpty("no notes in scope".to_string()));
    }

    let expected = notes.len() as u64 * (notes.len() as u64 + 1) / 2;
    info!(notes = notes.len(), pairs = expected, "Generating note pairs");

    let mut stats = NotePairStats::default();
    let mut tx = pool.begin().await?;
    let cleared = sqlx::query("DELETE FROM note_pairs")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    debug!(cleared, "Cleared existing note pairs");

    let mut pending: Vec<(&NoteRef, &NoteRef)> = Vec::with_capacity(ROWS_PER_STATEMENT);
    for (i, a) in notes.iter().enumerate() {
        for b in &notes[i..] {
            stats.total += 1;
            if a.note_id == b.note_id {
                stats.self_pairs += 1;
            }
            if a.piece_id == b.piece_id {
                stats.same_piece += 1;
            }
            if a.composer == b.composer {
                stats.same_composer += 1;
            }
            if a.voice == b.voice {
                stats.same_voice += 1;
            }

            pending.push((a, b));
            if pending.len() == ROWS_PER_STATEMENT {
                insert_pairs(&mut tx, &pending).await?;
                pending.clear();
            }
        }
    }
    if !pending.is_empty() {
        insert_pairs(&mut tx, &pending).await?;
    }
    tx.commit().await?;

    info!(
        total = stats.total,
        self_pairs = stats.self_pairs,
        same_piece = stats.same_piece,
        same_composer = stats.same_composer,
        same_voice = stats.same_voice,
        "Note pairs rebuilt"
    );

    let integrity = verify_note_pairs(pool).await?;

    Ok(NotePairReport {
        notes: notes.len() as u64,
        stats,
        integrity,
        summary: JobSummary {
            processed: stats.total,
            skipped: 0,
            errored: 0,
        },
    })
}

/// Recheck every stored `same_piece` / `same_voice` flag against `notes`.
pub async fn verify_note_pairs(pool: &SqlitePool) -> Result<PairIntegrity> {
    let (checked, mismatched): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(CASE
                   WHEN na.note_id IS NULL OR nb.note_id IS NULL THEN 1
                   WHEN np.same_piece != (na.piece_id = nb.piece_id) THEN 1
                   WHEN np.same_voice != (na.voice = nb.voice) THEN 1
                   ELSE 0 END), 0)
        FROM note_pairs np
        LEFT JOIN notes na ON na.note_id = np.note_a_id
        LEFT JOIN notes nb ON nb.note_id = np.note_b_id
        "#,
    )
    .fetch_one(pool)
    .await?;

    let integrity = PairIntegrity {
        checked: checked as u64,
        mismatched: mismatched as u64,
    };
    if integrity.is_clean() {
        debug!(checked = integrity.checked, "Note pair flags verified");
    } else {
        warn!(
            checked = integrity.checked,
            mismatched = integrity.mismatched,
            "Note pair flags disagree with notes"
        );
    }
    Ok(integrity)
}

async fn load_notes(pool: &SqlitePool, piece_ids: Option<&[i64]>) -> Result<Vec<NoteRef>> {
    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT n.note_id, n.piece_id, n.voice, n.onset, p.composer \
         FROM notes n JOIN pieces p ON p.piece_id = n.piece_id",
    );
    if let Some(ids) = piece_ids {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        query.push(" WHERE n.piece_id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
    }
    query.push(" ORDER BY n.note_id");

    let rows = query.build().fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok(NoteRef {
                note_id: row.try_get("note_id")?,
                piece_id: row.try_get("piece_id")?,
                voice: row.try_get("voice")?,
                onset: row.try_get("onset")?,
                composer: row.try_get("composer")?,
            })
        })
        .collect()
}

async fn insert_pairs(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    pairs: &[(&NoteRef, &NoteRef)],
) -> Result<()> {
    let mut query = QueryBuilder::<Sqlite>::new(
        "INSERT INTO note_pairs (note_a_id, note_b_id, piece_a_id, piece_b_id, same_piece, \
         voice_a, voice_b, same_voice, composer_a, composer_b, same_composer, onset_a, onset_b) ",
    );
    query.push_values(pairs, |mut row, (a, b)| {
        row.push_bind(a.note_id)
            .push_bind(b.note_id)
            .push_bind(a.piece_id)
            .push_bind(b.piece_id)
            .push_bind(a.piece_id == b.piece_id)
            .push_bind(a.voice)
            .push_bind(b.voice)
            .push_bind(a.voice == b.voice)
            .push_bind(a.composer.clone())
            .push_bind(b.composer.clone())
            .push_bind(a.composer == b.composer)
            .push_bind(a.onset)
            .push_bind(b.onset);
    });
    query
        .build()
        .execute(&mut **tx)
        .await
        .map_err(Error::from_db)?;
    Ok(())
}
