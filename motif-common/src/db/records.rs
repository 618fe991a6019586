//! Writers and readers for the canonical input tables
//!
//! The extraction service owns these rows; the mining tools only read them
//! (and, for occurrences, fill in `note_id` once).

use super::models::{IntervalOccurrence, Note, PatternOccurrence, Piece};
use crate::Result;
use sqlx::{Sqlite, SqlitePool, Transaction};

pub async fn insert_piece(pool: &SqlitePool, piece: &Piece) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pieces (piece_id, composer, title, filename)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(piece_id) DO UPDATE SET
            composer = excluded.composer,
            title = excluded.title,
            filename = excluded.filename
        "#,
    )
    .bind(piece.piece_id)
    .bind(&piece.composer)
    .bind(&piece.title)
    .bind(&piece.filename)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_pieces(pool: &SqlitePool) -> Result<Vec<Piece>> {
    let pieces = sqlx::query_as::<_, Piece>(
        "SELECT piece_id, composer, title, filename FROM pieces ORDER BY piece_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(pieces)
}

/// Insert a batch of notes in one transaction
pub async fn insert_notes(pool: &SqlitePool, notes: &[Note]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for note in notes {
        insert_note(&mut tx, note).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn insert_note(tx: &mut Transaction<'_, Sqlite>, note: &Note) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notes (note_id, piece_id, voice, voice_name, onset, duration, pitch_name, octave, midi)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(note.note_id)
    .bind(note.piece_id)
    .bind(note.voice)
    .bind(&note.voice_name)
    .bind(note.onset)
    .bind(note.duration)
    .bind(&note.pitch_name)
    .bind(note.octave)
    .bind(note.midi)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Notes for one piece ordered by voice, onset and id
pub async fn load_notes_for_piece(pool: &SqlitePool, piece_id: i64) -> Result<Vec<Note>> {
    let notes = sqlx::query_as::<_, Note>(
        r#"
        SELECT note_id, piece_id, voice, voice_name, onset, duration, pitch_name, octave, midi
        FROM notes
        WHERE piece_id = ?
        ORDER BY voice, onset, note_id
        "#,
    )
    .bind(piece_id)
    .fetch_all(pool)
    .await?;
    Ok(notes)
}

/// Insert a batch of pattern occurrences in one transaction
pub async fn insert_pattern_occurrences(
    pool: &SqlitePool,
    occurrences: &[PatternOccurrence],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for occ in occurrences {
        sqlx::query(
            r#"
            INSERT INTO pattern_occurrences
                (occurrence_id, piece_id, config_id, voice, voice_name, onset,
                 pattern, pattern_length, is_thematic, from_rest, note_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(occ.occurrence_id)
        .bind(occ.piece_id)
        .bind(occ.config_id)
        .bind(occ.voice)
        .bind(&occ.voice_name)
        .bind(occ.onset)
        .bind(&occ.pattern)
        .bind(occ.pattern_length)
        .bind(occ.is_thematic)
        .bind(occ.from_rest)
        .bind(occ.note_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn load_pattern_occurrence(
    pool: &SqlitePool,
    occurrence_id: i64,
) -> Result<Option<PatternOccurrence>> {
    let occ = sqlx::query_as::<_, PatternOccurrence>(
        r#"
        SELECT occurrence_id, piece_id, config_id, voice, voice_name, onset,
               pattern, pattern_length, is_thematic, from_rest, note_id
        FROM pattern_occurrences
        WHERE occurrence_id = ?
        "#,
    )
    .bind(occurrence_id)
    .fetch_optional(pool)
    .await?;
    Ok(occ)
}

/// Insert a batch of interval occurrences in one transaction
pub async fn insert_interval_occurrences(
    pool: &SqlitePool,
    intervals: &[IntervalOccurrence],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for iv in intervals {
        sqlx::query(
            r#"
            INSERT INTO interval_occurrences
                (interval_id, piece_id, config_id, voice, voice_name, onset, interval, note_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(iv.interval_id)
        .bind(iv.piece_id)
        .bind(iv.config_id)
        .bind(iv.voice)
        .bind(&iv.voice_name)
        .bind(iv.onset)
        .bind(&iv.interval)
        .bind(iv.note_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
