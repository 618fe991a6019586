//! Fixture helpers shared by the integration tests

#![allow(dead_code)]

use motif_common::db::init::init_database;
use motif_common::db::{
    insert_interval_occurrences, insert_notes, insert_pattern_occurrences, insert_piece,
    ConfigParams, IntervalKind, IntervalOccurrence, Note, PatternOccurrence, Piece,
};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Fresh database in a temp dir. Keep the TempDir alive for the test's duration.
pub async fn test_pool() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().expect("temp dir");
    let pool = init_database(&dir.path().join("motif.db"))
        .await
        .expect("init database");
    (dir, pool)
}

pub async fn add_piece(pool: &SqlitePool, piece_id: i64, composer: &str) {
    insert_piece(
        pool,
        &Piece {
            piece_id,
            composer: composer.to_string(),
            title: Some(format!("Piece {}", piece_id)),
            filename: format!("piece_{}.mei", piece_id),
        },
    )
    .await
    .expect("insert piece");
}

pub fn params(combine_unisons: bool, ngram_length: i64, entry: bool) -> ConfigParams {
    ConfigParams {
        combine_unisons,
        interval_kind: IntervalKind::Quality,
        ngram_length,
        entry,
    }
}

/// Insert a Configuration with a fixed id
pub async fn add_config(pool: &SqlitePool, config_id: i64, params: ConfigParams) {
    sqlx::query(
        r#"
        INSERT INTO configurations
            (config_id, slug, combine_unisons, interval_kind, ngram_length, entry, parent_config_id)
        VALUES (?, ?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(config_id)
    .bind(params.slug())
    .bind(params.combine_unisons)
    .bind(params.interval_kind.as_str())
    .bind(params.ngram_length)
    .bind(params.entry)
    .execute(pool)
    .await
    .expect("insert configuration");
}

pub async fn add_occurrence(
    pool: &SqlitePool,
    occurrence_id: i64,
    piece_id: i64,
    config_id: i64,
    voice: i64,
    onset: f64,
    pattern: &str,
) {
    let pattern_length = pattern.split(',').count() as i64;
    insert_pattern_occurrences(
        pool,
        &[PatternOccurrence {
            occurrence_id,
            piece_id,
            config_id,
            voice,
            voice_name: Some(format!("Voice {}", voice)),
            onset,
            pattern: pattern.to_string(),
            pattern_length,
            is_thematic: None,
            from_rest: None,
            note_id: None,
        }],
    )
    .await
    .expect("insert occurrence");
}

pub async fn add_note(pool: &SqlitePool, note_id: i64, piece_id: i64, voice: i64, onset: f64) {
    insert_notes(
        pool,
        &[Note {
            note_id,
            piece_id,
            voice,
            voice_name: Some(format!("Voice {}", voice)),
            onset,
            duration: Some(1.0),
            pitch_name: Some("C".to_string()),
            octave: Some(4),
            midi: Some(60),
        }],
    )
    .await
    .expect("insert note");
}

pub async fn add_interval(
    pool: &SqlitePool,
    interval_id: i64,
    piece_id: i64,
    voice: i64,
    onset: f64,
    interval: &str,
) {
    insert_interval_occurrences(
        pool,
        &[IntervalOccurrence {
            interval_id,
            piece_id,
            config_id: 1,
            voice,
            voice_name: None,
            onset,
            interval: interval.to_string(),
            note_id: None,
        }],
    )
    .await
    .expect("insert interval");
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .expect("count rows")
}
