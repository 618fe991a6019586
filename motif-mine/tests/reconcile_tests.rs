//! Fuzzy join reconciler tests

mod helpers;

use helpers::*;
use motif_common::Tolerance;
use motif_mine::reconcile::{
    reconcile_all, reconcile_table, OccurrenceTable, ReconcileOptions, MAX_UNMATCHED_SAMPLES,
};
use sqlx::SqlitePool;

const MOTIF: &str = "(2,2,-3)";

async fn note_of(pool: &SqlitePool, table: &str, key: &str, id: i64) -> Option<i64> {
    sqlx::query_scalar(&format!("SELECT note_id FROM {} WHERE {} = ?", table, key))
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn occurrence_note(pool: &SqlitePool, occurrence_id: i64) -> Option<i64> {
    note_of(pool, "pattern_occurrences", "occurrence_id", occurrence_id).await
}

/// Piece 1: voice 1 has notes 10, 11, 12 at onsets 0, 1, 2; voice 2 has
/// notes 21 and 20 sounding together at onset 4
async fn seed_piece(pool: &SqlitePool) {
    add_piece(pool, 1, "Josquin").await;
    add_config(pool, 5, params(true, 3, false)).await;
    add_note(pool, 10, 1, 1, 0.0).await;
    add_note(pool, 11, 1, 1, 1.0).await;
    add_note(pool, 12, 1, 1, 2.0).await;
    add_note(pool, 21, 1, 2, 4.0).await;
    add_note(pool, 20, 1, 2, 4.0).await;
}

#[tokio::test]
async fn test_nearest_note_within_tolerance() {
    let (_dir, pool) = test_pool().await;
    seed_piece(&pool).await;
    add_occurrence(&pool, 1, 1, 5, 1, 1.0004, MOTIF).await;
    add_occurrence(&pool, 2, 1, 5, 1, 2.5, MOTIF).await;
    add_occurrence(&pool, 3, 1, 5, 2, 4.0, MOTIF).await;

    let report = reconcile_table(
        &pool,
        OccurrenceTable::Patterns,
        &ReconcileOptions::new(Tolerance::DEFAULT),
    )
    .await
    .unwrap();

    assert_eq!(occurrence_note(&pool, 1).await, Some(11));
    assert_eq!(occurrence_note(&pool, 2).await, None);
    assert_eq!(occurrence_note(&pool, 3).await, Some(20));

    assert_eq!(report.pieces, 1);
    assert_eq!(report.scanned, 3);
    assert_eq!(report.matched, 2);
    assert_eq!(report.updated, 2);
    assert_eq!(report.unmatched, 1);
    assert_eq!(report.unmatched_samples.len(), 1);
    assert_eq!(report.unmatched_samples[0].row_id, 2);
    assert_eq!(report.unmatched_samples[0].onset, 2.5);
    assert_eq!(report.summary.processed, 2);
    assert_eq!(report.summary.skipped, 1);
}

#[tokio::test]
async fn test_rerun_never_overwrites_a_resolved_reference() {
    let (_dir, pool) = test_pool().await;
    seed_piece(&pool).await;
    add_occurrence(&pool, 1, 1, 5, 1, 0.0, MOTIF).await;
    add_occurrence(&pool, 2, 1, 5, 1, 7.0, MOTIF).await;
    add_occurrence(&pool, 3, 1, 5, 1, 1.0, MOTIF).await;
    sqlx::query("UPDATE pattern_occurrences SET note_id = 12 WHERE occurrence_id = 3")
        .execute(&pool)
        .await
        .unwrap();

    let options = ReconcileOptions::new(Tolerance::DEFAULT);
    let first = reconcile_table(&pool, OccurrenceTable::Patterns, &options)
        .await
        .unwrap();
    assert_eq!(first.updated, 1);
    assert_eq!(first.already_resolved, 1);
    assert_eq!(first.unmatched, 1);
    assert_eq!(occurrence_note(&pool, 3).await, Some(12));

    let second = reconcile_table(&pool, OccurrenceTable::Patterns, &options)
        .await
        .unwrap();
    assert_eq!(second.updated, 0);
    assert_eq!(second.already_resolved, 2);
    assert_eq!(second.unmatched, 1);
    assert_eq!(occurrence_note(&pool, 1).await, Some(10));
    assert_eq!(occurrence_note(&pool, 3).await, Some(12));
}

#[tokio::test]
async fn test_wider_tolerance_resolves_more_on_rerun() {
    let (_dir, pool) = test_pool().await;
    seed_piece(&pool).await;
    add_occurrence(&pool, 1, 1, 5, 1, 1.25, MOTIF).await;

    let strict = reconcile_table(
        &pool,
        OccurrenceTable::Patterns,
        &ReconcileOptions::new(Tolerance::DEFAULT),
    )
    .await
    .unwrap();
    assert_eq!(strict.unmatched, 1);

    let loose = reconcile_table(
        &pool,
        OccurrenceTable::Patterns,
        &ReconcileOptions::new(Tolerance::new(0.5).unwrap()),
    )
    .await
    .unwrap();
    assert_eq!(loose.updated, 1);
    assert_eq!(loose.unmatched, 0);
    assert_eq!(occurrence_note(&pool, 1).await, Some(11));
}

#[tokio::test]
async fn test_unmatched_samples_are_capped() {
    let (_dir, pool) = test_pool().await;
    seed_piece(&pool).await;
    for id in 1..=7 {
        add_occurrence(&pool, id, 1, 5, 1, 10.0 + id as f64, MOTIF).await;
    }

    let report = reconcile_table(
        &pool,
        OccurrenceTable::Patterns,
        &ReconcileOptions::new(Tolerance::DEFAULT),
    )
    .await
    .unwrap();
    assert_eq!(report.unmatched, 7);
    assert_eq!(report.unmatched_samples.len(), MAX_UNMATCHED_SAMPLES);
    assert_eq!(report.updated, 0);
}

#[tokio::test]
async fn test_voices_are_matched_separately() {
    let (_dir, pool) = test_pool().await;
    seed_piece(&pool).await;
    // Voice 3 has no notes at all; voice 2 has none near onset 1
    add_occurrence(&pool, 1, 1, 5, 3, 1.0, MOTIF).await;
    add_occurrence(&pool, 2, 1, 5, 2, 1.0, MOTIF).await;

    let report = reconcile_table(
        &pool,
        OccurrenceTable::Patterns,
        &ReconcileOptions::new(Tolerance::DEFAULT),
    )
    .await
    .unwrap();
    assert_eq!(report.unmatched, 2);
    assert_eq!(occurrence_note(&pool, 1).await, None);
    assert_eq!(occurrence_note(&pool, 2).await, None);
}

#[tokio::test]
async fn test_interval_rows_and_piece_scope() {
    let (_dir, pool) = test_pool().await;
    seed_piece(&pool).await;
    add_piece(&pool, 2, "Willaert").await;
    add_note(&pool, 30, 2, 1, 0.5).await;
    add_interval(&pool, 1, 1, 1, 2.0, "P5").await;
    add_interval(&pool, 2, 2, 1, 0.5, "M3").await;

    let options = ReconcileOptions {
        piece_ids: Some(vec![2]),
        ..ReconcileOptions::new(Tolerance::DEFAULT)
    };
    let report = reconcile_table(&pool, OccurrenceTable::Intervals, &options)
        .await
        .unwrap();
    assert_eq!(report.pieces, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(note_of(&pool, "interval_occurrences", "interval_id", 2).await, Some(30));
    assert_eq!(note_of(&pool, "interval_occurrences", "interval_id", 1).await, None);

    let reports = reconcile_all(&pool, &ReconcileOptions::new(Tolerance::DEFAULT))
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].table, OccurrenceTable::Intervals);
    assert_eq!(reports[1].updated, 1);
    assert_eq!(reports[1].already_resolved, 1);
    assert_eq!(note_of(&pool, "interval_occurrences", "interval_id", 1).await, Some(12));
}

#[tokio::test]
async fn test_each_batch_commits_separately() {
    let (_dir, pool) = test_pool().await;
    seed_piece(&pool).await;
    add_occurrence(&pool, 1, 1, 5, 1, 0.0, MOTIF).await;
    add_occurrence(&pool, 2, 1, 5, 1, 1.0, MOTIF).await;
    add_occurrence(&pool, 3, 1, 5, 1, 2.0, MOTIF).await;

    let options = ReconcileOptions {
        batch_size: 1,
        ..ReconcileOptions::new(Tolerance::DEFAULT)
    };
    let report = reconcile_table(&pool, OccurrenceTable::Patterns, &options)
        .await
        .unwrap();
    assert_eq!(report.matched, 3);
    assert_eq!(report.batches_committed, report.matched);
    assert_eq!(count(&pool, "pattern_occurrences").await, 3);
}

#[tokio::test]
async fn test_failing_piece_does_not_stop_the_others() {
    let (_dir, pool) = test_pool().await;
    add_config(&pool, 5, params(true, 3, false)).await;
    for piece in 1..=3 {
        add_piece(&pool, piece, "Josquin").await;
        add_note(&pool, piece * 100, piece, 1, 0.0).await;
        add_occurrence(&pool, piece, piece, 5, 1, 0.0, MOTIF).await;
    }
    sqlx::query(
        r#"
        CREATE TRIGGER reject_piece_2 BEFORE UPDATE OF note_id ON pattern_occurrences
        WHEN NEW.piece_id = 2
        BEGIN
            SELECT RAISE(ABORT, 'piece 2 is frozen');
        END
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let report = reconcile_table(
        &pool,
        OccurrenceTable::Patterns,
        &ReconcileOptions::new(Tolerance::DEFAULT),
    )
    .await
    .unwrap();

    assert_eq!(report.pieces, 3);
    assert_eq!(report.failed_pieces, vec![2]);
    assert_eq!(report.summary.errored, 1);
    assert_eq!(report.updated, 2);
    assert_eq!(occurrence_note(&pool, 1).await, Some(100));
    assert_eq!(occurrence_note(&pool, 2).await, None);
    assert_eq!(occurrence_note(&pool, 3).await, Some(300));
}
