//! Checkpoints for the pair miners
//!
//! A `job_progress` row per job records the last piece pair whose records
//! were committed, written in the same transaction as those records.

use motif_common::Result;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub job: String,
    pub last_pair: Option<(i64, i64)>,
    pub source_fingerprint: String,
    pub completed: bool,
}

pub async fn load_progress(pool: &SqlitePool, job: &str) -> Result<Option<JobProgress>> {
    let row = sqlx::query(
        r#"
        SELECT job, last_piece_a, last_piece_b, source_fingerprint, completed
        FROM job_progress
        WHERE job = ?
        "#,
    )
    .bind(job)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let last_a: Option<i64> = row.try_get("last_piece_a")?;
    let last_b: Option<i64> = row.try_get("last_piece_b")?;
    Ok(Some(JobProgress {
        job: row.try_get("job")?,
        last_pair: last_a.zip(last_b),
        source_fingerprint: row.try_get("source_fingerprint")?,
        completed: row.try_get("completed")?,
    }))
}

/// Empty `table` and start a fresh progress row, atomically
pub async fn restart_job(
    pool: &SqlitePool,
    job: &str,
    table: &str,
    fingerprint: &str,
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let deleted = sqlx::query(&format!("DELETE FROM {}", table))
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query(
        r#"
        INSERT INTO job_progress (job, last_piece_a, last_piece_b, source_fingerprint, completed, updated_at)
        VALUES (?, NULL, NULL, ?, 0, CURRENT_TIMESTAMP)
        ON CONFLICT(job) DO UPDATE SET
            last_piece_a = NULL,
            last_piece_b = NULL,
            source_fingerprint = excluded.source_fingerprint,
            completed = 0,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(job)
    .bind(fingerprint)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(deleted)
}

/// Advance the checkpoint inside the batch transaction
pub async fn record_progress(
    tx: &mut Transaction<'_, Sqlite>,
    job: &str,
    last_pair: (i64, i64),
    completed: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE job_progress
        SET last_piece_a = ?, last_piece_b = ?, completed = ?, updated_at = CURRENT_TIMESTAMP
        WHERE job = ?
        "#,
    )
    .bind(last_pair.0)
    .bind(last_pair.1)
    .bind(completed)
    .bind(job)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn mark_completed(pool: &SqlitePool, job: &str) -> Result<()> {
    sqlx::query(
        "UPDATE job_progress SET completed = 1, updated_at = CURRENT_TIMESTAMP WHERE job = ?",
    )
    .bind(job)
    .execute(pool)
    .await?;
    Ok(())
}
