//! Advisory table lock tests

use motif_common::db::init::init_database;
use motif_common::lock::{force_unlock, with_table_locks, TableLock};
use motif_common::Error;
use tempfile::TempDir;

#[tokio::test]
async fn test_second_holder_fails_fast() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("motif.db")).await.unwrap();

    let lock = TableLock::acquire(&pool, "shared_patterns", "rebuild-pairs")
        .await
        .unwrap();

    match TableLock::acquire(&pool, "shared_patterns", "other-job").await {
        Err(Error::LockHeld { table, holder }) => {
            assert_eq!(table, "shared_patterns");
            assert_eq!(holder, "rebuild-pairs");
        }
        other => panic!("expected LockHeld, got {:?}", other),
    }

    lock.release().await.unwrap();
    let again = TableLock::acquire(&pool, "shared_patterns", "other-job").await;
    assert!(again.is_ok());
}

#[tokio::test]
async fn test_locks_released_after_failed_job() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("motif.db")).await.unwrap();

    let result: motif_common::Result<()> = with_table_locks(
        &pool,
        &["pattern_index", "pattern_index_configs"],
        "rebuild-index",
        || async { Err(Error::Internal("boom".into())) },
    )
    .await;
    assert!(result.is_err());

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_locks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn test_partial_acquisition_rolls_back() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("motif.db")).await.unwrap();

    let _held = TableLock::acquire(&pool, "pattern_index_configs", "someone-else")
        .await
        .unwrap();

    let result = with_table_locks(
        &pool,
        &["pattern_index", "pattern_index_configs"],
        "rebuild-index",
        || async { Ok(()) },
    )
    .await;
    assert!(matches!(result, Err(Error::LockHeld { .. })));

    // The first lock taken must have been released again
    let held: Vec<String> = sqlx::query_scalar("SELECT table_name FROM job_locks")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(held, vec!["pattern_index_configs".to_string()]);
}

#[tokio::test]
async fn test_force_unlock_clears_stale_lock() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("motif.db")).await.unwrap();

    let stale = TableLock::acquire(&pool, "note_pairs", "crashed").await.unwrap();
    std::mem::forget(stale);

    assert!(force_unlock(&pool, "note_pairs").await.unwrap());
    assert!(!force_unlock(&pool, "note_pairs").await.unwrap());
    assert!(TableLock::acquire(&pool, "note_pairs", "new").await.is_ok());
}
