//! Database initialization tests

use motif_common::db::init::init_database;
use motif_common::db::{
    ensure_configuration, get_configuration, insert_notes, insert_piece, load_configurations,
    seed_configurations, ConfigParams, IntervalKind, Note, Piece,
};
use motif_common::Error;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("motif.db");

    let pool = init_database(&db_path).await.expect("init failed");
    assert!(db_path.exists(), "Database file was not created");

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();
    for expected in [
        "configurations",
        "interval_occurrences",
        "job_locks",
        "job_progress",
        "note_pairs",
        "notes",
        "pattern_index",
        "pattern_index_configs",
        "pattern_occurrences",
        "pieces",
        "shared_pattern_sources",
        "shared_patterns",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("motif.db");

    let pool = init_database(&db_path).await.unwrap();
    insert_piece(
        &pool,
        &Piece {
            piece_id: 1,
            composer: "Josquin".into(),
            title: Some("Ave Maria".into()),
            filename: "Josquin_Ave.mei".into(),
        },
    )
    .await
    .unwrap();
    pool.close().await;

    // Second open must keep data and not fail on existing tables
    let pool = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pieces")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_seed_configurations_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("motif.db")).await.unwrap();

    let first = seed_configurations(&pool).await.unwrap();
    assert_eq!(first.processed, 64);
    assert_eq!(first.skipped, 0);

    let second = seed_configurations(&pool).await.unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 64);

    let configs = load_configurations(&pool).await.unwrap();
    assert_eq!(configs.len(), 64);

    for config in configs.values() {
        if config.params.entry {
            let parent_id = config.parent_config_id.expect("entry config needs a parent");
            let parent = &configs[&parent_id];
            assert!(!parent.params.entry);
            assert!(config.same_family(parent));
        } else {
            assert!(config.parent_config_id.is_none());
        }
    }
}

#[tokio::test]
async fn test_entry_configuration_creates_parent() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("motif.db")).await.unwrap();

    let entry = ConfigParams {
        combine_unisons: false,
        interval_kind: IntervalKind::Diatonic,
        ngram_length: 4,
        entry: true,
    };
    let id = ensure_configuration(&pool, entry).await.unwrap();
    let config = get_configuration(&pool, id).await.unwrap();
    assert_eq!(config.slug, "cF_kd_n4_eT");

    let parent = get_configuration(&pool, config.parent_config_id.unwrap())
        .await
        .unwrap();
    assert_eq!(parent.slug, "cF_kd_n4_eF");

    // Same tuple again returns the same id
    assert_eq!(ensure_configuration(&pool, entry).await.unwrap(), id);
}

#[tokio::test]
async fn test_missing_configuration_is_reported() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("motif.db")).await.unwrap();

    let result = get_configuration(&pool, 999).await;
    assert!(matches!(result, Err(Error::ConfigurationNotFound(999))));
}

#[tokio::test]
async fn test_pair_tables_reject_unordered_pieces() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("motif.db")).await.unwrap();

    let result = sqlx::query(
        r#"
        INSERT INTO shared_patterns
            (piece_a_id, piece_b_id, pattern, pattern_length, occurrences_in_a, occurrences_in_b,
             count_in_a, count_in_b, total_shared, composer_a, composer_b, same_composer)
        VALUES (7, 3, '(-2,-2,-2)', 3, '[]', '[]', 1, 1, 2, '', '', 1)
        "#,
    )
    .execute(&pool)
    .await
    .map_err(Error::from_db);

    assert!(matches!(result, Err(Error::ConstraintViolation(_))));
}

#[tokio::test]
async fn test_notes_require_existing_piece() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("motif.db")).await.unwrap();

    let orphan = Note {
        note_id: 1,
        piece_id: 42,
        voice: 1,
        voice_name: None,
        onset: 0.0,
        duration: Some(1.0),
        pitch_name: Some("C".into()),
        octave: Some(4),
        midi: Some(60),
    };
    assert!(insert_notes(&pool, &[orphan]).await.is_err());
}
