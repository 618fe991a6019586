//! Database initialization
//!
//! Creates the database on first run and brings every table the mining tools
//! read or write into existence. All statements are idempotent and safe to run
//! on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas are set on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index. Idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Canonical inputs written by the extraction service
    create_pieces_table(pool).await?;
    create_configurations_table(pool).await?;
    create_notes_table(pool).await?;
    create_pattern_occurrences_table(pool).await?;
    create_interval_occurrences_table(pool).await?;

    // Derived tables, rebuilt by full refresh
    create_pattern_index_tables(pool).await?;
    create_shared_patterns_table(pool).await?;
    create_shared_pattern_sources_table(pool).await?;
    create_note_pairs_table(pool).await?;

    // Job bookkeeping
    create_job_progress_table(pool).await?;
    create_job_locks_table(pool).await?;

    Ok(())
}

async fn create_pieces_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pieces (
            piece_id INTEGER PRIMARY KEY,
            composer TEXT NOT NULL DEFAULT '',
            title TEXT,
            filename TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_configurations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS configurations (
            config_id INTEGER PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            combine_unisons INTEGER NOT NULL,
            interval_kind TEXT NOT NULL CHECK (interval_kind IN ('quality', 'diatonic')),
            ngram_length INTEGER NOT NULL CHECK (ngram_length > 0),
            entry INTEGER NOT NULL,
            parent_config_id INTEGER REFERENCES configurations(config_id),
            UNIQUE (combine_unisons, interval_kind, ngram_length, entry)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_notes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            note_id INTEGER PRIMARY KEY,
            piece_id INTEGER NOT NULL REFERENCES pieces(piece_id) ON DELETE CASCADE,
            voice INTEGER NOT NULL,
            voice_name TEXT,
            onset REAL NOT NULL,
            duration REAL,
            pitch_name TEXT,
            octave INTEGER,
            midi INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_notes_lookup ON notes(piece_id, voice, onset)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Pattern occurrences, including entry occurrences (rows under an entry
/// Configuration, which also carry `is_thematic` / `from_rest`).
///
/// `config_id` is deliberately not a foreign key: the index builder reports
/// rows with a dangling Configuration instead of the writer failing.
async fn create_pattern_occurrences_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pattern_occurrences (
            occurrence_id INTEGER PRIMARY KEY,
            piece_id INTEGER NOT NULL REFERENCES pieces(piece_id) ON DELETE CASCADE,
            config_id INTEGER NOT NULL,
            voice INTEGER NOT NULL,
            voice_name TEXT,
            onset REAL NOT NULL,
            pattern TEXT NOT NULL,
            pattern_length INTEGER NOT NULL,
            is_thematic INTEGER,
            from_rest INTEGER,
            note_id INTEGER REFERENCES notes(note_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_pattern_occurrences_lookup ON pattern_occurrences(piece_id, voice, onset)",
        "CREATE INDEX IF NOT EXISTS idx_pattern_occurrences_config ON pattern_occurrences(config_id)",
        "CREATE INDEX IF NOT EXISTS idx_pattern_occurrences_note ON pattern_occurrences(note_id)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}

async fn create_interval_occurrences_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interval_occurrences (
            interval_id INTEGER PRIMARY KEY,
            piece_id INTEGER NOT NULL REFERENCES pieces(piece_id) ON DELETE CASCADE,
            config_id INTEGER NOT NULL,
            voice INTEGER NOT NULL,
            voice_name TEXT,
            onset REAL NOT NULL,
            interval TEXT NOT NULL,
            note_id INTEGER REFERENCES notes(note_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_interval_occurrences_lookup ON interval_occurrences(piece_id, voice, onset)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Inverted index: one global row per pattern value plus one breakdown row
/// per (value, Configuration). Set-valued columns are sorted JSON arrays.
async fn create_pattern_index_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pattern_index (
            value_id INTEGER PRIMARY KEY,
            pattern TEXT NOT NULL UNIQUE,
            pattern_length INTEGER NOT NULL,
            total_occurrences INTEGER NOT NULL,
            total_configs INTEGER NOT NULL,
            occurrence_ids TEXT NOT NULL,
            piece_ids TEXT NOT NULL,
            composers TEXT NOT NULL,
            piece_count INTEGER NOT NULL,
            composer_count INTEGER NOT NULL,
            voice_numbers TEXT NOT NULL,
            voice_names TEXT NOT NULL,
            voice_count INTEGER NOT NULL,
            config_ids TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pattern_index_configs (
            value_config_id INTEGER PRIMARY KEY,
            value_id INTEGER NOT NULL REFERENCES pattern_index(value_id) ON DELETE CASCADE,
            config_id INTEGER NOT NULL,
            occurrences INTEGER NOT NULL,
            occurrence_ids TEXT NOT NULL,
            piece_ids TEXT NOT NULL,
            composers TEXT NOT NULL,
            piece_count INTEGER NOT NULL,
            composer_count INTEGER NOT NULL,
            voice_numbers TEXT NOT NULL,
            voice_names TEXT NOT NULL,
            voice_count INTEGER NOT NULL,
            UNIQUE (value_id, config_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_pattern_index_occurrences ON pattern_index(total_occurrences)",
        "CREATE INDEX IF NOT EXISTS idx_pattern_index_configs_config ON pattern_index_configs(config_id)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}

async fn create_shared_patterns_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shared_patterns (
            pair_value_id INTEGER PRIMARY KEY,
            piece_a_id INTEGER NOT NULL,
            piece_b_id INTEGER NOT NULL,
            pattern TEXT NOT NULL,
            pattern_length INTEGER NOT NULL,
            occurrences_in_a TEXT NOT NULL,
            occurrences_in_b TEXT NOT NULL,
            count_in_a INTEGER NOT NULL,
            count_in_b INTEGER NOT NULL,
            total_shared INTEGER NOT NULL,
            composer_a TEXT NOT NULL,
            composer_b TEXT NOT NULL,
            same_composer INTEGER NOT NULL,
            CONSTRAINT unique_shared_pattern UNIQUE (piece_a_id, piece_b_id, pattern),
            CONSTRAINT ordered_pair CHECK (piece_a_id < piece_b_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_shared_patterns_pattern ON shared_patterns(pattern)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_shared_pattern_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shared_pattern_sources (
            source_id INTEGER PRIMARY KEY,
            piece_a_id INTEGER NOT NULL,
            piece_b_id INTEGER NOT NULL,
            pattern TEXT NOT NULL,
            config_a_id INTEGER NOT NULL,
            config_b_id INTEGER NOT NULL,
            occurrences_in_a TEXT NOT NULL,
            occurrences_in_b TEXT NOT NULL,
            count_in_a INTEGER NOT NULL,
            count_in_b INTEGER NOT NULL,
            pairs_count INTEGER NOT NULL,
            config_a_slug TEXT NOT NULL,
            config_b_slug TEXT NOT NULL,
            same_family INTEGER NOT NULL,
            composer_a TEXT NOT NULL,
            composer_b TEXT NOT NULL,
            same_composer INTEGER NOT NULL,
            CONSTRAINT unique_shared_pattern_source
                UNIQUE (piece_a_id, piece_b_id, pattern, config_a_id, config_b_id),
            CONSTRAINT ordered_pair CHECK (piece_a_id < piece_b_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_shared_pattern_sources_pattern ON shared_pattern_sources(pattern)",
        "CREATE INDEX IF NOT EXISTS idx_shared_pattern_sources_configs ON shared_pattern_sources(config_a_id, config_b_id)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}

async fn create_note_pairs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS note_pairs (
            note_a_id INTEGER NOT NULL,
            note_b_id INTEGER NOT NULL,
            piece_a_id INTEGER NOT NULL,
            piece_b_id INTEGER NOT NULL,
            same_piece INTEGER NOT NULL,
            voice_a INTEGER NOT NULL,
            voice_b INTEGER NOT NULL,
            same_voice INTEGER NOT NULL,
            composer_a TEXT NOT NULL,
            composer_b TEXT NOT NULL,
            same_composer INTEGER NOT NULL,
            onset_a REAL NOT NULL,
            onset_b REAL NOT NULL,
            PRIMARY KEY (note_a_id, note_b_id),
            CONSTRAINT ordered_pair CHECK (note_a_id <= note_b_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_job_progress_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_progress (
            job TEXT PRIMARY KEY,
            last_piece_a INTEGER,
            last_piece_b INTEGER,
            source_fingerprint TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_job_locks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_locks (
            table_name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            token TEXT NOT NULL,
            acquired_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
