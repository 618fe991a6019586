//! Extraction parameter Configurations
//!
//! A Configuration is one point in the extraction parameter space: unison
//! merging, interval encoding kind, n-gram length and the entry-only flag.
//! Entry Configurations point at the non-entry Configuration with the same
//! base parameters (their "family").

use crate::{Error, JobSummary, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Interval encoding used when the extraction service computed the pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalKind {
    Quality,
    Diatonic,
}

impl IntervalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntervalKind::Quality => "quality",
            IntervalKind::Diatonic => "diatonic",
        }
    }

    fn abbrev(self) -> char {
        match self {
            IntervalKind::Quality => 'q',
            IntervalKind::Diatonic => 'd',
        }
    }
}

impl FromStr for IntervalKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quality" => Ok(IntervalKind::Quality),
            "diatonic" => Ok(IntervalKind::Diatonic),
            other => Err(Error::InvalidInput(format!("unknown interval kind: {}", other))),
        }
    }
}

/// The parameter tuple that uniquely identifies a Configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigParams {
    pub combine_unisons: bool,
    pub interval_kind: IntervalKind,
    pub ngram_length: i64,
    pub entry: bool,
}

impl ConfigParams {
    /// Slug such as `cT_kq_n3_eF`
    pub fn slug(&self) -> String {
        format!(
            "c{}_k{}_n{}_e{}",
            tf(self.combine_unisons),
            self.interval_kind.abbrev(),
            self.ngram_length,
            tf(self.entry)
        )
    }

    /// Base parameters shared by a non-entry Configuration and its entry sibling
    pub fn family_key(&self) -> (bool, IntervalKind, i64) {
        (self.combine_unisons, self.interval_kind, self.ngram_length)
    }

    /// The non-entry parameters of this family
    pub fn parent(&self) -> ConfigParams {
        ConfigParams {
            entry: false,
            ..*self
        }
    }
}

fn tf(flag: bool) -> char {
    if flag {
        'T'
    } else {
        'F'
    }
}

/// A stored Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub config_id: i64,
    pub slug: String,
    pub params: ConfigParams,
    pub parent_config_id: Option<i64>,
}

impl Configuration {
    /// Same base parameters; the entry flag may differ
    pub fn same_family(&self, other: &Configuration) -> bool {
        self.params.family_key() == other.params.family_key()
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.config_id, self.slug)
    }
}

fn row_to_configuration(row: &sqlx::sqlite::SqliteRow) -> Result<Configuration> {
    let kind: String = row.try_get("interval_kind")?;
    Ok(Configuration {
        config_id: row.try_get("config_id")?,
        slug: row.try_get("slug")?,
        params: ConfigParams {
            combine_unisons: row.try_get("combine_unisons")?,
            interval_kind: kind.parse()?,
            ngram_length: row.try_get("ngram_length")?,
            entry: row.try_get("entry")?,
        },
        parent_config_id: row.try_get("parent_config_id")?,
    })
}

/// Insert a Configuration if its parameter tuple is new and return its id.
///
/// Entry Configurations get their parent inserted first.
pub async fn ensure_configuration(pool: &SqlitePool, params: ConfigParams) -> Result<i64> {
    let parent_id = if params.entry {
        Some(upsert_params(pool, params.parent(), None).await?)
    } else {
        None
    };
    upsert_params(pool, params, parent_id).await
}

async fn upsert_params(
    pool: &SqlitePool,
    params: ConfigParams,
    parent_id: Option<i64>,
) -> Result<i64> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO configurations
            (slug, combine_unisons, interval_kind, ngram_length, entry, parent_config_id)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(params.slug())
    .bind(params.combine_unisons)
    .bind(params.interval_kind.as_str())
    .bind(params.ngram_length)
    .bind(params.entry)
    .bind(parent_id)
    .execute(pool)
    .await?;

    let config_id: i64 = sqlx::query_scalar(
        r#"
        SELECT config_id FROM configurations
        WHERE combine_unisons = ? AND interval_kind = ? AND ngram_length = ? AND entry = ?
        "#,
    )
    .bind(params.combine_unisons)
    .bind(params.interval_kind.as_str())
    .bind(params.ngram_length)
    .bind(params.entry)
    .fetch_one(pool)
    .await?;

    Ok(config_id)
}

/// Every parameter combination the extraction service runs
pub fn catalogue() -> Vec<ConfigParams> {
    let mut all = Vec::new();
    for combine_unisons in [true, false] {
        for interval_kind in [IntervalKind::Quality, IntervalKind::Diatonic] {
            for ngram_length in 3..=10 {
                for entry in [false, true] {
                    all.push(ConfigParams {
                        combine_unisons,
                        interval_kind,
                        ngram_length,
                        entry,
                    });
                }
            }
        }
    }
    all
}

/// Insert the full catalogue. Existing rows are left alone.
pub async fn seed_configurations(pool: &SqlitePool) -> Result<JobSummary> {
    let before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM configurations")
        .fetch_one(pool)
        .await?;

    let mut summary = JobSummary::default();
    for params in catalogue() {
        let id = ensure_configuration(pool, params).await?;
        debug!(config_id = id, slug = %params.slug(), "Configuration ensured");
    }

    let after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM configurations")
        .fetch_one(pool)
        .await?;
    summary.processed = (after - before) as u64;
    summary.skipped = catalogue().len() as u64 - summary.processed;

    info!(
        "Seeded configurations: {} new, {} already present",
        summary.processed, summary.skipped
    );
    Ok(summary)
}

/// All Configurations keyed by id
pub async fn load_configurations(pool: &SqlitePool) -> Result<HashMap<i64, Configuration>> {
    let rows = sqlx::query(
        r#"
        SELECT config_id, slug, combine_unisons, interval_kind, ngram_length, entry, parent_config_id
        FROM configurations
        ORDER BY config_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut configs = HashMap::with_capacity(rows.len());
    for row in &rows {
        let config = row_to_configuration(row)?;
        configs.insert(config.config_id, config);
    }
    Ok(configs)
}

/// Look up a Configuration by id
pub async fn get_configuration(pool: &SqlitePool, config_id: i64) -> Result<Configuration> {
    let row = sqlx::query(
        r#"
        SELECT config_id, slug, combine_unisons, interval_kind, ngram_length, entry, parent_config_id
        FROM configurations
        WHERE config_id = ?
        "#,
    )
    .bind(config_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_configuration(&row),
        None => Err(Error::ConfigurationNotFound(config_id)),
    }
}
