//! Inverted index builder
//!
//! One streaming pass over `pattern_occurrences` fills a bucket per pattern
//! value, each holding a sub-bucket per Configuration. The buckets are then
//! written to `pattern_index` / `pattern_index_configs` in a single
//! transaction that first empties both tables.
//!
//! Output is a pure function of the source rows: value ids are assigned in
//! ascending pattern order and every set is serialized sorted, so rebuilding
//! an unchanged source yields identical tables.

mod stats;

pub use stats::{collect_index_stats, IndexStats, LengthStats, TopValue};

use futures::TryStreamExt;
use motif_common::lock::with_table_locks;
use motif_common::{Error, JobSummary, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

const HOLDER: &str = "rebuild-index";
const TABLES: [&str; 2] = ["pattern_index", "pattern_index_configs"];

/// Statistics for one bucket of occurrences
#[derive(Debug, Default, Clone, PartialEq)]
struct Bucket {
    occurrence_ids: Vec<i64>,
    piece_ids: BTreeSet<i64>,
    composers: BTreeSet<String>,
    voices: BTreeSet<i64>,
    voice_names: BTreeSet<String>,
}

impl Bucket {
    fn add(&mut self, occ: &OccurrenceRow) {
        self.occurrence_ids.push(occ.occurrence_id);
        self.piece_ids.insert(occ.piece_id);
        self.composers.insert(occ.composer.clone());
        self.voices.insert(occ.voice);
        if let Some(name) = &occ.voice_name {
            self.voice_names.insert(name.clone());
        }
    }
}

/// Global bucket for one pattern value
#[derive(Debug, Default)]
struct ValueBucket {
    pattern_length: i64,
    all: Bucket,
    per_config: BTreeMap<i64, Bucket>,
}

struct OccurrenceRow {
    occurrence_id: i64,
    piece_id: i64,
    config_id: i64,
    voice: i64,
    voice_name: Option<String>,
    pattern: String,
    pattern_length: i64,
    composer: String,
}

/// Outcome of an index rebuild
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub values: u64,
    pub breakdown_rows: u64,
    pub occurrences: u64,
    /// Occurrences dropped because their Configuration does not exist
    pub missing_config: u64,
    pub summary: JobSummary,
    pub stats: IndexStats,
}

/// Rebuild `pattern_index` and `pattern_index_configs` from scratch.
///
/// Returns [`Error::SourceEmpty`] without touching either table when there
/// is nothing to index.
pub async fn build_pattern_index(pool: &SqlitePool) -> Result<IndexReport> {
    with_table_locks(pool, &TABLES, HOLDER, || rebuild(pool)).await
}

async fn rebuild(pool: &SqlitePool) -> Result<IndexReport> {
    let (buckets, accepted, missing_config) = aggregate(pool).await?;

    if buckets.is_empty() {
        warn!(
            missing_config,
            "No pattern occurrences with a known Configuration; index left unchanged"
        );
        return Err(Error::SourceEmpty(
            "pattern_occurrences has no rows with a known Configuration".to_string(),
        ));
    }

    let mut values: Vec<(String, ValueBucket)> = buckets.into_iter().collect();
    values.sort_by(|a, b| a.0.cmp(&b.0));

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM pattern_index_configs")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM pattern_index").execute(&mut *tx).await?;

    let mut breakdown_rows = 0u64;
    for (index, (pattern, bucket)) in values.iter_mut().enumerate() {
        let value_id = index as i64 + 1;
        insert_value(&mut tx, value_id, pattern, bucket).await?;
        for (config_id, sub) in bucket.per_config.iter_mut() {
            breakdown_rows += 1;
            insert_breakdown(&mut tx, breakdown_rows as i64, value_id, *config_id, sub).await?;
        }
    }
    tx.commit().await?;

    let report = IndexReport {
        values: values.len() as u64,
        breakdown_rows,
        occurrences: accepted,
        missing_config,
        summary: JobSummary {
            processed: accepted,
            skipped: missing_config,
            errored: 0,
        },
        stats: collect_index_stats(pool).await?,
    };

    info!(
        values = report.values,
        breakdown_rows = report.breakdown_rows,
        occurrences = report.occurrences,
        missing_config = report.missing_config,
        "Rebuilt pattern index"
    );
    Ok(report)
}

/// Stream every occurrence into value buckets.
/// Returns the buckets, the accepted count and the count skipped for a
/// missing Configuration.
async fn aggregate(pool: &SqlitePool) -> Result<(HashMap<String, ValueBucket>, u64, u64)> {
    let mut rows = sqlx::query(
        r#"
        SELECT o.occurrence_id, o.piece_id, o.config_id, o.voice, o.voice_name,
               o.pattern, o.pattern_length, p.composer,
               c.config_id AS known_config
        FROM pattern_occurrences o
        JOIN pieces p ON p.piece_id = o.piece_id
        LEFT JOIN configurations c ON c.config_id = o.config_id
        ORDER BY o.occurrence_id
        "#,
    )
    .fetch(pool);

    let mut buckets: HashMap<String, ValueBucket> = HashMap::new();
    let mut accepted = 0u64;
    let mut missing_config = 0u64;

    while let Some(row) = rows.try_next().await? {
        let known: Option<i64> = row.try_get("known_config")?;
        let occ = OccurrenceRow {
            occurrence_id: row.try_get("occurrence_id")?,
            piece_id: row.try_get("piece_id")?,
            config_id: row.try_get("config_id")?,
            voice: row.try_get("voice")?,
            voice_name: row.try_get("voice_name")?,
            pattern: row.try_get("pattern")?,
            pattern_length: row.try_get("pattern_length")?,
            composer: row.try_get("composer")?,
        };

        if known.is_none() {
            let err = Error::ConfigurationNotFound(occ.config_id);
            debug!(occurrence_id = occ.occurrence_id, error = %err, "Skipping occurrence");
            missing_config += 1;
            continue;
        }

        let bucket = buckets.entry(occ.pattern.clone()).or_default();
        bucket.pattern_length = occ.pattern_length;
        bucket.all.add(&occ);
        bucket.per_config.entry(occ.config_id).or_default().add(&occ);
        accepted += 1;
    }

    if missing_config > 0 {
        warn!(
            missing_config,
            "Skipped occurrences referencing unknown Configurations"
        );
    }

    Ok((buckets, accepted, missing_config))
}

fn json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

async fn insert_value(
    tx: &mut Transaction<'_, Sqlite>,
    value_id: i64,
    pattern: &str,
    bucket: &mut ValueBucket,
) -> Result<()> {
    bucket.all.occurrence_ids.sort_unstable();
    let stats = &bucket.all;
    let config_ids: Vec<i64> = bucket.per_config.keys().copied().collect();

    sqlx::query(
        r#"
        INSERT INTO pattern_index
            (value_id, pattern, pattern_length, total_occurrences, total_configs,
             occurrence_ids, piece_ids, composers, piece_count, composer_count,
             voice_numbers, voice_names, voice_count, config_ids)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(value_id)
    .bind(pattern)
    .bind(bucket.pattern_length)
    .bind(stats.occurrence_ids.len() as i64)
    .bind(config_ids.len() as i64)
    .bind(json(&stats.occurrence_ids)?)
    .bind(json(&stats.piece_ids)?)
    .bind(json(&stats.composers)?)
    .bind(stats.piece_ids.len() as i64)
    .bind(stats.composers.len() as i64)
    .bind(json(&stats.voices)?)
    .bind(json(&stats.voice_names)?)
    .bind(stats.voices.len() as i64)
    .bind(json(&config_ids)?)
    .execute(&mut **tx)
    .await
    .map_err(Error::from_db)?;

    Ok(())
}

async fn insert_breakdown(
    tx: &mut Transaction<'_, Sqlite>,
    value_config_id: i64,
    value_id: i64,
    config_id: i64,
    bucket: &mut Bucket,
) -> Result<()> {
    bucket.occurrence_ids.sort_unstable();

    sqlx::query(
        r#"
        INSERT INTO pattern_index_configs
            (value_config_id, value_id, config_id, occurrences, occurrence_ids,
             piece_ids, composers, piece_count, composer_count,
             voice_numbers, voice_names, voice_count)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(value_config_id)
    .bind(value_id)
    .bind(config_id)
    .bind(bucket.occurrence_ids.len() as i64)
    .bind(json(&bucket.occurrence_ids)?)
    .bind(json(&bucket.piece_ids)?)
    .bind(json(&bucket.composers)?)
    .bind(bucket.piece_ids.len() as i64)
    .bind(bucket.composers.len() as i64)
    .bind(json(&bucket.voices)?)
    .bind(json(&bucket.voice_names)?)
    .bind(bucket.voices.len() as i64)
    .execute(&mut **tx)
    .await
    .map_err(Error::from_db)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occ(id: i64, piece: i64, config: i64, voice: i64, name: Option<&str>) -> OccurrenceRow {
        OccurrenceRow {
            occurrence_id: id,
            piece_id: piece,
            config_id: config,
            voice,
            voice_name: name.map(String::from),
            pattern: "(-2,-2,-2)".to_string(),
            pattern_length: 3,
            composer: format!("Composer {}", piece % 2),
        }
    }

    #[test]
    fn test_bucket_collects_distinct_sets() {
        let mut bucket = Bucket::default();
        bucket.add(&occ(3, 1, 5, 1, Some("Superius")));
        bucket.add(&occ(1, 1, 5, 1, Some("Superius")));
        bucket.add(&occ(2, 2, 5, 2, None));

        assert_eq!(bucket.occurrence_ids, vec![3, 1, 2]);
        assert_eq!(bucket.piece_ids.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(bucket.voices.len(), 2);
        assert_eq!(bucket.voice_names.len(), 1);
        assert_eq!(bucket.composers.len(), 2);
    }

    #[test]
    fn test_sets_serialize_sorted() {
        let mut bucket = Bucket::default();
        for (id, piece) in [(9, 7), (4, 3), (6, 3)] {
            bucket.add(&occ(id, piece, 5, 1, None));
        }
        bucket.occurrence_ids.sort_unstable();
        assert_eq!(json(&bucket.occurrence_ids).unwrap(), "[4,6,9]");
        assert_eq!(json(&bucket.piece_ids).unwrap(), "[3,7]");
    }
}
