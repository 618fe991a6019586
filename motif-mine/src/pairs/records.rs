//! Shared pattern records for one piece pair

use super::dictionary::{shared_values, PatternDictionary};
use motif_common::{Error, Result};
use serde::Serialize;
use sqlx::{Sqlite, Transaction};

/// A value shared by two pieces, all Configurations merged
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharedPatternRecord {
    pub piece_a_id: i64,
    pub piece_b_id: i64,
    pub pattern: String,
    pub pattern_length: i64,
    pub occurrences_in_a: Vec<i64>,
    pub occurrences_in_b: Vec<i64>,
    pub count_in_a: i64,
    pub count_in_b: i64,
    pub total_shared: i64,
    pub composer_a: String,
    pub composer_b: String,
    pub same_composer: bool,
}

/// A value shared by two pieces under one (Configuration A, Configuration B) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharedSourceRecord {
    pub piece_a_id: i64,
    pub piece_b_id: i64,
    pub pattern: String,
    pub config_a_id: i64,
    pub config_b_id: i64,
    pub occurrences_in_a: Vec<i64>,
    pub occurrences_in_b: Vec<i64>,
    pub count_in_a: i64,
    pub count_in_b: i64,
    /// Potential occurrence pairings, `count_in_a * count_in_b`
    pub pairs_count: i64,
    pub config_a_slug: String,
    pub config_b_slug: String,
    pub same_family: bool,
    pub composer_a: String,
    pub composer_b: String,
    pub same_composer: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairRecord {
    Shared(SharedPatternRecord),
    Source(SharedSourceRecord),
}

/// Sorted, duplicate-free copy of an occurrence id list
fn normalized(ids: &[i64]) -> Vec<i64> {
    let mut out = ids.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

pub fn collapsed_records(dict: &PatternDictionary, a: i64, b: i64) -> Vec<SharedPatternRecord> {
    let (Some(values_a), Some(values_b)) = (dict.by_piece.get(&a), dict.by_piece.get(&b)) else {
        return Vec::new();
    };
    let composer_a = dict.composer(a);
    let composer_b = dict.composer(b);

    shared_values(values_a, values_b)
        .into_iter()
        .map(|(pattern, ids_a, ids_b)| {
            let occurrences_in_a = normalized(ids_a);
            let occurrences_in_b = normalized(ids_b);
            let count_in_a = occurrences_in_a.len() as i64;
            let count_in_b = occurrences_in_b.len() as i64;
            SharedPatternRecord {
                piece_a_id: a,
                piece_b_id: b,
                pattern: pattern.to_string(),
                pattern_length: dict.pattern_length(pattern),
                occurrences_in_a,
                occurrences_in_b,
                count_in_a,
                count_in_b,
                total_shared: count_in_a + count_in_b,
                composer_a: composer_a.to_string(),
                composer_b: composer_b.to_string(),
                same_composer: composer_a == composer_b,
            }
        })
        .collect()
}

/// Records for every ordered (Configuration in A, Configuration in B) pair,
/// equal Configurations included
pub fn source_records(dict: &PatternDictionary, a: i64, b: i64) -> Vec<SharedSourceRecord> {
    let (Some(configs_a), Some(configs_b)) =
        (dict.configs_by_piece.get(&a), dict.configs_by_piece.get(&b))
    else {
        return Vec::new();
    };
    let composer_a = dict.composer(a);
    let composer_b = dict.composer(b);
    let same_composer = composer_a == composer_b;

    let mut records = Vec::new();
    for &config_a_id in configs_a {
        let Some(values_a) = dict.by_piece_config.get(&(a, config_a_id)) else {
            continue;
        };
        let Some(config_a) = dict.configurations.get(&config_a_id) else {
            continue;
        };
        for &config_b_id in configs_b {
            let Some(values_b) = dict.by_piece_config.get(&(b, config_b_id)) else {
                continue;
            };
            let Some(config_b) = dict.configurations.get(&config_b_id) else {
                continue;
            };
            let same_family = config_a.same_family(config_b);

            for (pattern, ids_a, ids_b) in shared_values(values_a, values_b) {
                let occurrences_in_a = normalized(ids_a);
                let occurrences_in_b = normalized(ids_b);
                let count_in_a = occurrences_in_a.len() as i64;
                let count_in_b = occurrences_in_b.len() as i64;
                records.push(SharedSourceRecord {
                    piece_a_id: a,
                    piece_b_id: b,
                    pattern: pattern.to_string(),
                    config_a_id,
                    config_b_id,
                    occurrences_in_a,
                    occurrences_in_b,
                    count_in_a,
                    count_in_b,
                    pairs_count: count_in_a * count_in_b,
                    config_a_slug: config_a.slug.clone(),
                    config_b_slug: config_b.slug.clone(),
                    same_family,
                    composer_a: composer_a.to_string(),
                    composer_b: composer_b.to_string(),
                    same_composer,
                });
            }
        }
    }
    records
}

pub async fn insert_record(tx: &mut Transaction<'_, Sqlite>, record: &PairRecord) -> Result<()> {
    match record {
        PairRecord::Shared(r) => {
            sqlx::query(
                r#"
                INSERT INTO shared_patterns
                    (piece_a_id, piece_b_id, pattern, pattern_length,
                     occurrences_in_a, occurrences_in_b, count_in_a, count_in_b, total_shared,
                     composer_a, composer_b, same_composer)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(r.piece_a_id)
            .bind(r.piece_b_id)
            .bind(&r.pattern)
            .bind(r.pattern_length)
            .bind(serde_json::to_string(&r.occurrences_in_a)?)
            .bind(serde_json::to_string(&r.occurrences_in_b)?)
            .bind(r.count_in_a)
            .bind(r.count_in_b)
            .bind(r.total_shared)
            .bind(&r.composer_a)
            .bind(&r.composer_b)
            .bind(r.same_composer)
            .execute(&mut **tx)
            .await
            .map_err(Error::from_db)?;
        }
        PairRecord::Source(r) => {
            sqlx::query(
                r#"
                INSERT INTO shared_pattern_sources
                    (piece_a_id, piece_b_id, pattern, config_a_id, config_b_id,
                     occurrences_in_a, occurrences_in_b, count_in_a, count_in_b, pairs_count,
                     config_a_slug, config_b_slug, same_family,
                     composer_a, composer_b, same_composer)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(r.piece_a_id)
            .bind(r.piece_b_id)
            .bind(&r.pattern)
            .bind(r.config_a_id)
            .bind(r.config_b_id)
            .bind(serde_json::to_string(&r.occurrences_in_a)?)
            .bind(serde_json::to_string(&r.occurrences_in_b)?)
            .bind(r.count_in_a)
            .bind(r.count_in_b)
            .bind(r.pairs_count)
            .bind(&r.config_a_slug)
            .bind(&r.config_b_slug)
            .bind(r.same_family)
            .bind(&r.composer_a)
            .bind(&r.composer_b)
            .bind(r.same_composer)
            .execute(&mut **tx)
            .await
            .map_err(Error::from_db)?;
        }
    }
    Ok(())
}
