//! Pattern dictionary shared by both pair miners
//!
//! Built once per run from `pattern_occurrences`; the pair loop only reads it.

use futures::TryStreamExt;
use motif_common::db::{load_configurations, load_pieces, Configuration};
use motif_common::{Error, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Pattern value → occurrence ids (ascending)
pub type ValueMap = HashMap<String, Vec<i64>>;

#[derive(Debug, Default)]
pub struct PatternDictionary {
    /// (piece, Configuration) → values
    pub by_piece_config: HashMap<(i64, i64), ValueMap>,
    /// piece → values, all Configurations merged
    pub by_piece: HashMap<i64, ValueMap>,
    /// piece → Configurations present in that piece, ascending
    pub configs_by_piece: HashMap<i64, Vec<i64>>,
    pub pattern_lengths: HashMap<String, i64>,
    pub composers: HashMap<i64, String>,
    pub configurations: HashMap<i64, Configuration>,
    /// Pieces with at least one occurrence, ascending
    pub pieces: Vec<i64>,
    pub occurrences: u64,
    /// Occurrences dropped because their Configuration does not exist
    pub missing_config: u64,
    /// Content digest of the source rows, Configurations and composers; a
    /// change invalidates saved progress
    pub fingerprint: String,
}

/// SHA-256 over length-prefixed fields, one record at a time
struct SourceDigest {
    hasher: Sha256,
}

impl SourceDigest {
    fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    fn int(&mut self, value: i64) -> &mut Self {
        self.hasher.update(value.to_le_bytes());
        self
    }

    fn text(&mut self, value: &str) -> &mut Self {
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    /// Separates the occurrence, Configuration and composer sections
    fn section(&mut self, tag: &str) {
        self.hasher.update([0xff]);
        self.hasher.update(tag.as_bytes());
    }

    fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl PatternDictionary {
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let configurations = load_configurations(pool).await?;
        let composers: HashMap<i64, String> = load_pieces(pool)
            .await?
            .into_iter()
            .map(|p| (p.piece_id, p.composer))
            .collect();

        let mut dict = PatternDictionary {
            configurations,
            composers,
            ..Default::default()
        };

        let mut rows = sqlx::query(
            r#"
            SELECT occurrence_id, piece_id, config_id, pattern, pattern_length
            FROM pattern_occurrences
            ORDER BY occurrence_id
            "#,
        )
        .fetch(pool);

        let mut piece_configs: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        let mut digest = SourceDigest::new();
        digest.section("occurrences");
        let mut scanned = 0u64;

        while let Some(row) = rows.try_next().await? {
            let occurrence_id: i64 = row.try_get("occurrence_id")?;
            let piece_id: i64 = row.try_get("piece_id")?;
            let config_id: i64 = row.try_get("config_id")?;
            let pattern: String = row.try_get("pattern")?;
            let pattern_length: i64 = row.try_get("pattern_length")?;
            scanned += 1;
            digest
                .int(occurrence_id)
                .int(piece_id)
                .int(config_id)
                .int(pattern_length)
                .text(&pattern);

            if !dict.configurations.contains_key(&config_id) {
                let err = Error::ConfigurationNotFound(config_id);
                debug!(occurrence_id, error = %err, "Skipping occurrence");
                dict.missing_config += 1;
                continue;
            }

            dict.by_piece_config
                .entry((piece_id, config_id))
                .or_default()
                .entry(pattern.clone())
                .or_default()
                .push(occurrence_id);
            dict.by_piece
                .entry(piece_id)
                .or_default()
                .entry(pattern.clone())
                .or_default()
                .push(occurrence_id);
            dict.pattern_lengths.entry(pattern).or_insert(pattern_length);
            piece_configs.entry(piece_id).or_default().insert(config_id);
            dict.occurrences += 1;
        }

        dict.pieces = piece_configs.keys().copied().collect();
        dict.configs_by_piece = piece_configs
            .into_iter()
            .map(|(piece, configs)| (piece, configs.into_iter().collect()))
            .collect();
        digest_lookups(&mut digest, &dict.configurations, &dict.composers);
        dict.fingerprint = format!("{}:{}", scanned, digest.finish());

        if dict.missing_config > 0 {
            warn!(
                missing_config = dict.missing_config,
                "Skipped occurrences referencing unknown Configurations"
            );
        }
        info!(
            occurrences = dict.occurrences,
            pieces = dict.pieces.len(),
            piece_configs = dict.by_piece_config.len(),
            "Loaded pattern dictionary"
        );

        Ok(dict)
    }

    pub fn composer(&self, piece_id: i64) -> &str {
        self.composers.get(&piece_id).map(String::as_str).unwrap_or("")
    }

    pub fn pattern_length(&self, pattern: &str) -> i64 {
        self.pattern_lengths.get(pattern).copied().unwrap_or(0)
    }

    /// Every unordered piece pair (a < b), in ascending order
    pub fn piece_pairs(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.pieces.iter().enumerate().flat_map(move |(i, &a)| {
            self.pieces[i + 1..].iter().map(move |&b| (a, b))
        })
    }

    pub fn pair_count(&self) -> u64 {
        let n = self.pieces.len() as u64;
        n * n.saturating_sub(1) / 2
    }
}

/// Fold the Configuration and composer maps into the digest in key order
fn digest_lookups(
    digest: &mut SourceDigest,
    configurations: &HashMap<i64, Configuration>,
    composers: &HashMap<i64, String>,
) {
    let configurations: BTreeMap<_, _> = configurations.iter().collect();
    digest.section("configurations");
    for (id, config) in configurations {
        let p = config.params;
        digest
            .int(*id)
            .text(&config.slug)
            .int(p.combine_unisons as i64)
            .text(p.interval_kind.as_str())
            .int(p.ngram_length)
            .int(p.entry as i64)
            .int(config.parent_config_id.unwrap_or(-1));
    }

    let composers: BTreeMap<_, _> = composers.iter().collect();
    digest.section("composers");
    for (piece_id, composer) in composers {
        digest.int(*piece_id).text(composer);
    }
}

/// Values present in both maps, sorted by value.
///
/// Iterates the smaller map and looks up each key in the larger; each tuple keeps the
/// `(a, b)` orientation of the arguments.
pub fn shared_values<'a>(a: &'a ValueMap, b: &'a ValueMap) -> Vec<(&'a str, &'a [i64], &'a [i64])> {
    let mut shared: Vec<(&str, &[i64], &[i64])> = if a.len() <= b.len() {
        a.iter()
            .filter_map(|(value, ids_a)| {
                b.get(value)
                    .map(|ids_b| (value.as_str(), ids_a.as_slice(), ids_b.as_slice()))
            })
            .collect()
    } else {
        b.iter()
            .filter_map(|(value, ids_b)| {
                a.get(value)
                    .map(|ids_a| (value.as_str(), ids_a.as_slice(), ids_b.as_slice()))
            })
            .collect()
    };
    shared.sort_unstable_by(|x, y| x.0.cmp(y.0));
    shared
}
