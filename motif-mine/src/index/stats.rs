//! Read-back statistics for a freshly built index

use motif_common::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::info;

const TOP_N: i64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub unique_values: i64,
    pub breakdown_rows: i64,
    pub total_occurrences: i64,
    /// Values produced by more than one Configuration
    pub multi_config_values: i64,
    /// (number of Configurations, number of values)
    pub values_by_config_count: Vec<(i64, i64)>,
    pub by_length: Vec<LengthStats>,
    pub top_values: Vec<TopValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LengthStats {
    pub pattern_length: i64,
    pub unique_values: i64,
    pub occurrences: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopValue {
    pub pattern: String,
    pub total_occurrences: i64,
    pub piece_count: i64,
    pub total_configs: i64,
}

pub async fn collect_index_stats(pool: &SqlitePool) -> Result<IndexStats> {
    let totals = sqlx::query(
        r#"
        SELECT COUNT(*) AS unique_values,
               COALESCE(SUM(total_occurrences), 0) AS total_occurrences,
               COALESCE(SUM(CASE WHEN total_configs > 1 THEN 1 ELSE 0 END), 0) AS multi_config
        FROM pattern_index
        "#,
    )
    .fetch_one(pool)
    .await?;

    let breakdown_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pattern_index_configs")
        .fetch_one(pool)
        .await?;

    let values_by_config_count = sqlx::query(
        r#"
        SELECT total_configs, COUNT(*) AS value_count
        FROM pattern_index
        GROUP BY total_configs
        ORDER BY total_configs DESC
        "#,
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| Ok((row.try_get("total_configs")?, row.try_get("value_count")?)))
    .collect::<Result<Vec<(i64, i64)>>>()?;

    let by_length = sqlx::query(
        r#"
        SELECT pattern_length, COUNT(*) AS unique_values, SUM(total_occurrences) AS occurrences
        FROM pattern_index
        GROUP BY pattern_length
        ORDER BY pattern_length
        "#,
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| {
        Ok(LengthStats {
            pattern_length: row.try_get("pattern_length")?,
            unique_values: row.try_get("unique_values")?,
            occurrences: row.try_get("occurrences")?,
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let top_values = sqlx::query(
        r#"
        SELECT pattern, total_occurrences, piece_count, total_configs
        FROM pattern_index
        ORDER BY total_occurrences DESC, pattern
        LIMIT ?
        "#,
    )
    .bind(TOP_N)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| {
        Ok(TopValue {
            pattern: row.try_get("pattern")?,
            total_occurrences: row.try_get("total_occurrences")?,
            piece_count: row.try_get("piece_count")?,
            total_configs: row.try_get("total_configs")?,
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let stats = IndexStats {
        unique_values: totals.try_get("unique_values")?,
        breakdown_rows,
        total_occurrences: totals.try_get("total_occurrences")?,
        multi_config_values: totals.try_get("multi_config")?,
        values_by_config_count,
        by_length,
        top_values,
    };

    for length in &stats.by_length {
        info!(
            pattern_length = length.pattern_length,
            unique_values = length.unique_values,
            occurrences = length.occurrences,
            "Index values by length"
        );
    }
    for (rank, top) in stats.top_values.iter().enumerate() {
        info!(
            rank = rank + 1,
            pattern = %top.pattern,
            occurrences = top.total_occurrences,
            pieces = top.piece_count,
            configs = top.total_configs,
            "Most common value"
        );
    }

    Ok(stats)
}
