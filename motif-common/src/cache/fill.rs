//! Bounded worker pool that fills missing cache slots

use super::{Artifacts, StagedCache};
use crate::{Error, JobSummary, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

/// One `(stage, config_slug, item_key)` address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheSlot {
    pub stage: String,
    pub config_slug: String,
    pub item_key: String,
}

impl CacheSlot {
    pub fn new(stage: &str, config_slug: &str, item_key: &str) -> Self {
        Self {
            stage: stage.to_string(),
            config_slug: config_slug.to_string(),
            item_key: item_key.to_string(),
        }
    }
}

/// Output of one extraction step, ready to cache
#[derive(Debug, Clone, Default)]
pub struct Computed {
    pub artifacts: Artifacts,
    pub metadata: serde_json::Value,
}

enum SlotOutcome {
    Filled,
    AlreadyCached,
}

/// Compute and store every slot that is missing one of `required`.
///
/// Slots are independent; up to `concurrency` of them run at once on the
/// blocking pool. Only the cache index update is serialized. A failing slot
/// is logged and counted as errored without stopping the others.
pub async fn fill_missing<F>(
    cache: &StagedCache,
    slots: Vec<CacheSlot>,
    required: &[&str],
    concurrency: usize,
    compute: F,
) -> Result<JobSummary>
where
    F: Fn(&CacheSlot) -> Result<Computed> + Send + Sync + 'static,
{
    let compute = Arc::new(compute);
    let required: Arc<Vec<String>> = Arc::new(required.iter().map(|s| s.to_string()).collect());
    let total = slots.len();

    let outcomes: Vec<(CacheSlot, Result<SlotOutcome>)> = stream::iter(slots)
        .map(|slot| {
            let cache = cache.clone();
            let compute = Arc::clone(&compute);
            let required = Arc::clone(&required);
            async move {
                let worker_slot = slot.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    fill_slot(&cache, &worker_slot, &required, compute.as_ref())
                })
                .await;
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => Err(Error::Internal(format!("cache worker failed: {}", e))),
                };
                (slot, outcome)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut summary = JobSummary::default();
    for (slot, outcome) in outcomes {
        match outcome {
            Ok(SlotOutcome::Filled) => summary.processed += 1,
            Ok(SlotOutcome::AlreadyCached) => summary.skipped += 1,
            Err(e) => {
                warn!(
                    stage = %slot.stage,
                    config_slug = %slot.config_slug,
                    item_key = %slot.item_key,
                    error = %e,
                    "Failed to fill cache slot"
                );
                summary.errored += 1;
            }
        }
    }

    info!(slots = total, "Cache fill complete: {}", summary);
    Ok(summary)
}

fn fill_slot<F>(
    cache: &StagedCache,
    slot: &CacheSlot,
    required: &[String],
    compute: &F,
) -> Result<SlotOutcome>
where
    F: Fn(&CacheSlot) -> Result<Computed>,
{
    let required: Vec<&str> = required.iter().map(String::as_str).collect();
    if cache.exists(&slot.stage, &slot.config_slug, &slot.item_key, &required)? {
        return Ok(SlotOutcome::AlreadyCached);
    }

    let computed = compute(slot)?;
    cache.put(
        &slot.stage,
        &slot.config_slug,
        &slot.item_key,
        &computed.artifacts,
        computed.metadata,
    )?;
    Ok(SlotOutcome::Filled)
}
