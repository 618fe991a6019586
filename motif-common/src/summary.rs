//! Processed / skipped / errored tallies reported by every batch entry point

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Units handled successfully
    pub processed: u64,
    /// Units intentionally passed over (already done, out of scope, bad reference)
    pub skipped: u64,
    /// Units that failed and were logged
    pub errored: u64,
}

impl JobSummary {
    pub fn merge(&mut self, other: &JobSummary) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.errored += other.errored;
    }

    pub fn total(&self) -> u64 {
        self.processed + self.skipped + self.errored
    }
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} skipped, {} errored",
            self.processed, self.skipped, self.errored
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_display() {
        let mut a = JobSummary { processed: 3, skipped: 1, errored: 0 };
        a.merge(&JobSummary { processed: 2, skipped: 0, errored: 1 });
        assert_eq!(a.total(), 7);
        assert_eq!(a.to_string(), "5 processed, 1 skipped, 1 errored");
    }
}
