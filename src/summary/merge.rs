//! Stitching of the summary and raw tiers into one time-ordered history.

use crate::record::{time_of, Record};

/// Copy of both tiers, taken under the summary lock and merged outside it
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Summary bins, oldest first
    pub summary: Vec<Record>,
    /// Raw records, oldest first
    pub raw: Vec<Record>,
}

impl Snapshot {
    /// Merge both tiers into one history, ascending by `_t`
    ///
    /// Summary bins cover history up to the newest bin older than
    /// `raw_after`; raw records cover everything after it. A summary bin's
    /// `_t` is its last sample's time, so raw records with a later `_t` are
    /// never inside it.
    pub fn merge(self, raw_after: i64) -> Vec<Record> {
        let Snapshot { summary, raw } = self;

        if summary.is_empty() {
            return sorted(raw);
        }
        if raw.is_empty() {
            return sorted(summary);
        }

        let Some(sum_newest) = summary
            .iter()
            .map(time_of)
            .filter(|&t| t < raw_after)
            .max()
        else {
            return sorted(raw);
        };
        let raw_oldest = raw.iter().map(time_of).min().unwrap_or(i64::MAX);

        let mut out: Vec<Record> = if sum_newest >= raw_oldest {
            // Tiers overlap: cut at the boundary bin
            summary
                .into_iter()
                .filter(|r| time_of(r) <= sum_newest)
                .chain(raw.into_iter().filter(|r| time_of(r) > sum_newest))
                .collect()
        } else {
            // Gap: raw does not reach back to the boundary bin
            summary
                .into_iter()
                .filter(|r| time_of(r) < raw_oldest)
                .chain(raw)
                .collect()
        };
        out.sort_by_key(time_of);
        out
    }
}

fn sorted(mut records: Vec<Record>) -> Vec<Record> {
    records.sort_by_key(time_of);
    records
}
