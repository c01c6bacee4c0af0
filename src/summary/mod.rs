//! # Streaming Summary
//!
//! Bounded rolling history in two tiers:
//! - **raw**: full-resolution records in chunks of one bin width each, the
//!   newest `raw_cache` chunks retained
//! - **summary**: one aggregated record per elapsed bin, in chunks of
//!   `summary_chunk_size`, enough chunks retained to hold `keep_count` bins
//!
//! Chunk 0 of each tier is the one currently filling. Older chunks are never
//! modified, only dropped once the tier is full.
//!
//! The engine has a single mutator. Readers copy out a [`Snapshot`] and merge
//! it without holding any lock.

pub mod aggregate;
pub mod merge;

pub use aggregate::{summarize, SummaryMode};
pub use merge::Snapshot;

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::fields::FieldTable;
use crate::record::{record_time, time_of, Record};
use crate::registers::RegisterCatalog;

pub const DEFAULT_BIN_SECONDS: u64 = 60;
pub const DEFAULT_KEEP_COUNT: usize = 20_000;
pub const DEFAULT_SUMMARY_CHUNK_SIZE: usize = 500;
pub const DEFAULT_RAW_CACHE: usize = 10;

/// Tier sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryOptions {
    /// Width of one bin, in seconds
    pub bin_seconds: u64,
    /// Minimum number of summary bins retained
    pub keep_count: usize,
    /// Bins per summary chunk
    pub summary_chunk_size: usize,
    /// Raw chunks retained, including the filling one
    pub raw_cache: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            bin_seconds: DEFAULT_BIN_SECONDS,
            keep_count: DEFAULT_KEEP_COUNT,
            summary_chunk_size: DEFAULT_SUMMARY_CHUNK_SIZE,
            raw_cache: DEFAULT_RAW_CACHE,
        }
    }
}

impl SummaryOptions {
    /// Summary chunks needed to always hold `keep_count` bins, plus the
    /// filling one
    pub fn summary_chunks(&self) -> usize {
        let chunk = self.summary_chunk_size.max(1);
        (self.keep_count + chunk - 1) / chunk + 1
    }

    fn bin_millis(&self) -> i64 {
        (self.bin_seconds.max(1) as i64).saturating_mul(1000)
    }
}

/// Two-tier bounded aggregator
#[derive(Debug)]
pub struct StreamingSummary {
    options: SummaryOptions,
    fields: FieldTable,
    catalog: Arc<RegisterCatalog>,
    /// Front is the filling chunk
    raw: VecDeque<Vec<Record>>,
    /// End of the filling raw bin, epoch ms
    bin_limit: i64,
    /// Front is the filling chunk
    summary: VecDeque<Vec<Record>>,
}

impl StreamingSummary {
    pub fn new(options: SummaryOptions, fields: FieldTable, catalog: Arc<RegisterCatalog>) -> Self {
        Self {
            options,
            fields,
            catalog,
            raw: VecDeque::with_capacity(options.raw_cache.max(1)),
            bin_limit: 0,
            summary: VecDeque::with_capacity(options.summary_chunks()),
        }
    }

    pub fn options(&self) -> &SummaryOptions {
        &self.options
    }

    /// End boundary of the bin containing `t`
    fn bin_limit_for(&self, t: i64) -> i64 {
        let bin = self.options.bin_millis();
        (t.div_euclid(bin) + 1).saturating_mul(bin)
    }

    /// Add one record
    ///
    /// # Errors
    ///
    /// - `MissingTimestamp` if the record has no `_t`
    /// - `TimestampType` if `_t` is not an integer
    ///
    /// A rejected record leaves the engine untouched.
    pub fn add(&mut self, record: Record) -> Result<()> {
        let t = record_time(&record)?;

        if self.raw.is_empty() {
            self.bin_limit = self.bin_limit_for(t);
            self.raw.push_front(vec![record]);
            return Ok(());
        }

        if t > self.bin_limit {
            let bin = self
                .raw
                .front()
                .map(|chunk| summarize(chunk, &self.fields, &self.catalog))
                .unwrap_or_default();
            self.add_sum(bin);

            self.raw.push_front(Vec::new());
            self.raw.truncate(self.options.raw_cache.max(1));
            self.bin_limit = self.bin_limit_for(t);
        }

        if let Some(chunk) = self.raw.front_mut() {
            chunk.push(record);
        }
        Ok(())
    }

    fn add_sum(&mut self, bin: Record) {
        if bin.is_empty() {
            return;
        }
        let chunk_size = self.options.summary_chunk_size.max(1);
        let full = self.summary.front().map_or(true, |c| c.len() >= chunk_size);
        if full {
            self.summary.push_front(Vec::with_capacity(chunk_size));
            let limit = self.options.summary_chunks();
            if self.summary.len() > limit {
                debug!("summary tier full, dropping oldest chunk");
                self.summary.truncate(limit);
            }
        }
        if let Some(chunk) = self.summary.front_mut() {
            chunk.push(bin);
        }
    }

    /// Raw records newer than `after`, at most `limit` of the newest, oldest first
    pub fn get_raw_recent(&self, after: i64, limit: usize) -> Vec<Record> {
        recent(&self.raw, after, limit)
    }

    /// Summary bins newer than `after`, at most `limit` of the newest, oldest first
    pub fn get_summed_recent(&self, after: i64, limit: usize) -> Vec<Record> {
        recent(&self.summary, after, limit)
    }

    /// Copy both tiers, oldest first
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            summary: flatten(&self.summary),
            raw: flatten(&self.raw),
        }
    }

    /// Whole retained history, summaries up to `raw_after` and raw after it
    pub fn get_data(&self, raw_after: i64) -> Vec<Record> {
        self.snapshot().merge(raw_after)
    }

    /// Retained summary bins
    pub fn summary_len(&self) -> usize {
        self.summary.iter().map(Vec::len).sum()
    }

    /// Most summary bins the tier can hold
    pub fn summary_capacity(&self) -> usize {
        self.options.summary_chunks() * self.options.summary_chunk_size.max(1)
    }

    /// Retained raw records, across all raw chunks
    pub fn raw_len(&self) -> usize {
        self.raw.iter().map(Vec::len).sum()
    }

    /// Records in the filling bin, not yet summarized
    pub fn pending_len(&self) -> usize {
        self.raw.front().map_or(0, Vec::len)
    }
}

fn flatten(tier: &VecDeque<Vec<Record>>) -> Vec<Record> {
    tier.iter().rev().flatten().cloned().collect()
}

fn recent(tier: &VecDeque<Vec<Record>>, after: i64, limit: usize) -> Vec<Record> {
    let mut out: Vec<Record> = tier
        .iter()
        .flat_map(|chunk| chunk.iter().rev())
        .take_while(|r| time_of(r) > after)
        .take(limit)
        .cloned()
        .collect();
    out.reverse();
    out
}
