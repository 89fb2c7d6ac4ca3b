//! Partitioned, concurrent diff engine

use crate::compare::{compare_rows, pair_columns, ColumnPair, EqualityPolicy, NormalizedEquality, RowComparison};
use crate::dataset::RowSnapshot;
use crate::error::{DiffError, ReconError};
use crate::partition::{ChunkPlan, KeyRange, KeyRangeEstimate, Partitioner};
use crate::source::{CancelToken, TabularSource};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as KeyOrdering;
use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Aggregate result of one comparison.
///
/// For a full diff, `rows_source = only_in_source + changed_count + identical_count`
/// and symmetrically for the target side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub rows_source: u64,
    pub rows_target: u64,
    pub only_in_source: u64,
    pub only_in_target: u64,
    pub changed_count: u64,
    pub identical_count: u64,
    /// Changed-row count per source compare column
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_changes: BTreeMap<String, u64>,
    /// Set when only row totals were collected (no key-level diff)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub counts_only: bool,
}

impl DiffStats {
    /// Stats carrying only row totals
    pub fn counts_only(rows_source: u64, rows_target: u64) -> Self {
        Self {
            rows_source,
            rows_target,
            counts_only: true,
            ..Self::default()
        }
    }

    pub fn diff_count(&self) -> u64 {
        self.only_in_source + self.only_in_target + self.changed_count
    }

    /// Differences as a percentage of the larger side. Empty pairs are 0%.
    pub fn diff_percent(&self) -> f64 {
        let denominator = self.rows_source.max(self.rows_target).max(1);
        // Multiply first so whole-number percentages come out exact
        self.diff_count() as f64 * 100.0 / denominator as f64
    }

    /// `|rows_source - rows_target|`
    pub fn row_count_delta(&self) -> u64 {
        self.rows_source.abs_diff(self.rows_target)
    }

    /// Whether the per-side totals agree with the classification counts
    pub fn is_balanced(&self) -> bool {
        self.counts_only
            || (self.rows_source == self.only_in_source + self.changed_count + self.identical_count
                && self.rows_target == self.only_in_target + self.changed_count + self.identical_count)
    }

    fn record(&mut self, comparison: RowComparison) {
        match comparison {
            RowComparison::Identical => self.identical_count += 1,
            RowComparison::Changed(columns) => {
                self.changed_count += 1;
                for column in columns {
                    *self.column_changes.entry(column).or_insert(0) += 1;
                }
            }
        }
    }
}

impl AddAssign for DiffStats {
    fn add_assign(&mut self, other: Self) {
        self.rows_source += other.rows_source;
        self.rows_target += other.rows_target;
        self.only_in_source += other.only_in_source;
        self.only_in_target += other.only_in_target;
        self.changed_count += other.changed_count;
        self.identical_count += other.identical_count;
        for (column, count) in other.column_changes {
            *self.column_changes.entry(column).or_insert(0) += count;
        }
        self.counts_only |= other.counts_only;
    }
}

impl Add for DiffStats {
    type Output = DiffStats;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl Sum for DiffStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(DiffStats::default(), Add::add)
    }
}

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads for chunk comparison
    pub parallelism: usize,
    /// Target rows per chunk
    pub chunk_size: u64,
    /// Upper bound on chunks per worker
    pub max_chunks_per_worker: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism().map_or(4, |n| n.get()),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            max_chunks_per_worker: crate::DEFAULT_MAX_CHUNKS_PER_WORKER,
        }
    }
}

/// Progress callback: `(chunks_done, chunks_total)`
pub type ChunkProgress<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Compares two tabular sources chunk by chunk on a bounded worker pool.
pub struct DiffEngine {
    config: EngineConfig,
    partitioner: Partitioner,
    pool: rayon::ThreadPool,
    policy: Arc<dyn EqualityPolicy>,
}

impl DiffEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ReconError> {
        if config.parallelism == 0 {
            return Err(ReconError::config("parallelism must be greater than 0"));
        }
        if config.chunk_size == 0 {
            return Err(ReconError::config("chunk size must be greater than 0"));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallelism)
            .thread_name(|i| format!("tabrecon-diff-{}", i))
            .build()
            .map_err(|e| ReconError::config(format!("failed to build worker pool: {}", e)))?;

        let partitioner = Partitioner::new(config.parallelism, config.chunk_size, config.max_chunks_per_worker);

        Ok(Self {
            config,
            partitioner,
            pool,
            policy: Arc::new(NormalizedEquality),
        })
    }

    /// Replace the value equality policy
    pub fn with_policy(mut self, policy: Arc<dyn EqualityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    /// Full key-level comparison of `source` against `target`.
    pub fn compare(
        &self,
        source: &dyn TabularSource,
        target: &dyn TabularSource,
        cancel: &CancelToken,
    ) -> Result<DiffStats, DiffError> {
        self.compare_with_progress(source, target, cancel, None)
    }

    /// As [`compare`](Self::compare), reporting each finished chunk.
    ///
    /// Any chunk failure aborts the call; partial stats are discarded.
    pub fn compare_with_progress(
        &self,
        source: &dyn TabularSource,
        target: &dyn TabularSource,
        cancel: &CancelToken,
        progress: Option<ChunkProgress<'_>>,
    ) -> Result<DiffStats, DiffError> {
        let started = Instant::now();
        let pairs = pair_columns(source.dataset(), target.dataset())?;
        check_schema(source)?;
        check_schema(target)?;
        cancel.check()?;

        let plan = self.plan(source, target)?;
        let total = plan.total();
        log::debug!(
            "Comparing {} against {} in {} chunk(s)",
            source.dataset(),
            target.dataset(),
            total
        );
        if total == 0 {
            return Ok(DiffStats::default());
        }

        let aborted = AtomicBool::new(false);
        let done = AtomicUsize::new(0);
        let policy = self.policy.as_ref();

        let stats = self.pool.install(|| {
            plan.par_bridge()
                .map(|range| {
                    // Result is discarded anyway once a sibling chunk failed
                    if aborted.load(Ordering::SeqCst) {
                        return Ok(DiffStats::default());
                    }
                    let result = diff_chunk(source, target, &range, &pairs, policy, cancel);
                    if result.is_err() {
                        aborted.store(true, Ordering::SeqCst);
                    } else if let Some(report) = progress {
                        report(done.fetch_add(1, Ordering::SeqCst) + 1, total);
                    }
                    result
                })
                .try_reduce(DiffStats::default, |a, b| Ok(a + b))
        })?;

        log::info!(
            "Compared {} vs {}: {} difference(s) across {} chunk(s) in {:.2?}",
            source.dataset(),
            target.dataset(),
            stats.diff_count(),
            total,
            started.elapsed()
        );
        Ok(stats)
    }

    /// Row totals only, without a key-level diff.
    pub fn count_rows(
        &self,
        source: &dyn TabularSource,
        target: &dyn TabularSource,
        cancel: &CancelToken,
    ) -> Result<DiffStats, DiffError> {
        cancel.check()?;
        let (rows_source, rows_target) = self.pool.join(
            || source.count_rows(),
            || target.count_rows(),
        );
        cancel.check()?;
        Ok(DiffStats::counts_only(rows_source?, rows_target?))
    }

    fn plan(&self, source: &dyn TabularSource, target: &dyn TabularSource) -> Result<ChunkPlan, DiffError> {
        let source_estimate = source.estimate_key_range()?;
        let target_estimate = target.estimate_key_range()?;
        let estimate = match KeyRangeEstimate::union(source_estimate.as_ref(), target_estimate.as_ref()) {
            Some(estimate) => estimate,
            None => return Ok(ChunkPlan::empty()),
        };

        if estimate.is_interpolable() {
            return Ok(self.partitioner.plan_interpolated(&estimate));
        }

        let wanted = self.partitioner.chunk_count(estimate.approx_count.max(1));
        if wanted <= 1 {
            return Ok(ChunkPlan::single());
        }

        // List split points from the larger side
        let source_count = source_estimate.as_ref().map_or(0, |e| e.approx_count);
        let target_count = target_estimate.as_ref().map_or(0, |e| e.approx_count);
        let larger = if source_count >= target_count { source } else { target };
        Ok(match larger.key_boundaries(wanted - 1)? {
            Some(boundaries) => self.partitioner.plan_from_boundaries(boundaries, estimate.approx_count),
            None => ChunkPlan::single(),
        })
    }
}

/// Declared key and compare columns must exist in the physical source.
fn check_schema(source: &dyn TabularSource) -> Result<(), DiffError> {
    let present = source.columns()?;
    let missing: Vec<&str> = source
        .dataset()
        .all_columns()
        .filter(|declared| !present.iter().any(|p| p == *declared))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(DiffError::schema_mismatch(format!(
            "{} is missing declared column(s): {}",
            source.dataset(),
            missing.join(", ")
        )))
    }
}

fn diff_chunk(
    source: &dyn TabularSource,
    target: &dyn TabularSource,
    range: &KeyRange,
    pairs: &[ColumnPair],
    policy: &dyn EqualityPolicy,
    cancel: &CancelToken,
) -> Result<DiffStats, DiffError> {
    cancel.check()?;
    let source_rows = source.fetch_range(range, cancel)?;
    cancel.check()?;
    let target_rows = target.fetch_range(range, cancel)?;
    cancel.check()?;

    validate_fetch(source, range, &source_rows)?;
    validate_fetch(target, range, &target_rows)?;

    let stats = merge_sorted(&source_rows, &target_rows, pairs, policy);
    log::debug!(
        "Chunk {}: {} source / {} target row(s), {} difference(s)",
        range,
        stats.rows_source,
        stats.rows_target,
        stats.diff_count()
    );
    Ok(stats)
}

/// Fetched rows must be strictly ascending and inside the requested range.
fn validate_fetch(source: &dyn TabularSource, range: &KeyRange, rows: &[RowSnapshot]) -> Result<(), DiffError> {
    if let Some(pair) = rows.windows(2).find(|pair| pair[0].key >= pair[1].key) {
        return Err(DiffError::query(format!(
            "{} returned keys out of order or duplicated: {} then {}",
            source.dataset(),
            pair[0].key,
            pair[1].key
        )));
    }
    if let Some(row) = rows.iter().find(|row| !range.contains(&row.key)) {
        return Err(DiffError::query(format!(
            "{} returned key {} outside requested range {}",
            source.dataset(),
            row.key,
            range
        )));
    }
    Ok(())
}

/// Lock-step walk over two key-ordered row lists.
pub fn merge_sorted(
    source_rows: &[RowSnapshot],
    target_rows: &[RowSnapshot],
    pairs: &[ColumnPair],
    policy: &dyn EqualityPolicy,
) -> DiffStats {
    let mut stats = DiffStats {
        rows_source: source_rows.len() as u64,
        rows_target: target_rows.len() as u64,
        ..DiffStats::default()
    };

    let (mut i, mut j) = (0, 0);
    while i < source_rows.len() && j < target_rows.len() {
        let (s, t) = (&source_rows[i], &target_rows[j]);
        match s.key.cmp(&t.key) {
            KeyOrdering::Less => {
                stats.only_in_source += 1;
                i += 1;
            }
            KeyOrdering::Greater => {
                stats.only_in_target += 1;
                j += 1;
            }
            KeyOrdering::Equal => {
                stats.record(compare_rows(s, t, pairs, policy));
                i += 1;
                j += 1;
            }
        }
    }
    stats.only_in_source += (source_rows.len() - i) as u64;
    stats.only_in_target += (target_rows.len() - j) as u64;

    stats
}
