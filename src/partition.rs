//! Key-space partitioning into bounded, disjoint chunks

use crate::dataset::RowKey;
use serde::Serialize;
use std::fmt;

/// A contiguous slice of the key space: `low <= key < high`.
///
/// `None` on either side means unbounded in that direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyRange {
    pub low: Option<RowKey>,
    pub high: Option<RowKey>,
}

impl KeyRange {
    /// The whole key space
    pub fn full() -> Self {
        Self {
            low: None,
            high: None,
        }
    }

    pub fn new(low: Option<RowKey>, high: Option<RowKey>) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, key: &RowKey) -> bool {
        let above_low = self.low.as_ref().map_or(true, |low| key >= low);
        let below_high = self.high.as_ref().map_or(true, |high| key < high);
        above_low && below_high
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.low {
            Some(low) => write!(f, "[{}", low)?,
            None => f.write_str("(-inf")?,
        }
        match &self.high {
            Some(high) => write!(f, ", {})", high),
            None => f.write_str(", +inf)"),
        }
    }
}

/// Cheap summary of a source's key space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRangeEstimate {
    pub min: RowKey,
    pub max: RowKey,
    pub approx_count: u64,
}

impl KeyRangeEstimate {
    /// Smallest estimate spanning both inputs. `None` only if both are empty.
    pub fn union(a: Option<&Self>, b: Option<&Self>) -> Option<Self> {
        match (a, b) {
            (None, None) => None,
            (Some(x), None) | (None, Some(x)) => Some(x.clone()),
            (Some(x), Some(y)) => Some(Self {
                min: x.min.clone().min(y.min.clone()),
                max: x.max.clone().max(y.max.clone()),
                approx_count: x.approx_count.max(y.approx_count),
            }),
        }
    }

    /// Whether boundaries can be derived by linear interpolation
    pub fn is_interpolable(&self) -> bool {
        self.min.leading_int().is_some() && self.max.leading_int().is_some()
    }
}

/// Splits a key space into at most `parallelism * max_chunks_per_worker`
/// chunks of roughly `chunk_size` rows each.
#[derive(Debug, Clone)]
pub struct Partitioner {
    parallelism: usize,
    chunk_size: u64,
    max_chunks_per_worker: usize,
}

impl Partitioner {
    pub fn new(parallelism: usize, chunk_size: u64, max_chunks_per_worker: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            chunk_size: chunk_size.max(1),
            max_chunks_per_worker: max_chunks_per_worker.max(1),
        }
    }

    pub fn max_chunks(&self) -> usize {
        self.parallelism.saturating_mul(self.max_chunks_per_worker)
    }

    /// Number of chunks for `approx_count` rows. Zero rows means zero chunks.
    pub fn chunk_count(&self, approx_count: u64) -> usize {
        if approx_count == 0 {
            return 0;
        }
        let wanted = approx_count.div_ceil(self.chunk_size);
        usize::try_from(wanted)
            .unwrap_or(usize::MAX)
            .clamp(1, self.max_chunks())
    }

    /// Plan from min/max estimate. Falls back to a single chunk when the
    /// leading key column is not an integer.
    pub fn plan(&self, estimate: Option<&KeyRangeEstimate>) -> ChunkPlan {
        match estimate {
            None => ChunkPlan::empty(),
            Some(e) if e.is_interpolable() => self.plan_interpolated(e),
            Some(_) => ChunkPlan::single(),
        }
    }

    /// Linear interpolation over the leading integer key component.
    pub fn plan_interpolated(&self, estimate: &KeyRangeEstimate) -> ChunkPlan {
        let (min, max) = match (estimate.min.leading_int(), estimate.max.leading_int()) {
            (Some(min), Some(max)) => (min, max),
            _ => return ChunkPlan::single(),
        };
        assert!(
            min <= max,
            "impossible partition bounds: min key {} exceeds max key {}",
            estimate.min,
            estimate.max
        );

        let span = i128::from(max) - i128::from(min) + 1;
        // A present min/max implies at least one row even if the count is stale
        let wanted = self.chunk_count(estimate.approx_count.max(1));
        let total = usize::try_from(span).map_or(wanted, |s| wanted.min(s));

        ChunkPlan {
            kind: PlanKind::Interpolated {
                min: i128::from(min),
                span,
            },
            next: 0,
            total,
        }
    }

    /// Split at an externally supplied ordered key listing. Boundaries are
    /// deduplicated and thinned to respect the chunk bound.
    pub fn plan_from_boundaries(&self, mut boundaries: Vec<RowKey>, approx_count: u64) -> ChunkPlan {
        boundaries.sort();
        boundaries.dedup();

        let wanted = self.chunk_count(approx_count.max(1));
        let allowed = wanted.saturating_sub(1);
        if boundaries.len() > allowed {
            let len = boundaries.len();
            boundaries = (1..=allowed)
                .map(|i| boundaries[i * len / (allowed + 1)].clone())
                .collect();
            boundaries.dedup();
        }

        let total = boundaries.len() + 1;
        ChunkPlan {
            kind: PlanKind::Boundaries(boundaries),
            next: 0,
            total,
        }
    }
}

#[derive(Debug, Clone)]
enum PlanKind {
    Interpolated { min: i128, span: i128 },
    Boundaries(Vec<RowKey>),
}

/// Lazy sequence of disjoint, ordered chunks covering the whole key space.
///
/// The first chunk is open below and the last open above, so keys outside a
/// stale estimate still land in exactly one chunk.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    kind: PlanKind,
    next: usize,
    total: usize,
}

impl ChunkPlan {
    pub fn empty() -> Self {
        Self {
            kind: PlanKind::Boundaries(Vec::new()),
            next: 0,
            total: 0,
        }
    }

    pub fn single() -> Self {
        Self {
            kind: PlanKind::Boundaries(Vec::new()),
            next: 0,
            total: 1,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn boundary(&self, index: usize) -> RowKey {
        match &self.kind {
            PlanKind::Interpolated { min, span } => {
                let offset = span * index as i128 / self.total as i128;
                // min + offset never exceeds max, which came from an i64
                RowKey::int((min + offset) as i64)
            }
            PlanKind::Boundaries(keys) => keys[index - 1].clone(),
        }
    }
}

impl Iterator for ChunkPlan {
    type Item = KeyRange;

    fn next(&mut self) -> Option<KeyRange> {
        if self.next >= self.total {
            return None;
        }
        let i = self.next;
        self.next += 1;

        let low = (i > 0).then(|| self.boundary(i));
        let high = (i + 1 < self.total).then(|| self.boundary(i + 1));
        Some(KeyRange::new(low, high))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkPlan {}
