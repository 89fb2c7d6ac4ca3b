//! Tabular source abstraction consumed by the diff engine

use crate::dataset::{DatasetRef, RowKey, RowSnapshot};
use crate::error::DiffError;
use crate::partition::{KeyRange, KeyRangeEstimate};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Read access to one dataset, keyed and ordered by its key columns.
///
/// Implementations must be shareable across chunk workers.
pub trait TabularSource: Send + Sync {
    /// The dataset this source serves
    fn dataset(&self) -> &DatasetRef;

    /// Column names actually present in the source
    fn columns(&self) -> Result<Vec<String>, DiffError>;

    /// `(min, max, approx_count)` of the key space, or `None` when empty
    fn estimate_key_range(&self) -> Result<Option<KeyRangeEstimate>, DiffError>;

    /// Ordered split points for keys that cannot be interpolated.
    /// Sources that cannot list keys cheaply return `None`.
    fn key_boundaries(&self, _max_boundaries: usize) -> Result<Option<Vec<RowKey>>, DiffError> {
        Ok(None)
    }

    /// Rows whose key falls in `range`, ordered by key.
    ///
    /// Long-running fetches should poll `cancel` and bail out with its error.
    fn fetch_range(&self, range: &KeyRange, cancel: &CancelToken) -> Result<Vec<RowSnapshot>, DiffError>;

    /// Exact row count
    fn count_rows(&self) -> Result<u64, DiffError>;
}

/// Opens a [`TabularSource`] for a dataset reference, interpreting its
/// connection descriptor.
pub trait SourceResolver: Send + Sync {
    fn open(&self, dataset: &DatasetRef) -> Result<Arc<dyn TabularSource>, DiffError>;
}

/// Cooperative cancellation shared by all workers of one comparison.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline,
        }
    }

    /// Token that never expires on its own
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Instant::now().checked_add(timeout))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with `Timeout` once the deadline has passed or the token was
    /// cancelled. Passing the deadline also cancels the token for everyone else.
    pub fn check(&self) -> Result<(), DiffError> {
        if self.is_cancelled() {
            return Err(DiffError::timeout("comparison cancelled"));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.cancel();
                return Err(DiffError::timeout("deadline exceeded"));
            }
        }
        Ok(())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// In-memory source backed by an ordered map. Useful for tests and for
/// feeding pre-extracted rows into the engine.
#[derive(Debug, Clone)]
pub struct MemorySource {
    dataset: DatasetRef,
    columns: Vec<String>,
    rows: BTreeMap<RowKey, RowSnapshot>,
}

impl MemorySource {
    /// Empty source exposing exactly the dataset's declared columns
    pub fn new(dataset: DatasetRef) -> Self {
        let columns = dataset.all_columns().cloned().collect();
        Self {
            dataset,
            columns,
            rows: BTreeMap::new(),
        }
    }

    /// Override the physical column list, e.g. to simulate a missing column
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = RowSnapshot>) -> Self {
        for row in rows {
            self.insert(row);
        }
        self
    }

    /// Insert or replace the row with this key
    pub fn insert(&mut self, row: RowSnapshot) {
        self.rows.insert(row.key.clone(), row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl TabularSource for MemorySource {
    fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    fn columns(&self) -> Result<Vec<String>, DiffError> {
        Ok(self.columns.clone())
    }

    fn estimate_key_range(&self) -> Result<Option<KeyRangeEstimate>, DiffError> {
        let first = self.rows.keys().next();
        let last = self.rows.keys().next_back();
        Ok(match (first, last) {
            (Some(min), Some(max)) => Some(KeyRangeEstimate {
                min: min.clone(),
                max: max.clone(),
                approx_count: self.rows.len() as u64,
            }),
            _ => None,
        })
    }

    fn key_boundaries(&self, max_boundaries: usize) -> Result<Option<Vec<RowKey>>, DiffError> {
        if max_boundaries == 0 || self.rows.is_empty() {
            return Ok(Some(Vec::new()));
        }
        let step = (self.rows.len() / (max_boundaries + 1)).max(1);
        Ok(Some(
            self.rows
                .keys()
                .step_by(step)
                .skip(1)
                .take(max_boundaries)
                .cloned()
                .collect(),
        ))
    }

    fn fetch_range(&self, range: &KeyRange, cancel: &CancelToken) -> Result<Vec<RowSnapshot>, DiffError> {
        cancel.check()?;
        let rows = match &range.low {
            Some(low) => self.rows.range(low.clone()..),
            None => self.rows.range(..),
        };
        Ok(rows
            .take_while(|(key, _)| range.high.as_ref().map_or(true, |high| *key < high))
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn count_rows(&self) -> Result<u64, DiffError> {
        Ok(self.rows.len() as u64)
    }
}

/// Resolver over a fixed set of registered sources, keyed by dataset name.
#[derive(Default)]
pub struct StaticResolver {
    sources: RwLock<HashMap<String, Arc<dyn TabularSource>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source: Arc<dyn TabularSource>) {
        let name = source.dataset().name().to_string();
        if let Ok(mut sources) = self.sources.write() {
            sources.insert(name, source);
        }
    }

    pub fn with_source(self, source: Arc<dyn TabularSource>) -> Self {
        self.register(source);
        self
    }
}

impl SourceResolver for StaticResolver {
    fn open(&self, dataset: &DatasetRef) -> Result<Arc<dyn TabularSource>, DiffError> {
        let sources = self
            .sources
            .read()
            .map_err(|_| DiffError::connection("source registry lock poisoned"))?;
        sources
            .get(dataset.name())
            .cloned()
            .ok_or_else(|| DiffError::connection(format!("no source registered for dataset '{}'", dataset.name())))
    }
}
