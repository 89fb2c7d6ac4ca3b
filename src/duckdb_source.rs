//! DuckDB-backed tabular sources
//!
//! A dataset name ending in a data file extension (`.csv`, `.parquet`, ...)
//! is read straight from the file; any other name is a (possibly
//! schema-qualified) table. The dataset's connection descriptor is a DuckDB
//! database path, or `:memory:` when absent.

use crate::dataset::{DatasetRef, KeyValue, RowKey, RowSnapshot, Value};
use crate::error::DiffError;
use crate::partition::{KeyRange, KeyRangeEstimate};
use crate::source::{CancelToken, SourceResolver, TabularSource};
use duckdb::types::{Value as SqlValue, ValueRef};
use duckdb::{params_from_iter, Connection};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Descriptor used when a dataset does not name a database
pub const IN_MEMORY: &str = ":memory:";

/// Rows between cancellation checks while streaming a fetch
const CANCEL_POLL_ROWS: usize = 1024;

/// One dataset inside a DuckDB database
pub struct DuckDbSource {
    dataset: DatasetRef,
    relation: String,
    connection: Mutex<Connection>,
}

impl DuckDbSource {
    pub fn new(dataset: DatasetRef, connection: Connection) -> Self {
        let relation = relation_sql(dataset.name());
        Self {
            dataset,
            relation,
            connection: Mutex::new(connection),
        }
    }

    /// The `FROM` target this source reads
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Check whether a dataset name is read as a file
    pub fn is_supported_format(name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .map_or(false, |ext| {
                matches!(ext.to_lowercase().as_str(), "csv" | "parquet" | "json" | "jsonl" | "tsv")
            })
    }

    /// A private handle so chunk workers can query concurrently
    fn handle(&self) -> Result<Connection, DiffError> {
        let connection = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        connection
            .try_clone()
            .map_err(|e| DiffError::connection(format!("failed to clone DuckDB connection: {}", e)))
    }

    fn key_list(&self) -> String {
        self.dataset
            .key_columns()
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn select_list(&self) -> String {
        self.dataset
            .all_columns()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// First key in `direction` order, or `None` for an empty relation
    fn edge_key(&self, connection: &Connection, direction: &str) -> Result<Option<RowKey>, DiffError> {
        let order = self
            .dataset
            .key_columns()
            .iter()
            .map(|c| format!("{} {}", quote_ident(c), direction))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {} FROM {} ORDER BY {} LIMIT 1", self.key_list(), self.relation, order);
        let key_count = self.dataset.key_columns().len();

        let mut stmt = connection.prepare(&sql).map_err(|e| self.convert_error(e))?;
        let mut rows = stmt.query([]).map_err(|e| self.convert_error(e))?;
        match rows.next().map_err(|e| self.convert_error(e))? {
            Some(row) => Ok(Some(read_key(row, key_count)?)),
            None => Ok(None),
        }
    }

    /// Classify DuckDB failures the way the engine reports them
    fn convert_error(&self, error: duckdb::Error) -> DiffError {
        let message = error.to_string();
        let context = format!("{}: {}", self.dataset, message);
        if message.contains("IO Error") || message.contains("No files found") || message.contains("Permission denied") {
            DiffError::connection(context)
        } else if message.contains("Binder Error") && message.contains("not found") {
            DiffError::schema_mismatch(context)
        } else {
            DiffError::query(context)
        }
    }
}

impl TabularSource for DuckDbSource {
    fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    fn columns(&self) -> Result<Vec<String>, DiffError> {
        let connection = self.handle()?;
        let sql = format!("DESCRIBE SELECT * FROM {}", self.relation);
        let mut stmt = connection.prepare(&sql).map_err(|e| self.convert_error(e))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| self.convert_error(e))?;

        let mut columns = Vec::new();
        for name in names {
            columns.push(name.map_err(|e| self.convert_error(e))?);
        }
        Ok(columns)
    }

    fn estimate_key_range(&self) -> Result<Option<KeyRangeEstimate>, DiffError> {
        let connection = self.handle()?;
        let approx_count = self.count_rows()?;
        if approx_count == 0 {
            return Ok(None);
        }
        let min = self.edge_key(&connection, "ASC")?;
        let max = self.edge_key(&connection, "DESC")?;
        Ok(match (min, max) {
            (Some(min), Some(max)) => Some(KeyRangeEstimate { min, max, approx_count }),
            _ => None,
        })
    }

    fn key_boundaries(&self, max_boundaries: usize) -> Result<Option<Vec<RowKey>>, DiffError> {
        let count = self.count_rows()?;
        if max_boundaries == 0 || count == 0 {
            return Ok(Some(Vec::new()));
        }
        let step = (count / (max_boundaries as u64 + 1)).max(1);
        let keys = self.key_list();
        let sql = format!(
            "SELECT {keys} FROM (SELECT {keys}, row_number() OVER (ORDER BY {keys}) AS __rn FROM {rel}) \
             WHERE __rn > 1 AND (__rn - 1) % {step} = 0 ORDER BY {keys} LIMIT {limit}",
            keys = keys,
            rel = self.relation,
            step = step,
            limit = max_boundaries,
        );

        let connection = self.handle()?;
        let key_count = self.dataset.key_columns().len();
        let mut stmt = connection.prepare(&sql).map_err(|e| self.convert_error(e))?;
        let mut rows = stmt.query([]).map_err(|e| self.convert_error(e))?;
        let mut boundaries = Vec::new();
        while let Some(row) = rows.next().map_err(|e| self.convert_error(e))? {
            boundaries.push(read_key(row, key_count)?);
        }
        Ok(Some(boundaries))
    }

    fn fetch_range(&self, range: &KeyRange, cancel: &CancelToken) -> Result<Vec<RowSnapshot>, DiffError> {
        cancel.check()?;
        let key_columns = self.dataset.key_columns();
        let mut predicates = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(low) = &range.low {
            predicates.push(bound_predicate(key_columns, low, true, &mut params));
        }
        if let Some(high) = &range.high {
            predicates.push(bound_predicate(key_columns, high, false, &mut params));
        }
        let filter = if predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", predicates.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            self.select_list(),
            self.relation,
            filter,
            self.key_list()
        );
        log::debug!("Fetching {} from {}", range, self.dataset);

        let connection = self.handle()?;
        let mut stmt = connection.prepare(&sql).map_err(|e| self.convert_error(e))?;
        let mut rows = stmt
            .query(params_from_iter(params))
            .map_err(|e| self.convert_error(e))?;

        let compare_columns = self.dataset.compare_columns();
        let key_count = key_columns.len();
        let mut snapshots = Vec::new();
        while let Some(row) = rows.next().map_err(|e| self.convert_error(e))? {
            if snapshots.len() % CANCEL_POLL_ROWS == 0 {
                cancel.check()?;
            }
            let key = read_key(row, key_count)?;
            let mut values = IndexMap::with_capacity(compare_columns.len());
            for (offset, column) in compare_columns.iter().enumerate() {
                let value = row
                    .get_ref(key_count + offset)
                    .map_err(|e| self.convert_error(e))?;
                values.insert(column.clone(), to_value(value));
            }
            snapshots.push(RowSnapshot { key, values });
        }
        cancel.check()?;
        Ok(snapshots)
    }

    fn count_rows(&self) -> Result<u64, DiffError> {
        let connection = self.handle()?;
        let sql = format!("SELECT COUNT(*) FROM {}", self.relation);
        let count: i64 = connection
            .prepare(&sql)
            .map_err(|e| self.convert_error(e))?
            .query_row([], |row| row.get(0))
            .map_err(|e| self.convert_error(e))?;
        Ok(count.max(0) as u64)
    }
}

/// Opens [`DuckDbSource`]s, sharing one database handle per descriptor
#[derive(Default)]
pub struct DuckDbResolver {
    connections: Mutex<HashMap<String, Connection>>,
}

impl DuckDbResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on the database behind `descriptor`, opening it on first use
    pub fn connection(&self, descriptor: &str) -> Result<Connection, DiffError> {
        let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = connections.get(descriptor) {
            return connection
                .try_clone()
                .map_err(|e| DiffError::connection(format!("{}: {}", descriptor, e)));
        }

        let connection = open_database(descriptor)?;
        let handle = connection
            .try_clone()
            .map_err(|e| DiffError::connection(format!("{}: {}", descriptor, e)))?;
        connections.insert(descriptor.to_string(), connection);
        Ok(handle)
    }
}

impl SourceResolver for DuckDbResolver {
    fn open(&self, dataset: &DatasetRef) -> Result<Arc<dyn TabularSource>, DiffError> {
        let descriptor = dataset.connection().unwrap_or(IN_MEMORY);
        let connection = self.connection(descriptor)?;
        Ok(Arc::new(DuckDbSource::new(dataset.clone(), connection)))
    }
}

fn open_database(descriptor: &str) -> Result<Connection, DiffError> {
    let connection = if descriptor == IN_MEMORY {
        Connection::open_in_memory()
    } else {
        if !Path::new(descriptor).exists() {
            return Err(DiffError::connection(format!("database not found: {}", descriptor)));
        }
        Connection::open(descriptor)
    }
    .map_err(|e| DiffError::connection(format!("failed to open {}: {}", descriptor, e)))?;

    connection
        .execute_batch("SET enable_progress_bar=false; SET enable_object_cache=true;")
        .map_err(|e| DiffError::connection(format!("failed to configure {}: {}", descriptor, e)))?;
    log::debug!("Opened DuckDB database {}", descriptor);
    Ok(connection)
}

/// `FROM` clause for a dataset name
fn relation_sql(name: &str) -> String {
    if DuckDbSource::is_supported_format(name) {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Lexicographic bound over the boundary's components. `low` is inclusive,
/// otherwise exclusive. A boundary shorter than the key compares on its prefix.
fn bound_predicate(columns: &[String], bound: &RowKey, low: bool, params: &mut Vec<SqlValue>) -> String {
    let parts = &bound.parts()[..bound.len().min(columns.len())];
    let mut alternatives = Vec::with_capacity(parts.len());
    for i in 0..parts.len() {
        let mut terms = Vec::with_capacity(i + 1);
        for (column, part) in columns.iter().zip(parts).take(i) {
            terms.push(format!("{} = ?", quote_ident(column)));
            params.push(to_sql_value(part));
        }
        let last = i + 1 == parts.len();
        let op = match (low, last) {
            (true, true) => ">=",
            (true, false) => ">",
            (false, _) => "<",
        };
        terms.push(format!("{} {} ?", quote_ident(&columns[i]), op));
        params.push(to_sql_value(&parts[i]));
        alternatives.push(format!("({})", terms.join(" AND ")));
    }
    format!("({})", alternatives.join(" OR "))
}

fn to_sql_value(part: &KeyValue) -> SqlValue {
    match part {
        KeyValue::Int(i) => SqlValue::BigInt(*i),
        KeyValue::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn read_key(row: &duckdb::Row, key_count: usize) -> Result<RowKey, DiffError> {
    let mut parts = Vec::with_capacity(key_count);
    for i in 0..key_count {
        let value = row
            .get_ref(i)
            .map_err(|e| DiffError::query(format!("failed to read key column {}: {}", i, e)))?;
        parts.push(to_key_value(value)?);
    }
    Ok(RowKey::new(parts))
}

fn to_key_value(value: ValueRef<'_>) -> Result<KeyValue, DiffError> {
    Ok(match value {
        ValueRef::Null => return Err(DiffError::query("key column contains NULL")),
        ValueRef::TinyInt(i) => KeyValue::Int(i64::from(i)),
        ValueRef::SmallInt(i) => KeyValue::Int(i64::from(i)),
        ValueRef::Int(i) => KeyValue::Int(i64::from(i)),
        ValueRef::BigInt(i) => KeyValue::Int(i),
        ValueRef::UTinyInt(i) => KeyValue::Int(i64::from(i)),
        ValueRef::USmallInt(i) => KeyValue::Int(i64::from(i)),
        ValueRef::UInt(i) => KeyValue::Int(i64::from(i)),
        ValueRef::UBigInt(i) => match i64::try_from(i) {
            Ok(i) => KeyValue::Int(i),
            Err(_) => return Err(DiffError::query(format!("key value {} exceeds the 64-bit range", i))),
        },
        ValueRef::HugeInt(i) => match i64::try_from(i) {
            Ok(i) => KeyValue::Int(i),
            Err(_) => return Err(DiffError::query(format!("key value {} exceeds the 64-bit range", i))),
        },
        ValueRef::Text(s) => KeyValue::Text(String::from_utf8_lossy(s).to_string()),
        other => return Err(DiffError::query(format!("unsupported key value {:?}", other))),
    })
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::Int(i64::from(i)),
        ValueRef::SmallInt(i) => Value::Int(i64::from(i)),
        ValueRef::Int(i) => Value::Int(i64::from(i)),
        ValueRef::BigInt(i) => Value::Int(i),
        ValueRef::UTinyInt(i) => Value::Int(i64::from(i)),
        ValueRef::USmallInt(i) => Value::Int(i64::from(i)),
        ValueRef::UInt(i) => Value::Int(i64::from(i)),
        ValueRef::UBigInt(i) => i64::try_from(i).map_or_else(|_| Value::Decimal(i.to_string()), Value::Int),
        ValueRef::HugeInt(i) => i64::try_from(i).map_or_else(|_| Value::Decimal(i.to_string()), Value::Int),
        // Widening to f64 would expose binary noise (0.1 -> 0.10000000149011612)
        ValueRef::Float(f) if f.is_finite() => Value::Decimal(f.to_string()),
        ValueRef::Float(f) => Value::Float(f64::from(f)),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Decimal(d) => Value::Decimal(d.to_string()),
        ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Text(format!("<blob:{} bytes>", b.len())),
        ValueRef::Date32(d) => Value::Text(format!("{:?}", d)),
        ValueRef::Time64(_, t) => Value::Text(format!("{:?}", t)),
        ValueRef::Timestamp(_, ts) => Value::Text(format!("{:?}", ts)),
        other => Value::Text(format!("{:?}", other)),
    }
}
