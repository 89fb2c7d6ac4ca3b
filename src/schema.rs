//! Record validation against named JSON schemas
//!
//! Schemas are compiled once at load time with `jsonschema`; a file that does
//! not compile is skipped the same way an unparseable one is.

use crate::error::{ReconError, Result};
use jsonschema::JSONSchema;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

/// Shared fragment file that is not a schema on its own
const BASE_SCHEMA_FILE: &str = "base_schema.json";

/// Base that relative `$id` values are resolved against before compiling
const LOCAL_ID_BASE: &str = "tabrecon:///schemas/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub schema_name: String,
    pub version: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validates a record against a schema identified by name
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema_name: &str, record: &Value) -> ValidationResult;
}

#[derive(Clone)]
struct LoadedSchema {
    version: String,
    compiled: Arc<JSONSchema>,
}

impl fmt::Debug for LoadedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedSchema").field("version", &self.version).finish_non_exhaustive()
    }
}

/// Schemas loaded from a directory tree, keyed by `$id` or file stem
#[derive(Debug, Clone, Default)]
pub struct JsonSchemaRegistry {
    schemas: BTreeMap<String, LoadedSchema>,
}

impl JsonSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` file under `dir`. Files that fail to parse or
    /// compile are skipped with a warning; a missing directory yields an
    /// empty registry.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        if !dir.exists() {
            log::warn!("Schema directory does not exist: {}", dir.display());
            return Ok(registry);
        }

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().map_or(true, |ext| ext != "json")
                || entry.file_name() == BASE_SCHEMA_FILE
            {
                continue;
            }

            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            let loaded = fs::read_to_string(path)
                .map_err(ReconError::from)
                .and_then(|content| serde_json::from_str::<Value>(&content).map_err(ReconError::from))
                .and_then(|schema| {
                    let id = schema.get("$id").and_then(Value::as_str).unwrap_or(stem).to_string();
                    registry.insert(id.clone(), schema).map(|_| id)
                });
            match loaded {
                Ok(id) => log::debug!("Loaded schema '{}' from {}", id, path.display()),
                Err(e) => log::warn!("Failed to load schema {}: {}", path.display(), e),
            }
        }

        log::info!("Loaded {} schema(s) from {}", registry.len(), dir.display());
        Ok(registry)
    }

    /// Compile `schema` and register it under `id`, replacing any previous entry.
    pub fn insert(&mut self, id: impl Into<String>, schema: Value) -> Result<()> {
        let id = id.into();
        let version = schema
            .get("$id")
            .and_then(Value::as_str)
            .and_then(|schema_id| schema_id.rsplit('/').next())
            .unwrap_or("v1")
            .to_string();

        let schema = with_absolute_id(schema);
        let compiled = JSONSchema::compile(&schema)
            .map_err(|e| ReconError::schema(format!("schema '{}' does not compile: {}", id, e)))?;

        self.schemas.insert(
            id,
            LoadedSchema {
                version,
                compiled: Arc::new(compiled),
            },
        );
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl SchemaValidator for JsonSchemaRegistry {
    fn validate(&self, schema_name: &str, record: &Value) -> ValidationResult {
        let Some(schema) = self.schemas.get(schema_name) else {
            return ValidationResult {
                schema_name: schema_name.to_string(),
                version: "unknown".to_string(),
                valid: false,
                errors: vec![format!("schema '{}' does not exist", schema_name)],
                warnings: Vec::new(),
            };
        };

        let errors: Vec<String> = match schema.compiled.validate(record) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    let path = if path.is_empty() { "/".to_string() } else { path };
                    format!("{}: {}", path, e)
                })
                .collect(),
        };

        ValidationResult {
            schema_name: schema_name.to_string(),
            version: schema.version.clone(),
            valid: errors.is_empty(),
            errors,
            warnings: Vec::new(),
        }
    }
}

/// Table contracts often carry a bare `$id` such as `dwd/customer/v2`, which is
/// not a URI the compiler can use as a resolution scope.
fn with_absolute_id(mut schema: Value) -> Value {
    if let Some(Value::String(id)) = schema.get_mut("$id") {
        if !has_scheme(id) {
            *id = format!("{}{}", LOCAL_ID_BASE, id.trim_start_matches('/'));
        }
    }
    schema
}

fn has_scheme(id: &str) -> bool {
    match id.split_once(':') {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}
