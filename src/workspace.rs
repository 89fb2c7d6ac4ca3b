//! Workspace management for tabrecon operations

use crate::config::AppConfig;
use crate::error::{ReconError, Result};
use crate::monitor::{HistorySink, MonitorRegistry, MonitorResult};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const WORKSPACE_DIR: &str = ".tabrecon";

/// Manages the .tabrecon workspace directory
#[derive(Debug, Clone)]
pub struct ReconWorkspace {
    /// Project root directory (where .tabrecon/ lives)
    pub root: PathBuf,
    /// .tabrecon/ directory path
    pub recon_dir: PathBuf,
    /// .tabrecon/history/ directory path
    pub history_dir: PathBuf,
}

impl ReconWorkspace {
    /// Find existing workspace or create a new one
    pub fn find_or_create(start_dir: Option<&Path>) -> Result<Self> {
        let current_dir = std::env::current_dir()?;
        let start = start_dir.unwrap_or(&current_dir);

        if let Some(workspace) = Self::find_existing(start)? {
            return Ok(workspace);
        }
        Self::create_new(start.to_path_buf())
    }

    /// Find an existing workspace, failing if there is none
    pub fn open(start_dir: Option<&Path>) -> Result<Self> {
        let current_dir = std::env::current_dir()?;
        let start = start_dir.unwrap_or(&current_dir);
        Self::find_existing(start)?.ok_or_else(|| {
            ReconError::workspace(format!(
                "no {} workspace found from {}; run `tabrecon init` first",
                WORKSPACE_DIR,
                start.display()
            ))
        })
    }

    /// Walk up the directory tree looking for .tabrecon, stopping at a git root
    fn find_existing(start_dir: &Path) -> Result<Option<Self>> {
        let mut current = start_dir;

        loop {
            let recon_dir = current.join(WORKSPACE_DIR);
            if recon_dir.is_dir() {
                return Ok(Some(Self::from_root(current.to_path_buf())));
            }
            if current.join(".git").exists() {
                break;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        Ok(None)
    }

    /// Create a new workspace in the specified root directory
    pub fn create_new(root: PathBuf) -> Result<Self> {
        let workspace = Self::from_root(root);

        fs::create_dir_all(&workspace.recon_dir)?;
        fs::create_dir_all(&workspace.history_dir)?;
        workspace.create_config_with_force(false)?;
        workspace.ensure_gitignore()?;

        log::info!("Created tabrecon workspace at: {}", workspace.root.display());
        Ok(workspace)
    }

    pub fn from_root(root: PathBuf) -> Self {
        let recon_dir = root.join(WORKSPACE_DIR);
        let history_dir = recon_dir.join("history");
        Self {
            root,
            recon_dir,
            history_dir,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.recon_dir.join("config.json")
    }

    /// History file of one monitor rule
    pub fn history_path(&self, rule_name: &str) -> PathBuf {
        self.history_dir.join(format!("{}.jsonl", file_safe(rule_name)))
    }

    /// Write the default configuration unless one exists (or `force`)
    pub fn create_config_with_force(&self, force: bool) -> Result<()> {
        let config_path = self.config_path();
        if config_path.exists() && !force {
            return Ok(());
        }
        AppConfig::default().save(&config_path)
    }

    /// Configuration with environment overrides applied
    pub fn load_config(&self) -> Result<AppConfig> {
        AppConfig::load_with_env(&self.config_path())
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        config.save(&self.config_path())
    }

    /// Resolve a workspace-relative path
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Ensure .gitignore excludes run history
    pub fn ensure_gitignore(&self) -> Result<()> {
        let gitignore_path = self.root.join(".gitignore");
        let entry = "# Ignore monitor run history\n.tabrecon/history/\n";

        if gitignore_path.exists() {
            let content = fs::read_to_string(&gitignore_path)?;
            if !content.contains(".tabrecon/history/") {
                let new_content = if content.ends_with('\n') {
                    format!("{}\n{}", content, entry)
                } else {
                    format!("{}\n\n{}", content, entry)
                };
                fs::write(gitignore_path, new_content)?;
                log::info!("Updated .gitignore with tabrecon entries");
            }
        } else {
            fs::write(gitignore_path, entry)?;
            log::info!("Created .gitignore with tabrecon entries");
        }

        Ok(())
    }

    /// Persisted results of a rule, oldest first. Unreadable lines are skipped.
    pub fn load_history(&self, rule_name: &str) -> Result<Vec<MonitorResult>> {
        let path = self.history_path(rule_name);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&path)?);
        let mut results = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MonitorResult>(&line) {
                Ok(result) => results.push(result),
                Err(e) => log::warn!("Skipping line {} of {}: {}", line_no + 1, path.display(), e),
            }
        }
        Ok(results)
    }

    /// Append one result, keeping only the newest `retention` lines
    pub fn append_history(&self, result: &MonitorResult, retention: usize) -> Result<()> {
        fs::create_dir_all(&self.history_dir)?;
        let path = self.history_path(&result.rule_name);

        let mut lines: Vec<String> = if path.exists() {
            fs::read_to_string(&path)?
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };
        lines.push(serde_json::to_string(result)?);
        let excess = lines.len().saturating_sub(retention.max(1));

        let mut content = lines[excess..].join("\n");
        content.push('\n');
        let tmp_path = path.with_extension("jsonl.tmp");
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Seed every registered rule with its persisted history
    pub fn restore_history(&self, registry: &MonitorRegistry) -> Result<usize> {
        let mut restored = 0;
        for name in registry.names() {
            let results = self.load_history(&name)?;
            let keep = results.len().saturating_sub(registry.retention());
            restored += results.len() - keep;
            registry.seed_history(&name, results.into_iter().skip(keep))?;
        }
        log::debug!("Restored {} historical result(s)", restored);
        Ok(restored)
    }
}

impl HistorySink for ReconWorkspace {
    fn record(&self, result: &MonitorResult, retention: usize) -> Result<()> {
        self.append_history(result, retention)
    }
}

/// Rule names become file names; keep them portable
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}
