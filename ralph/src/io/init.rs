//! Project paths and `.ralph/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::backlog::example_backlog;
use crate::io::backlog_store::save_backlog;
use crate::io::config::{RalphConfig, write_config};

const RALPH_GITIGNORE: &str = "runs/\n";

/// Location of the optional config file for a project root.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(".ralph").join("config.toml")
}

/// All canonical paths for a project root.
#[derive(Debug, Clone)]
pub struct RalphPaths {
    pub root: PathBuf,
    pub ralph_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub backlog_path: PathBuf,
    pub progress_path: PathBuf,
}

impl RalphPaths {
    pub fn new(root: impl Into<PathBuf>, cfg: &RalphConfig) -> Self {
        let root = root.into();
        let ralph_dir = root.join(".ralph");
        Self {
            runs_dir: ralph_dir.join("runs"),
            gitignore_path: ralph_dir.join(".gitignore"),
            config_path: config_path(&root),
            backlog_path: cfg.backlog_path(&root),
            progress_path: cfg.progress_path(&root),
            ralph_dir,
            root,
        }
    }

    /// Backlog and progress paths relative to the root, as git reports them.
    pub fn bookkeeping_files(&self) -> Vec<String> {
        [&self.backlog_path, &self.progress_path]
            .into_iter()
            .filter_map(|path| path.strip_prefix(&self.root).ok())
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    /// Backlog path as shown to agents.
    pub fn backlog_display(&self) -> String {
        self.backlog_path
            .strip_prefix(&self.root)
            .unwrap_or(&self.backlog_path)
            .display()
            .to_string()
    }
}

/// Make sure `.ralph/` exists and keeps `runs/` out of git.
pub fn ensure_ralph_dir(paths: &RalphPaths) -> Result<()> {
    create_dir(&paths.ralph_dir)?;
    if !paths.gitignore_path.exists() {
        debug!(path = %paths.gitignore_path.display(), "writing .ralph/.gitignore");
        write_file(&paths.gitignore_path, RALPH_GITIGNORE)?;
    }
    Ok(())
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing ralph-owned files.
    pub force: bool,
}

/// Create `.ralph/` scaffolding, a default config, and an example backlog in `root`.
///
/// Fails if `.ralph/` already exists unless `options.force` is set. An existing
/// backlog is only replaced with `force`.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<RalphPaths> {
    let cfg = RalphConfig::default();
    let paths = RalphPaths::new(root, &cfg);
    if paths.ralph_dir.exists() && !paths.ralph_dir.is_dir() {
        return Err(anyhow!("ralph init: .ralph exists but is not a directory"));
    }
    if paths.ralph_dir.exists() && !options.force {
        return Err(anyhow!(
            "ralph init: .ralph already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.ralph_dir)?;
    write_file(&paths.gitignore_path, RALPH_GITIGNORE)?;
    write_config(&paths.config_path, &cfg)?;
    if !paths.backlog_path.exists() || options.force {
        save_backlog(&paths.backlog_path, &example_backlog(&project_name(root)))?;
    }
    info!(root = %root.display(), "initialized ralph project");
    Ok(paths)
}

fn project_name(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "project".to_string())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}
