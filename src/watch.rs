//! Polling save detection
//!
//! Scans a directory tree for files matching the configured globs and
//! reports the ones whose modification time changed since the last scan.
//! Each reported path is fed to [`SaveHandler::on_file_saved`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::signal::ShutdownSignal;
use crate::sink::OutputSink;
use crate::trigger::SaveHandler;

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target"];

/// Errors setting up a watcher
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("invalid watch pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("watch root is not a directory: {}", .0.display())]
    Root(PathBuf),
}

/// Tracks modification times under a root directory.
#[derive(Debug)]
pub struct FileWatcher {
    root: PathBuf,
    matcher: GlobSet,
    seen: HashMap<PathBuf, SystemTime>,
}

impl FileWatcher {
    /// Create a watcher and record the current state of the tree.
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self, WatchError> {
        if !root.is_dir() {
            return Err(WatchError::Root(root.to_path_buf()));
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }

        let mut watcher = Self {
            root: root.to_path_buf(),
            matcher: builder.build()?,
            seen: HashMap::new(),
        };
        watcher.seen = watcher.snapshot();
        debug!(files = watcher.seen.len(), root = %root.display(), "watching");
        Ok(watcher)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files currently tracked.
    pub fn tracked(&self) -> usize {
        self.seen.len()
    }

    /// Files created or modified since the previous scan, sorted by path.
    pub fn scan(&mut self) -> Vec<PathBuf> {
        let current = self.snapshot();
        let mut changed: Vec<PathBuf> = current
            .iter()
            .filter(|(path, mtime)| self.seen.get(*path) != Some(*mtime))
            .map(|(path, _)| path.clone())
            .collect();
        changed.sort();
        self.seen = current;
        changed
    }

    fn snapshot(&self) -> HashMap<PathBuf, SystemTime> {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let relative = e.path().strip_prefix(&self.root).unwrap_or(e.path());
                self.matcher.is_match(relative)
            })
            .filter_map(|e| {
                let mtime = e.metadata().ok()?.modified().ok()?;
                Some((e.into_path(), mtime))
            })
            .collect()
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    let name: &str = &name;
    name.starts_with('.') || SKIPPED_DIRS.contains(&name)
}

/// Drive `handler` from filesystem changes until `shutdown` is requested.
///
/// Polls the supervisor every `poll_interval_ms` and rescans the tree every
/// `watch.interval_ms`. Any in-flight run is stopped before returning.
pub fn watch_loop<S: OutputSink>(
    handler: &mut SaveHandler<S>,
    watcher: &mut FileWatcher,
    shutdown: &ShutdownSignal,
) {
    let poll_interval = handler.settings().poll_interval();
    let scan_interval = handler.settings().watch_interval();
    let mut last_scan = Instant::now();

    info!(root = %watcher.root().display(), files = watcher.tracked(), "watching for saves");

    while !shutdown.is_requested() {
        if last_scan.elapsed() >= scan_interval {
            for path in watcher.scan() {
                handler.on_file_saved(&path);
            }
            last_scan = Instant::now();
        }

        handler.tick();
        std::thread::sleep(poll_interval);
    }

    handler.shutdown();
}
