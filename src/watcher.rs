//! Stability-gated polling watcher.
//!
//! Capture devices write files incrementally, so a file is only reported once
//! its size and modification time have stayed the same for a quiet window.
//! The directory is sampled at a fixed interval; files that already exist
//! when the watcher starts are never reported.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, trace};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub stability_window: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            stability_window: Duration::from_millis(2000),
        }
    }
}

/// Size and mtime sample of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// A file that has stopped changing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyFile {
    pub path: PathBuf,
    pub first_seen_at: DateTime<Utc>,
    pub stable_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Ready(ReadyFile),
    Error { path: PathBuf, message: String },
}

#[derive(Debug)]
struct Pending {
    stat: FileStat,
    changed_at: Instant,
    first_seen_at: DateTime<Utc>,
}

/// Timing core of the watcher, fed with one directory sample per poll.
#[derive(Debug)]
pub struct StabilityTracker {
    window: Duration,
    known: HashSet<PathBuf>,
    pending: HashMap<PathBuf, Pending>,
}

impl StabilityTracker {
    /// Files in `baseline` are treated as already handled.
    pub fn new(window: Duration, baseline: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            window,
            known: baseline.into_iter().collect(),
            pending: HashMap::new(),
        }
    }

    /// Feed a complete sample of the tree taken at `now`; returns files whose
    /// stat has not changed for the quiet window, in path order.
    pub fn observe(
        &mut self,
        now: Instant,
        wall: DateTime<Utc>,
        sample: impl IntoIterator<Item = (PathBuf, FileStat)>,
    ) -> Vec<ReadyFile> {
        let sample: HashMap<PathBuf, FileStat> = sample.into_iter().collect();

        // Vanished files: forget them so a re-created file counts as new.
        self.known.retain(|p| sample.contains_key(p));
        self.pending.retain(|p, _| sample.contains_key(p));

        let mut ready = Vec::new();
        for (path, stat) in sample {
            if self.known.contains(&path) {
                continue;
            }
            match self.pending.get_mut(&path) {
                None => {
                    trace!(path = %path.display(), "new file");
                    self.pending.insert(
                        path,
                        Pending {
                            stat,
                            changed_at: now,
                            first_seen_at: wall,
                        },
                    );
                }
                Some(p) if p.stat != stat => {
                    p.stat = stat;
                    p.changed_at = now;
                }
                Some(p) => {
                    if now.saturating_duration_since(p.changed_at) >= self.window {
                        ready.push(ReadyFile {
                            path: path.clone(),
                            first_seen_at: p.first_seen_at,
                            stable_at: wall,
                        });
                    }
                }
            }
        }

        for file in &ready {
            self.pending.remove(&file.path);
            self.known.insert(file.path.clone());
        }
        ready.sort_by(|a, b| a.path.cmp(&b.path));
        ready
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn is_hidden(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .map(|rel| {
            rel.components()
                .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        })
        .unwrap_or(false)
}

/// One sample of the tree below `root`: regular, non-hidden files only.
#[derive(Debug, Default)]
struct Scan {
    files: Vec<(PathBuf, FileStat)>,
    errors: Vec<(PathBuf, String)>,
    root_error: Option<String>,
}

fn scan(root: &Path) -> Scan {
    let mut out = Scan::default();
    if let Err(err) = std::fs::metadata(root) {
        out.root_error = Some(err.to_string());
        return out;
    }
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(root, e.path()));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                out.errors.push((path, err.to_string()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => out.files.push((
                entry.path().to_path_buf(),
                FileStat {
                    size: meta.len(),
                    modified: meta.modified().ok(),
                },
            )),
            // Deleted between listing and stat; the next sample settles it.
            Err(err) if err.io_error().map(|e| e.kind()) == Some(std::io::ErrorKind::NotFound) => {}
            Err(err) => out.errors.push((entry.path().to_path_buf(), err.to_string())),
        }
    }
    out
}

async fn scan_blocking(root: PathBuf) -> Scan {
    let fallback_root = root.clone();
    tokio::task::spawn_blocking(move || scan(&root))
        .await
        .unwrap_or_else(|err| Scan {
            root_error: Some(format!("scan of {} aborted: {err}", fallback_root.display())),
            ..Scan::default()
        })
}

struct WatchState {
    root: PathBuf,
    settings: WatchSettings,
    tracker: Option<StabilityTracker>,
    queue: VecDeque<WatchEvent>,
    last_root_error: Option<String>,
    /// Per-entry errors reported by the previous scan.
    last_entry_errors: HashSet<(PathBuf, String)>,
}

impl WatchState {
    fn new(root: PathBuf, settings: WatchSettings) -> Self {
        Self {
            root,
            settings,
            tracker: None,
            queue: VecDeque::new(),
            last_root_error: None,
            last_entry_errors: HashSet::new(),
        }
    }

    fn record_root_error(&mut self, message: Option<String>) {
        if let Some(message) = &message {
            if self.last_root_error.as_ref() != Some(message) {
                self.queue.push_back(WatchEvent::Error {
                    path: self.root.clone(),
                    message: message.clone(),
                });
            }
        }
        self.last_root_error = message;
    }

    /// Queue only errors that were not already reported by the previous
    /// scan. An error that clears and comes back is reported again.
    fn record_entry_errors(&mut self, errors: Vec<(PathBuf, String)>) {
        let current: HashSet<(PathBuf, String)> = errors.into_iter().collect();
        for (path, message) in &current {
            if !self.last_entry_errors.contains(&(path.clone(), message.clone())) {
                self.queue.push_back(WatchEvent::Error {
                    path: path.clone(),
                    message: message.clone(),
                });
            }
        }
        self.last_entry_errors = current;
    }

    async fn start(&mut self) {
        let sample = scan_blocking(self.root.clone()).await;
        self.record_root_error(sample.root_error);
        debug!(root = %self.root.display(), existing = sample.files.len(), "watcher baseline");
        self.tracker = Some(StabilityTracker::new(
            self.settings.stability_window,
            sample.files.into_iter().map(|(p, _)| p),
        ));
    }

    async fn poll(&mut self) {
        let sample = scan_blocking(self.root.clone()).await;
        let failed = sample.root_error.is_some();
        self.record_root_error(sample.root_error);
        if failed {
            // Keep pending state; an unreadable root is not an empty one.
            return;
        }
        self.record_entry_errors(sample.errors);
        if let Some(tracker) = self.tracker.as_mut() {
            let ready = tracker.observe(Instant::now(), Utc::now(), sample.files);
            self.queue
                .extend(ready.into_iter().map(WatchEvent::Ready));
        }
    }
}

/// Watch `root` for new files. The returned stream is lazy (the baseline is
/// taken on first poll), never ends, and cannot be restarted.
pub fn observe(root: impl Into<PathBuf>, settings: WatchSettings) -> impl Stream<Item = WatchEvent> {
    let state = WatchState::new(root.into(), settings);
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((event, state));
            }
            if state.tracker.is_none() {
                state.start().await;
                continue;
            }
            tokio::time::sleep(state.settings.poll_interval).await;
            state.poll().await;
        }
    })
}
