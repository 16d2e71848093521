//! Filesystem watching.
//!
//! Directories are registered one at a time (non-recursive) so the watched
//! set mirrors exactly the directories the indexer has discovered. Raw
//! `notify` events are translated into [`FsChange`]s and delivered over a
//! channel; the event loop decides what each change means.

pub mod router;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;

pub use router::{route, Action};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Write,
    Remove,
    Rename,
}

/// One change to one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl FsChange {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Map a `notify` event onto the four change kinds. Access events and
/// metadata-only modifications carry nothing worth reindexing.
pub fn translate(event: &Event) -> Vec<FsChange> {
    let per_path = |kind: ChangeKind| -> Vec<FsChange> {
        event
            .paths
            .iter()
            .map(|p| FsChange::new(p.clone(), kind))
            .collect()
    };

    match &event.kind {
        EventKind::Create(_) => per_path(ChangeKind::Create),
        EventKind::Remove(_) => per_path(ChangeKind::Remove),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::To => per_path(ChangeKind::Create),
            RenameMode::Both => {
                // paths = [from, to]
                let mut out = Vec::new();
                if let Some(from) = event.paths.first() {
                    out.push(FsChange::new(from.clone(), ChangeKind::Rename));
                }
                if let Some(to) = event.paths.get(1) {
                    out.push(FsChange::new(to.clone(), ChangeKind::Create));
                }
                out
            }
            _ => per_path(ChangeKind::Rename),
        },
        EventKind::Modify(_) => per_path(ChangeKind::Write),
        _ => Vec::new(),
    }
}

/// Owns the OS watcher and the set of watched directories.
pub struct DirWatcher {
    inner: Option<RecommendedWatcher>,
    watched: HashSet<PathBuf>,
}

impl DirWatcher {
    /// Start an OS watcher whose events are forwarded to `tx`. Watch errors
    /// are logged and dropped.
    pub fn new(tx: mpsc::Sender<FsChange>) -> Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for change in translate(&event) {
                        if tx.blocking_send(change).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "file watcher error"),
            },
            notify::Config::default(),
        )?;
        Ok(Self {
            inner: Some(watcher),
            watched: HashSet::new(),
        })
    }

    /// A watcher that only tracks the watched set. Changes are injected by hand.
    pub fn detached() -> Self {
        Self {
            inner: None,
            watched: HashSet::new(),
        }
    }

    /// Register `dir`. Already watched directories are left alone.
    pub fn watch(&mut self, dir: &Path) {
        if self.watched.contains(dir) {
            return;
        }
        if let Some(inner) = self.inner.as_mut() {
            if let Err(e) = inner.watch(dir, RecursiveMode::NonRecursive) {
                warn!(dir = %dir.display(), error = %e, "cannot watch directory");
                return;
            }
        }
        debug!(dir = %dir.display(), "watching");
        self.watched.insert(dir.to_path_buf());
    }

    /// Deregister `dir` and everything below it.
    pub fn unwatch(&mut self, dir: &Path) {
        let gone: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|w| w.starts_with(dir))
            .cloned()
            .collect();
        for path in gone {
            if let Some(inner) = self.inner.as_mut() {
                // The OS usually drops the watch itself when the directory goes.
                let _ = inner.unwatch(&path);
            }
            debug!(dir = %path.display(), "unwatched");
            self.watched.remove(&path);
        }
    }

    pub fn is_watched(&self, dir: &Path) -> bool {
        self.watched.contains(dir)
    }

    pub fn len(&self) -> usize {
        self.watched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }
}
