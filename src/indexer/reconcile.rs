//! Directory walks: the startup reconciliation pass and exploration of
//! directories created while running.
//!
//! Walks run on the blocking pool and report what they find to the event
//! loop, which owns every decision about watching, parsing and pruning.

use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::parser::{classify, FileClass};
use crate::paths::clean;

/// What a walk reports to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// A directory to watch.
    Dir(PathBuf),
    /// A translation unit. `force` skips the freshness check.
    Source { path: PathBuf, force: bool },
    /// Any other file seen during reconciliation; may be a header.
    Other(PathBuf),
    /// A previously indexed file that no longer exists.
    Gone(PathBuf),
    /// The walk is over.
    Finished { reconciliation: bool },
}

#[derive(Debug, Clone)]
pub enum WalkMode {
    /// Startup pass: diff against the files the database knows.
    Reconcile {
        known: HashSet<PathBuf>,
        system_include_dirs: Vec<PathBuf>,
    },
    /// A directory that appeared while running.
    Explore,
}

/// Walk `roots`, sending discoveries until done or cancelled.
pub fn walk(roots: &[PathBuf], mut mode: WalkMode, tx: &mpsc::Sender<Discovery>, cancel: &CancellationToken) {
    let reconciliation = matches!(mode, WalkMode::Reconcile { .. });
    let mut counts = (0usize, 0usize);

    for root in roots {
        let walker = WalkBuilder::new(root)
            .hidden(true)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false)
            .follow_links(false)
            .build();

        for entry in walker {
            if cancel.is_cancelled() {
                debug!(root = %root.display(), "walk cancelled");
                return;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "walk error");
                    continue;
                }
            };
            let path = clean(entry.path());
            let Some(file_type) = entry.file_type() else {
                continue;
            };

            let found = if file_type.is_dir() {
                counts.0 += 1;
                Discovery::Dir(path)
            } else if !file_type.is_file() {
                continue;
            } else {
                if let WalkMode::Reconcile { known, .. } = &mut mode {
                    known.remove(&path);
                }
                match classify(&path) {
                    FileClass::Source => {
                        counts.1 += 1;
                        Discovery::Source {
                            path,
                            force: !reconciliation,
                        }
                    }
                    _ if reconciliation => Discovery::Other(path),
                    _ => continue,
                }
            };

            if tx.blocking_send(found).is_err() {
                return;
            }
        }
    }

    if let WalkMode::Reconcile {
        known,
        system_include_dirs,
    } = mode
    {
        let mut gone: Vec<PathBuf> = known
            .into_iter()
            .filter(|f| !is_under_any(f, &system_include_dirs))
            .collect();
        gone.sort();
        info!(
            dirs = counts.0,
            sources = counts.1,
            gone = gone.len(),
            "reconciliation walk finished"
        );
        for path in gone {
            if tx.blocking_send(Discovery::Gone(path)).is_err() {
                return;
            }
        }
    } else {
        debug!(dirs = counts.0, sources = counts.1, "exploration finished");
    }

    let _ = tx.blocking_send(Discovery::Finished { reconciliation });
}

fn is_under_any(path: &Path, prefixes: &[PathBuf]) -> bool {
    prefixes.iter().any(|p| path.starts_with(p))
}
