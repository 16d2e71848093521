//! Incremental indexing pipeline.
//!
//! A single event loop owns the scheduler, the symbol database and the
//! watched directory set. Everything else (parser workers, directory walks,
//! the filesystem watcher, client connections) talks to it over channels:
//!
//! ```text
//!   walks ──Discovery──┐
//!   watcher ─FsChange──┤
//!   clients ─Command───┼──> event loop ──path──> workers
//!   workers ─snapshot──┘        │
//!                               └──> SymbolDb (commit, flush)
//! ```
//!
//! Header changes never parse the header itself. They requeue every file
//! the database says includes it.

pub mod reconcile;
pub mod scheduler;
pub mod worker;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::daemon::protocol::{Request, Response};
use crate::db::{DbStats, SymbolDb, TuSnapshot};
use crate::error::{IndexError, Result};
use crate::parser::{classify, CFrontend, CompileArgs, FileClass, Frontend, TuParser};
use crate::paths::PathConvention;
use crate::watcher::{route, Action, DirWatcher, FsChange};

use reconcile::{Discovery, WalkMode};
use scheduler::Scheduler;

const DISCOVERY_CAPACITY: usize = 1024;
const CHANGE_CAPACITY: usize = 1024;
const COMMAND_CAPACITY: usize = 64;

/// Messages accepted by the event loop.
#[derive(Debug)]
pub enum Command {
    Query {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    /// A change delivered by something other than the OS watcher.
    Change(FsChange),
    Shutdown,
}

/// Progress counters reported by `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub reconciled: bool,
    pub workers: usize,
    pub in_flight: usize,
    pub backlog: usize,
    pub watched_dirs: usize,
    pub parsed: u64,
    pub discarded: u64,
    pub units: usize,
    pub known_files: usize,
    pub declarations: usize,
    pub uses: usize,
}

impl IndexStatus {
    /// Reconciliation is over and no parse is running or waiting.
    pub fn is_settled(&self) -> bool {
        self.reconciled && self.in_flight == 0 && self.backlog == 0
    }
}

/// Cloneable handle to a running event loop.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    commands: mpsc::Sender<Command>,
    stopped: CancellationToken,
}

impl IndexHandle {
    /// Answer a client request. Database reads are serialized with writes.
    pub async fn request(&self, request: Request) -> Result<Response> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Query { request, reply })
            .await
            .map_err(|_| IndexError::ChannelClosed("index command"))?;
        rx.await.map_err(|_| IndexError::ChannelClosed("index reply"))
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        match self.request(Request::Status).await? {
            Response::Ok { data } => {
                serde_json::from_value(data).map_err(|e| IndexError::Serialize(e.to_string()))
            }
            other => Err(IndexError::Serialize(format!("unexpected status reply: {:?}", other))),
        }
    }

    /// Feed a filesystem change in as if the watcher had seen it.
    pub async fn inject(&self, change: FsChange) -> Result<()> {
        self.commands
            .send(Command::Change(change))
            .await
            .map_err(|_| IndexError::ChannelClosed("index command"))
    }

    /// Ask the loop to stop. Returns immediately; await the join handle
    /// from [`start`] or [`IndexHandle::stopped`] to wait for teardown.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// Resolves once the loop has torn down and flushed.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }
}

/// Start indexing with the tree-sitter C frontend.
pub fn start(config: &Config) -> Result<(IndexHandle, JoinHandle<Result<()>>)> {
    let frontend = Arc::new(CFrontend::new(config.system_include_dirs.clone()));
    start_with_frontend(config, frontend)
}

/// Start the event loop, workers, watcher and startup reconciliation.
/// Must be called from within a tokio runtime.
pub fn start_with_frontend(
    config: &Config,
    frontend: Arc<dyn Frontend>,
) -> Result<(IndexHandle, JoinHandle<Result<()>>)> {
    config.validate()?;
    let convention = PathConvention::from_roots(&config.roots)?;
    let args = CompileArgs::load(&convention)?;
    info!(roots = ?convention.roots(), entries = args.len(), "compilation arguments loaded");

    let db = SymbolDb::open(&config.db_path());
    let worker_count = config.worker_count();
    let parser = Arc::new(TuParser::new(Arc::new(args), frontend));

    // In-flight parses never exceed `worker_count`, so neither queue can fill.
    let (dispatch_tx, dispatch_rx) = mpsc::channel(worker_count);
    let (done_tx, done_rx) = mpsc::channel(worker_count);
    let workers = worker::spawn_workers(worker_count, parser, dispatch_rx, done_tx);

    let (fs_tx, fs_rx) = mpsc::channel(CHANGE_CAPACITY);
    let watcher = if config.watch {
        DirWatcher::new(fs_tx)?
    } else {
        DirWatcher::detached()
    };

    let (discovery_tx, discovery_rx) = mpsc::channel(DISCOVERY_CAPACITY);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let stopped = CancellationToken::new();

    let mut event_loop = EventLoop {
        convention,
        system_include_dirs: config.system_include_dirs.clone(),
        db,
        scheduler: Scheduler::new(worker_count),
        watcher,
        dispatch: dispatch_tx,
        discovery: discovery_tx,
        walks: Vec::new(),
        workers,
        cancel: CancellationToken::new(),
        reconciled: false,
        parsed: 0,
        discarded: 0,
    };

    let known = event_loop.db.known_files();
    info!(known = known.len(), workers = worker_count, "starting reconciliation");
    let roots = event_loop.convention.roots().to_vec();
    event_loop.spawn_walk(
        roots,
        WalkMode::Reconcile {
            known,
            system_include_dirs: config.system_include_dirs.clone(),
        },
    );

    let channels = Channels {
        done: done_rx,
        changes: fs_rx,
        discoveries: discovery_rx,
        commands: command_rx,
    };
    let flush_period = config.flush_interval();
    let loop_stopped = stopped.clone();
    let join = tokio::spawn(async move {
        let result = event_loop.run(channels, flush_period).await;
        loop_stopped.cancel();
        result
    });

    Ok((
        IndexHandle {
            commands: command_tx,
            stopped,
        },
        join,
    ))
}

struct Channels {
    done: mpsc::Receiver<TuSnapshot>,
    changes: mpsc::Receiver<FsChange>,
    discoveries: mpsc::Receiver<Discovery>,
    commands: mpsc::Receiver<Command>,
}

struct EventLoop {
    convention: PathConvention,
    system_include_dirs: Vec<PathBuf>,
    db: SymbolDb,
    scheduler: Scheduler,
    watcher: DirWatcher,
    dispatch: mpsc::Sender<PathBuf>,
    discovery: mpsc::Sender<Discovery>,
    walks: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    reconciled: bool,
    parsed: u64,
    discarded: u64,
}

impl EventLoop {
    async fn run(mut self, channels: Channels, flush_period: Duration) -> Result<()> {
        let Channels {
            mut done,
            mut changes,
            mut discoveries,
            mut commands,
        } = channels;

        let mut flush = interval_at(Instant::now() + flush_period, flush_period);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(snapshot) = done.recv() => self.on_parsed(snapshot),
                Some(change) = changes.recv() => self.on_change(change),
                Some(found) = discoveries.recv() => self.on_discovery(found),
                command = commands.recv() => match command {
                    Some(Command::Query { request: Request::Shutdown, reply }) => {
                        let _ = reply.send(Response::Goodbye);
                        break;
                    }
                    Some(Command::Query { request, reply }) => {
                        let _ = reply.send(self.answer(request));
                    }
                    Some(Command::Change(change)) => self.on_change(change),
                    Some(Command::Shutdown) | None => break,
                },
                _ = flush.tick() => self.flush_periodic(flush_period),
            }
        }

        info!(parsed = self.parsed, discarded = self.discarded, "index loop stopping");
        self.cancel.cancel();

        // Walks blocked on a full discovery queue fail their send and return.
        drop(discoveries);
        for walk in self.walks.drain(..) {
            let _ = walk.await;
        }

        // Workers finish the parse they hold, fail to report it and exit.
        drop(done);
        let EventLoop {
            mut db,
            watcher,
            dispatch,
            workers,
            ..
        } = self;
        drop(dispatch);
        for handle in workers {
            let _ = handle.await;
        }
        info!("workers stopped");

        drop(changes);
        drop(watcher);

        db.flush(SystemTime::now())?;
        info!("index flushed");
        Ok(())
    }

    fn on_parsed(&mut self, snapshot: TuSnapshot) {
        let completion = self.scheduler.complete(&snapshot.file);

        if completion.commit {
            if snapshot.mtime.is_none() && !snapshot.file.exists() {
                debug!(file = %snapshot.file.display(), "parsed file vanished");
                self.db.remove_file_references(&snapshot.file);
            } else {
                trace!(
                    file = %snapshot.file.display(),
                    declarations = snapshot.declarations.len(),
                    uses = snapshot.uses.len(),
                    "committing snapshot"
                );
                self.db.insert_snapshot(snapshot);
            }
            self.parsed += 1;
        } else {
            debug!(file = %snapshot.file.display(), "discarding stale snapshot");
            self.discarded += 1;
        }

        if let Some(next) = completion.next {
            self.dispatch(next);
        }
    }

    fn request_parse(&mut self, file: PathBuf) {
        if let Some(file) = self.scheduler.request(file) {
            self.dispatch(file);
        }
    }

    fn dispatch(&mut self, file: PathBuf) {
        let mut next = Some(file);
        while let Some(file) = next.take() {
            debug!(file = %file.display(), "dispatching parse");
            match self.dispatch.try_send(file) {
                Ok(()) => {}
                Err(TrySendError::Full(file)) | Err(TrySendError::Closed(file)) => {
                    warn!(file = %file.display(), "no worker accepted parse");
                    next = self.scheduler.complete(&file).next;
                }
            }
        }
    }

    /// Requeue every file that includes `header`.
    fn reparse_includers(&mut self, header: &Path) {
        let includers = self.db.get_includers(header);
        if includers.is_empty() {
            return;
        }
        debug!(header = %header.display(), count = includers.len(), "reparsing includers");
        for file in includers {
            self.request_parse(file);
        }
    }

    fn on_change(&mut self, change: FsChange) {
        let change = FsChange::new(self.convention.normalize(&change.path), change.kind);
        let db = &self.db;
        let action = route(&change, |p| db.file_exists(p));
        trace!(path = %change.path.display(), kind = ?change.kind, ?action, "change");

        match action {
            Action::Parse(file) => self.request_parse(file),
            Action::RemoveReferences(file) => {
                if self.db.remove_file_references(&file) {
                    debug!(file = %file.display(), "removed");
                }
                // A parse already running read the file before it went. Mark
                // it stale so its snapshot is dropped; the reparse finds
                // nothing and commits the removal.
                if self.scheduler.is_in_flight(&file) {
                    self.request_parse(file);
                }
            }
            Action::ReparseIncluders(header) => self.reparse_includers(&header),
            Action::ExploreDir(dir) => {
                self.watcher.watch(&dir);
                self.spawn_walk(vec![dir], WalkMode::Explore);
            }
            Action::Unwatch(dir) => self.watcher.unwatch(&dir),
            Action::Ignore => {}
        }
    }

    fn on_discovery(&mut self, found: Discovery) {
        match found {
            Discovery::Dir(dir) => self.watcher.watch(&dir),
            Discovery::Source { path, force: true } => self.request_parse(path),
            Discovery::Source { path, force: false } => match self.db.is_uptodate(&path) {
                Ok((true, true)) => trace!(file = %path.display(), "up to date"),
                Ok(_) => self.request_parse(path),
                Err(e) => debug!(file = %path.display(), error = %e, "cannot stat discovered file"),
            },
            Discovery::Other(path) => self.reparse_includers(&path),
            Discovery::Gone(path) => {
                debug!(file = %path.display(), "no longer present");
                let was_unit = self.db.remove_file_references(&path);
                if !was_unit && classify(&path) == FileClass::Header {
                    self.reparse_includers(&path);
                }
            }
            Discovery::Finished { reconciliation: true } => {
                self.reconciled = true;
                info!(
                    in_flight = self.scheduler.in_flight_len(),
                    backlog = self.scheduler.backlog_len(),
                    watched = self.watcher.len(),
                    "reconciliation finished"
                );
            }
            Discovery::Finished { reconciliation: false } => {}
        }
    }

    fn spawn_walk(&mut self, roots: Vec<PathBuf>, mode: WalkMode) {
        self.walks.retain(|walk| !walk.is_finished());
        let tx = self.discovery.clone();
        let cancel = self.cancel.clone();
        self.walks.push(tokio::task::spawn_blocking(move || {
            reconcile::walk(&roots, mode, &tx, &cancel);
        }));
    }

    fn flush_periodic(&mut self, period: Duration) {
        let cutoff = SystemTime::now()
            .checked_sub(period)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        match self.db.flush(cutoff) {
            Ok(true) => debug!("index flushed"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "index flush failed"),
        }
    }

    fn status(&self) -> IndexStatus {
        let DbStats {
            units,
            known_files,
            declarations,
            uses,
        } = self.db.stats();
        IndexStatus {
            reconciled: self.reconciled,
            workers: self.scheduler.limit(),
            in_flight: self.scheduler.in_flight_len(),
            backlog: self.scheduler.backlog_len(),
            watched_dirs: self.watcher.len(),
            parsed: self.parsed,
            discarded: self.discarded,
            units,
            known_files,
            declarations,
            uses,
        }
    }

    fn answer(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,
            Request::Status => Response::ok(self.status()),
            Request::Symbol { file, line, column } => {
                let file = self.convention.normalize(&file);
                match self.db.symbol_at(&file, line, column) {
                    Some(info) => Response::ok(info),
                    None => Response::error(format!("no symbol at {}:{}:{}", file.display(), line, column)),
                }
            }
            Request::Lookup { usr } => match self.db.lookup(&usr) {
                Some(info) => Response::ok(info),
                None => Response::error(format!("unknown symbol {}", usr)),
            },
            Request::Includers { header } => {
                let header = self.convention.normalize(&header);
                Response::ok(self.db.get_includers(&header))
            }
            // Handled by the loop before it gets here.
            Request::Shutdown => Response::Goodbye,
        }
    }
}
