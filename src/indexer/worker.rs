//! Parser worker pool.
//!
//! Workers share one dispatch receiver. Each takes a file, parses it on the
//! blocking pool and sends the snapshot back to the event loop. A worker
//! exits when the dispatch channel closes or the loop stops taking results.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::db::types::TuSnapshot;
use crate::parser::TuParser;

pub fn spawn_workers(
    count: usize,
    parser: Arc<TuParser>,
    jobs: mpsc::Receiver<PathBuf>,
    results: mpsc::Sender<TuSnapshot>,
) -> Vec<JoinHandle<()>> {
    let jobs = Arc::new(Mutex::new(jobs));

    (0..count)
        .map(|worker| {
            let jobs = Arc::clone(&jobs);
            let parser = Arc::clone(&parser);
            let results = results.clone();
            tokio::spawn(async move {
                run_worker(worker, jobs, parser, results).await;
            })
        })
        .collect()
}

async fn run_worker(
    worker: usize,
    jobs: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
    parser: Arc<TuParser>,
    results: mpsc::Sender<TuSnapshot>,
) {
    loop {
        let file = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(file) = file else {
            break;
        };

        trace!(worker, file = %file.display(), "parsing");
        let job_parser = Arc::clone(&parser);
        let job_file = file.clone();
        let snapshot = match tokio::task::spawn_blocking(move || job_parser.parse(&job_file)).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(worker, file = %file.display(), error = %e, "parse task failed");
                TuSnapshot::empty(file)
            }
        };

        if results.send(snapshot).await.is_err() {
            break;
        }
    }
    debug!(worker, "worker stopped");
}
