//! # cnav
//!
//! Incremental symbol index for C source trees.
//!
//! A daemon keeps declarations, definitions and uses for every translation
//! unit under its roots, and keeps them current as files change, so "where
//! is this defined" and "who calls this" never wait on a parse.
//!
//! ## Key Features
//!
//! - **Incremental**: only changed files and the includers of changed headers are reparsed
//! - **Bounded**: at most one parse per worker, one pending parse per file
//! - **Persistent**: the index image survives restarts; startup only reparses what changed
//! - **Compile-database aware**: `-D` and `-I` from `compile_commands.json`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cnav::{config::Config, daemon::Request, indexer};
//!
//! # async fn demo() -> cnav::Result<()> {
//! let config = Config::default();
//! let (handle, join) = indexer::start(&config)?;
//! let status = handle.status().await?;
//! println!("{} units indexed", status.units);
//! let reply = handle.request(Request::Lookup { usr: "c:@F@main".into() }).await?;
//! println!("{:?}", reply);
//! handle.shutdown().await;
//! # let _ = join.await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod indexer;
pub mod parser;
pub mod paths;
pub mod watcher;

// Re-exports for convenience
pub use error::{IndexError, Result};

pub use config::Config;
pub use db::{SymbolDb, SymbolInfo, SymbolLocation, TuSnapshot};
pub use indexer::{IndexHandle, IndexStatus};
pub use parser::{CFrontend, Frontend, TuParser};
