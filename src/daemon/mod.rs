//! Daemon module: background process serving symbol queries.
//!
//! The daemon runs the indexer, keeps the symbol database in memory and
//! serves queries over a Unix socket, so navigation never waits on a parse.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           cnav daemon                    │
//! │  - indexer event loop + parser workers  │
//! │  - directory watches                    │
//! │  - Unix socket server                   │
//! └─────────────────────────────────────────┘
//!           ▲
//!           │ .cnav/cnav.sock
//!           ▼
//! ┌─────────────────────────────────────────┐
//! │           cnav CLI                       │
//! │  - connects to daemon                   │
//! │  - sends JSON requests                  │
//! │  - receives JSON responses              │
//! └─────────────────────────────────────────┘
//! ```

pub mod protocol;
pub mod server;

pub use protocol::{Request, Response};
pub use server::{is_daemon_running, run_daemon, send_request};
