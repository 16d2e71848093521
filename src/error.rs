//! Error types for the indexing daemon.
//!
//! Only startup-level failures are represented here. Per-file parse problems
//! never become errors: the parser hands back an empty snapshot instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read working directory: {0}")]
    WorkingDir(#[source] std::io::Error),

    #[error("cannot express {} relative to {}", target.display(), base.display())]
    RelativePath { base: PathBuf, target: PathBuf },

    #[error("permission denied opening {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("malformed compilation database {}: {source}", path.display())]
    CompileDb {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("serialize error: {0}")]
    Serialize(String),

    #[error("cannot load index: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}

pub type Result<T> = std::result::Result<T, IndexError>;
