//! Compilation database loading.
//!
//! Each root may carry a `compile_commands.json`. Only the preprocessor
//! arguments (`-D`, `-I`) are kept; every path is rewritten into the
//! convention of the root it belongs to so lookups by the daemon's own path
//! keys hit.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{IndexError, Result};
use crate::paths::PathConvention;

pub const COMPILE_DB_FILE: &str = "compile_commands.json";

#[derive(Debug, Deserialize)]
struct CompileCommand {
    #[serde(alias = "Directory", default)]
    directory: String,
    #[serde(alias = "Command", default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(alias = "File")]
    file: String,
}

/// Per-file preprocessor arguments for every root.
#[derive(Debug, Clone, Default)]
pub struct CompileArgs {
    convention: Option<PathConvention>,
    by_file: HashMap<PathBuf, Vec<String>>,
}

impl CompileArgs {
    /// Read the compilation database of every root in `convention`.
    ///
    /// A missing database is skipped. A database that cannot be opened for
    /// lack of permission, or that is not valid JSON, is an error.
    pub fn load(convention: &PathConvention) -> Result<Self> {
        let mut args = Self {
            convention: Some(convention.clone()),
            by_file: HashMap::new(),
        };
        for root in convention.roots() {
            args.load_root(convention, root)?;
        }
        Ok(args)
    }

    fn load_root(&mut self, convention: &PathConvention, root: &Path) -> Result<()> {
        let db_path = convention.absolutize(root).join(COMPILE_DB_FILE);
        let text = match std::fs::read_to_string(&db_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(IndexError::PermissionDenied(db_path));
            }
            Err(e) => {
                debug!(path = %db_path.display(), error = %e, "no compilation database");
                return Ok(());
            }
        };

        let commands: Vec<CompileCommand> =
            serde_json::from_str(&text).map_err(|source| IndexError::CompileDb {
                path: db_path.clone(),
                source,
            })?;

        for command in &commands {
            let directory = entry_directory(root, &command.directory);
            let file = Path::new(&command.file);
            let file = if file.is_absolute() {
                file.to_path_buf()
            } else {
                directory.join(file)
            };
            let file = convention.for_root(root, &file)?;

            let tokens = match (&command.arguments, &command.command) {
                (Some(arguments), _) => arguments.clone(),
                (None, Some(command)) => split_command(command),
                (None, None) => Vec::new(),
            };
            let args = extract_args(&tokens, &directory, root, convention)?;
            // last entry for a file wins
            self.by_file.insert(file, args);
        }

        info!(
            path = %db_path.display(),
            entries = commands.len(),
            "compilation database loaded"
        );
        Ok(())
    }

    /// Arguments for `file`; empty when the database has no entry for it.
    pub fn get(&self, file: &Path) -> &[String] {
        if let Some(args) = self.by_file.get(file) {
            return args;
        }
        self.convention
            .as_ref()
            .and_then(|c| self.by_file.get(&c.normalize(file)))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn insert(&mut self, file: impl Into<PathBuf>, args: Vec<String>) {
        self.by_file.insert(file.into(), args);
    }

    pub fn len(&self) -> usize {
        self.by_file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }
}

/// Directory an entry's relative paths are anchored at.
fn entry_directory(root: &Path, directory: &str) -> PathBuf {
    let directory = Path::new(directory);
    if directory.as_os_str().is_empty() {
        root.to_path_buf()
    } else if directory.is_absolute() {
        directory.to_path_buf()
    } else {
        root.join(directory)
    }
}

fn split_command(command: &str) -> Vec<String> {
    shlex::split(command).unwrap_or_else(|| command.split_whitespace().map(String::from).collect())
}

/// Keep `-D` and `-I` arguments. `-I` directories relative to the entry's
/// directory are anchored there and rewritten into `root`'s convention;
/// each comes out as the two tokens `-I`, `dir`.
pub fn extract_args(
    tokens: &[String],
    directory: &Path,
    root: &Path,
    convention: &PathConvention,
) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut iter = tokens.iter();

    while let Some(token) = iter.next() {
        if token == "-D" {
            if let Some(define) = iter.next() {
                args.push(token.clone());
                args.push(define.clone());
            }
        } else if token.starts_with("-D") {
            args.push(token.clone());
        } else if token == "-I" {
            if let Some(dir) = iter.next() {
                args.push("-I".to_string());
                args.push(include_dir(dir, directory, root, convention)?);
            }
        } else if let Some(dir) = token.strip_prefix("-I") {
            args.push("-I".to_string());
            args.push(include_dir(dir, directory, root, convention)?);
        }
    }
    Ok(args)
}

fn include_dir(dir: &str, directory: &Path, root: &Path, convention: &PathConvention) -> Result<String> {
    let dir = Path::new(dir);
    let anchored = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        directory.join(dir)
    };
    Ok(convention
        .for_root(root, &anchored)?
        .to_string_lossy()
        .into_owned())
}
