//! Change routing: what a filesystem change means for the index.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{ChangeKind, FsChange};
use crate::parser::{classify, is_hidden, FileClass};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Queue a source file for parsing.
    Parse(PathBuf),
    /// Drop everything recorded for a source file.
    RemoveReferences(PathBuf),
    /// A header changed; reparse the files including it.
    ReparseIncluders(PathBuf),
    /// Walk a new directory, watching it and parsing its sources.
    ExploreDir(PathBuf),
    /// Stop watching a directory that went away.
    Unwatch(PathBuf),
    Ignore,
}

/// Decide what to do about `change`.
///
/// A path that no longer exists cannot be stat-ed, so `known_file` breaks
/// the tie: a path the database has a record for was a file, anything else
/// was a directory.
pub fn route(change: &FsChange, known_file: impl Fn(&Path) -> bool) -> Action {
    let path = &change.path;
    if is_hidden(path) {
        return Action::Ignore;
    }

    let (is_dir, exists) = match std::fs::metadata(path) {
        Ok(meta) => (meta.is_dir(), true),
        Err(e) if e.kind() == ErrorKind::NotFound => (!known_file(path), false),
        Err(_) => return Action::Ignore,
    };

    // A rename that left something at the path moved it in, not out.
    let kind = match change.kind {
        ChangeKind::Rename if exists => ChangeKind::Create,
        kind => kind,
    };

    if is_dir {
        return match kind {
            ChangeKind::Create => Action::ExploreDir(path.clone()),
            ChangeKind::Remove | ChangeKind::Rename => Action::Unwatch(path.clone()),
            ChangeKind::Write => Action::Ignore,
        };
    }

    match (classify(path), kind) {
        (FileClass::Source, ChangeKind::Create | ChangeKind::Write) => Action::Parse(path.clone()),
        (FileClass::Source, ChangeKind::Remove | ChangeKind::Rename) => {
            Action::RemoveReferences(path.clone())
        }
        (FileClass::Header, _) => Action::ReparseIncluders(path.clone()),
        (FileClass::Other, _) => Action::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn never(_: &Path) -> bool {
        false
    }

    fn always(_: &Path) -> bool {
        true
    }

    #[test]
    fn test_existing_files() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.c");
        let hdr = dir.path().join("a.h");
        let txt = dir.path().join("notes.txt");
        for f in [&src, &hdr, &txt] {
            std::fs::write(f, "").unwrap();
        }

        assert_eq!(
            route(&FsChange::new(&src, ChangeKind::Create), never),
            Action::Parse(src.clone())
        );
        assert_eq!(
            route(&FsChange::new(&src, ChangeKind::Write), never),
            Action::Parse(src.clone())
        );
        assert_eq!(
            route(&FsChange::new(&hdr, ChangeKind::Write), never),
            Action::ReparseIncluders(hdr.clone())
        );
        assert_eq!(route(&FsChange::new(&txt, ChangeKind::Write), never), Action::Ignore);
    }

    #[test]
    fn test_vanished_paths_use_database_membership() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("gone.c");
        let hdr = dir.path().join("gone.h");
        let sub = dir.path().join("gone_dir");

        assert_eq!(
            route(&FsChange::new(&src, ChangeKind::Remove), always),
            Action::RemoveReferences(src.clone())
        );
        assert_eq!(
            route(&FsChange::new(&src, ChangeKind::Rename), always),
            Action::RemoveReferences(src.clone())
        );
        assert_eq!(
            route(&FsChange::new(&hdr, ChangeKind::Remove), always),
            Action::ReparseIncluders(hdr.clone())
        );
        assert_eq!(
            route(&FsChange::new(&sub, ChangeKind::Remove), never),
            Action::Unwatch(sub.clone())
        );
    }

    #[test]
    fn test_directories() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("new");
        std::fs::create_dir(&sub).unwrap();

        assert_eq!(
            route(&FsChange::new(&sub, ChangeKind::Create), never),
            Action::ExploreDir(sub.clone())
        );
        assert_eq!(route(&FsChange::new(&sub, ChangeKind::Write), never), Action::Ignore);
    }

    #[test]
    fn test_rename_onto_existing_path_is_a_create() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("moved.c");
        let sub = dir.path().join("moved_dir");
        std::fs::write(&src, "int x;\n").unwrap();
        std::fs::create_dir(&sub).unwrap();

        assert_eq!(
            route(&FsChange::new(&src, ChangeKind::Rename), always),
            Action::Parse(src.clone())
        );
        assert_eq!(
            route(&FsChange::new(&sub, ChangeKind::Rename), never),
            Action::ExploreDir(sub.clone())
        );
    }

    #[test]
    fn test_hidden_paths_are_ignored() {
        let dir = tempdir().unwrap();
        let swap = dir.path().join(".a.c");
        std::fs::write(&swap, "").unwrap();
        assert_eq!(route(&FsChange::new(&swap, ChangeKind::Write), never), Action::Ignore);
        assert_eq!(
            route(&FsChange::new(dir.path().join(".git"), ChangeKind::Create), never),
            Action::Ignore
        );
    }
}
