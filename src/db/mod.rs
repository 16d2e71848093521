//! Symbol database: committed snapshots plus the lookup indexes the
//! indexer and the query surface need.
//!
//! The database is owned by the indexer's event loop; nothing else mutates
//! it. Snapshots are keyed by the file that was parsed. Replacing a file's
//! snapshot replaces everything that parse contributed, including the
//! symbols it saw in headers.

pub mod persistence;
pub mod types;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::error::Result;
pub use types::{Declaration, HeaderEdge, SymbolLocation, SymbolRecord, SymbolUse, TuSnapshot};

/// Resolved view of one symbol across every committed unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    /// `None` for a use site whose declaration did not resolve.
    pub usr: Option<String>,
    pub declarations: Vec<SymbolLocation>,
    pub definition: Option<SymbolLocation>,
    pub uses: Vec<UseSite>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UseSite {
    pub location: SymbolLocation,
    pub is_call: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DbStats {
    pub units: usize,
    pub known_files: usize,
    pub declarations: usize,
    pub uses: usize,
}

pub struct SymbolDb {
    /// Index image location; `None` keeps everything in memory.
    path: Option<PathBuf>,
    units: BTreeMap<PathBuf, TuSnapshot>,
    /// header -> units with a resolved include edge to it
    includers: HashMap<PathBuf, BTreeSet<PathBuf>>,
    /// include directive text -> units where it did not resolve
    unresolved: HashMap<String, BTreeSet<PathBuf>>,
    /// file -> units that mention it anywhere
    file_refs: HashMap<PathBuf, BTreeSet<PathBuf>>,
    /// usr -> units that declare or use it
    usr_units: HashMap<String, BTreeSet<PathBuf>>,
    /// Time of the oldest change not yet written out.
    dirty_since: Option<SystemTime>,
}

impl SymbolDb {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            units: BTreeMap::new(),
            includers: HashMap::new(),
            unresolved: HashMap::new(),
            file_refs: HashMap::new(),
            usr_units: HashMap::new(),
            dirty_since: None,
        }
    }

    /// Open the index image at `path`. A missing image starts empty; an
    /// unreadable one is discarded since everything in it can be re-derived
    /// from the sources.
    pub fn open(path: &Path) -> Self {
        let mut db = Self::in_memory();
        db.path = Some(path.to_path_buf());

        if !path.exists() {
            return db;
        }
        match Self::load_units(path) {
            Ok(units) => {
                for unit in units {
                    db.index_unit(&unit);
                    db.units.insert(unit.file.clone(), unit);
                }
                debug!(units = db.units.len(), "index image loaded");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable index image");
            }
        }
        db
    }

    /// Commit a snapshot, replacing whatever the previous parse of the same
    /// file contributed.
    pub fn insert_snapshot(&mut self, snapshot: TuSnapshot) {
        self.remove_unit(&snapshot.file);
        self.index_unit(&snapshot);
        self.units.insert(snapshot.file.clone(), snapshot);
        self.touch();
    }

    /// Drop every record contributed by parsing `path`. Returns whether the
    /// file had a snapshot.
    pub fn remove_file_references(&mut self, path: &Path) -> bool {
        let removed = self.remove_unit(path);
        if removed {
            self.touch();
        }
        removed
    }

    /// Files whose current snapshot includes `header`, directly or through an
    /// include directive that did not resolve but names a suffix of it.
    pub fn get_includers(&self, header: &Path) -> Vec<PathBuf> {
        let mut files: BTreeSet<PathBuf> = self.includers.get(header).cloned().unwrap_or_default();

        for (directive, units) in &self.unresolved {
            if !directive.is_empty() && header.ends_with(directive) {
                files.extend(units.iter().cloned());
            }
        }
        files.remove(header);
        files.into_iter().collect()
    }

    /// Whether `path` was parsed or appears anywhere in a committed snapshot.
    pub fn file_exists(&self, path: &Path) -> bool {
        self.units.contains_key(path) || self.file_refs.contains_key(path)
    }

    /// Returns `(exists, uptodate)`: whether `path` has a snapshot, and
    /// whether that snapshot is at least as new as the file on disk.
    pub fn is_uptodate(&self, path: &Path) -> std::io::Result<(bool, bool)> {
        let on_disk = std::fs::metadata(path)?.modified()?;
        Ok(match self.units.get(path) {
            None => (false, false),
            Some(unit) => (true, unit.mtime.map_or(false, |parsed| parsed >= on_disk)),
        })
    }

    /// Every file the database knows about: parsed files plus every file
    /// those parses mentioned.
    pub fn known_files(&self) -> HashSet<PathBuf> {
        self.units
            .keys()
            .chain(self.file_refs.keys())
            .cloned()
            .collect()
    }

    pub fn unit(&self, path: &Path) -> Option<&TuSnapshot> {
        self.units.get(path)
    }

    /// Write the image if it holds changes made at or before `cutoff`.
    /// Returns whether anything was written.
    pub fn flush(&mut self, cutoff: SystemTime) -> Result<bool> {
        let Some(since) = self.dirty_since else {
            return Ok(false);
        };
        if since > cutoff {
            return Ok(false);
        }
        if let Some(path) = self.path.clone() {
            self.save(&path)?;
        }
        self.dirty_since = None;
        Ok(true)
    }

    pub fn has_unflushed_changes(&self) -> bool {
        self.dirty_since.is_some()
    }

    /// Everything known about the symbol with `usr`.
    pub fn lookup(&self, usr: &str) -> Option<SymbolInfo> {
        let units = self.usr_units.get(usr)?;

        let mut name = String::new();
        let mut declarations: BTreeSet<SymbolLocation> = BTreeSet::new();
        let mut definition = None;
        let mut uses: BTreeSet<UseSite> = BTreeSet::new();

        for unit in units.iter().filter_map(|f| self.units.get(f)) {
            if let Some(decl) = unit.find_declaration(usr) {
                name = decl.name.clone();
                declarations.extend(decl.locations.iter().cloned());
                if definition.is_none() {
                    definition = decl.definition.clone();
                }
            }
            for u in &unit.uses {
                if u.declaration.as_ref().map_or(false, |d| d.usr == usr) {
                    if name.is_empty() {
                        name = u.site.name.clone();
                    }
                    uses.insert(UseSite {
                        location: u.site.location.clone(),
                        is_call: u.is_call,
                    });
                }
            }
        }

        Some(SymbolInfo {
            name,
            usr: Some(usr.to_string()),
            declarations: declarations.into_iter().collect(),
            definition,
            uses: uses.into_iter().collect(),
        })
    }

    /// The declaration or use covering `file:line:column`.
    pub fn symbol_at(&self, file: &Path, line: u32, column: u32) -> Option<SymbolInfo> {
        let covers = |loc: &SymbolLocation, name: &str| {
            loc.file == file
                && loc.line == line
                && column >= loc.column
                && column < loc.column + (name.len().max(1) as u32)
        };

        let units = self.file_refs.get(file)?;
        let units: Vec<&TuSnapshot> = units.iter().filter_map(|f| self.units.get(f)).collect();

        for unit in &units {
            for decl in &unit.declarations {
                let hit = decl.locations.iter().chain(decl.definition.iter()).any(|l| covers(l, &decl.name));
                if hit {
                    return self.lookup(&decl.usr);
                }
            }
        }

        for unit in &units {
            for u in &unit.uses {
                if !covers(&u.site.location, &u.site.name) {
                    continue;
                }
                if let Some(decl) = &u.declaration {
                    if let Some(info) = self.lookup(&decl.usr) {
                        return Some(info);
                    }
                }
                return Some(SymbolInfo {
                    name: u.site.name.clone(),
                    usr: None,
                    declarations: Vec::new(),
                    definition: None,
                    uses: vec![UseSite {
                        location: u.site.location.clone(),
                        is_call: u.is_call,
                    }],
                });
            }
        }
        None
    }

    pub fn stats(&self) -> DbStats {
        DbStats {
            units: self.units.len(),
            known_files: self.known_files().len(),
            declarations: self.units.values().map(|u| u.declarations.len()).sum(),
            uses: self.units.values().map(|u| u.uses.len()).sum(),
        }
    }

    fn touch(&mut self) {
        if self.dirty_since.is_none() {
            self.dirty_since = Some(SystemTime::now());
        }
    }

    fn index_unit(&mut self, unit: &TuSnapshot) {
        let owner = &unit.file;

        for edge in &unit.headers {
            match &edge.included {
                Some(header) => {
                    self.includers.entry(header.clone()).or_default().insert(owner.clone());
                }
                None => {
                    self.unresolved
                        .entry(edge.directive.clone())
                        .or_default()
                        .insert(owner.clone());
                }
            }
        }
        for file in unit.referenced_files() {
            self.file_refs.entry(file.to_path_buf()).or_default().insert(owner.clone());
        }
        for usr in unit_usrs(unit) {
            self.usr_units.entry(usr.to_string()).or_default().insert(owner.clone());
        }
    }

    fn remove_unit(&mut self, path: &Path) -> bool {
        let Some(unit) = self.units.remove(path) else {
            return false;
        };

        for edge in &unit.headers {
            match &edge.included {
                Some(header) => prune(&mut self.includers, header, path),
                None => prune(&mut self.unresolved, &edge.directive, path),
            }
        }
        for file in unit.referenced_files() {
            prune(&mut self.file_refs, file, path);
        }
        for usr in unit_usrs(&unit) {
            prune(&mut self.usr_units, usr, path);
        }
        true
    }
}

fn unit_usrs(unit: &TuSnapshot) -> impl Iterator<Item = &str> {
    unit.declarations
        .iter()
        .map(|d| d.usr.as_str())
        .chain(
            unit.uses
                .iter()
                .filter_map(|u| u.declaration.as_ref().map(|d| d.usr.as_str())),
        )
        .filter(|usr| !usr.is_empty())
}

fn prune<K, Q>(index: &mut HashMap<K, BTreeSet<PathBuf>>, key: &Q, owner: &Path)
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    if let Some(owners) = index.get_mut(key) {
        owners.remove(owner);
        if owners.is_empty() {
            index.remove(key);
        }
    }
}
