//! Core data types: symbol locations, records and per-file snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A point in source text. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolLocation {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl SymbolLocation {
    pub fn new(file: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SymbolLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// A named entity (or a reference to one) at a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub name: String,
    /// Unified symbol identifier. Empty for expression sites.
    pub usr: String,
    pub location: SymbolLocation,
}

/// Everything one translation unit says about a declared entity.
///
/// Multiple declarations of the same USR collapse into one record; the
/// definition, when the unit has one, is attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub usr: String,
    /// Declaration sites in visiting order. Never empty.
    pub locations: Vec<SymbolLocation>,
    pub definition: Option<SymbolLocation>,
}

/// A use site and the declaration it refers to, if it resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolUse {
    pub site: SymbolRecord,
    pub declaration: Option<SymbolRecord>,
    pub is_call: bool,
}

/// An `#include` edge. `included` is `None` when the header was not found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEdge {
    pub directive: String,
    pub included: Option<PathBuf>,
}

/// The complete extraction result of parsing one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuSnapshot {
    pub file: PathBuf,
    /// Modification time of `file` when it was parsed. `None` when the
    /// parse failed.
    pub mtime: Option<SystemTime>,
    pub declarations: Vec<Declaration>,
    pub uses: Vec<SymbolUse>,
    pub headers: Vec<HeaderEdge>,
}

impl TuSnapshot {
    pub fn new(file: impl Into<PathBuf>, mtime: Option<SystemTime>) -> Self {
        Self {
            file: file.into(),
            mtime,
            declarations: Vec::new(),
            uses: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Snapshot for a file the frontend could not parse.
    pub fn empty(file: impl Into<PathBuf>) -> Self {
        Self::new(file, None)
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty() && self.uses.is_empty() && self.headers.is_empty()
    }

    /// Record a declaration without a known definition.
    pub fn insert_decl(&mut self, symbol: SymbolRecord) {
        self.declaration_entry(symbol);
    }

    /// Record a declaration whose definition is known.
    pub fn insert_decl_with_def(&mut self, symbol: SymbolRecord, definition: SymbolRecord) {
        let entry = self.declaration_entry(symbol);
        entry.definition = Some(definition.location);
    }

    pub fn insert_use(&mut self, site: SymbolRecord, declaration: Option<SymbolRecord>, is_call: bool) {
        self.uses.push(SymbolUse {
            site,
            declaration,
            is_call,
        });
    }

    pub fn insert_header(&mut self, directive: String, included: Option<PathBuf>) {
        self.headers.push(HeaderEdge { directive, included });
    }

    pub fn find_declaration(&self, usr: &str) -> Option<&Declaration> {
        self.declarations.iter().find(|d| d.usr == usr)
    }

    /// Every file this snapshot mentions, including itself.
    pub fn referenced_files(&self) -> impl Iterator<Item = &Path> {
        let decls = self.declarations.iter().flat_map(|d| {
            d.locations
                .iter()
                .chain(d.definition.iter())
                .map(|l| l.file.as_path())
        });
        let uses = self.uses.iter().flat_map(|u| {
            std::iter::once(u.site.location.file.as_path())
                .chain(u.declaration.iter().map(|d| d.location.file.as_path()))
        });
        let headers = self.headers.iter().filter_map(|h| h.included.as_deref());
        std::iter::once(self.file.as_path())
            .chain(decls)
            .chain(uses)
            .chain(headers)
    }

    fn declaration_entry(&mut self, symbol: SymbolRecord) -> &mut Declaration {
        let existing = if symbol.usr.is_empty() {
            None
        } else {
            self.declarations.iter().position(|d| d.usr == symbol.usr)
        };

        let index = match existing {
            Some(i) => {
                let decl = &mut self.declarations[i];
                if !decl.locations.contains(&symbol.location) {
                    decl.locations.push(symbol.location);
                }
                i
            }
            None => {
                self.declarations.push(Declaration {
                    name: symbol.name,
                    usr: symbol.usr,
                    locations: vec![symbol.location],
                    definition: None,
                });
                self.declarations.len() - 1
            }
        };
        &mut self.declarations[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, usr: &str, line: u32) -> SymbolRecord {
        SymbolRecord {
            name: name.to_string(),
            usr: usr.to_string(),
            location: SymbolLocation::new("a.c", line, 5),
        }
    }

    #[test]
    fn test_forward_declaration_and_body_merge_into_one_record() {
        let mut tu = TuSnapshot::new("a.c", None);
        let proto = record("f", "c:@F@f", 1);
        let body = record("f", "c:@F@f", 3);

        tu.insert_decl_with_def(proto.clone(), body.clone());
        tu.insert_decl_with_def(body.clone(), body.clone());

        assert_eq!(tu.declarations.len(), 1);
        let decl = &tu.declarations[0];
        assert_eq!(decl.locations, vec![proto.location, body.location.clone()]);
        assert_eq!(decl.definition, Some(body.location));
    }

    #[test]
    fn test_plain_declaration_keeps_existing_definition() {
        let mut tu = TuSnapshot::new("a.c", None);
        tu.insert_decl_with_def(record("s", "c:@S@s", 2), record("s", "c:@S@s", 2));
        tu.insert_decl(record("s", "c:@S@s", 9));

        let decl = tu.find_declaration("c:@S@s").unwrap();
        assert_eq!(decl.locations.len(), 2);
        assert!(decl.definition.is_some());
    }

    #[test]
    fn test_referenced_files() {
        let mut tu = TuSnapshot::new("a.c", None);
        let site = record("M", "", 4);
        let decl = SymbolRecord {
            name: "M".into(),
            usr: "c:b.h@8@macro@M".into(),
            location: SymbolLocation::new("b.h", 1, 9),
        };
        tu.insert_use(site, Some(decl), false);
        tu.insert_header("b.h".into(), Some(PathBuf::from("b.h")));
        tu.insert_header("missing.h".into(), None);

        let files: Vec<&Path> = tu.referenced_files().collect();
        assert!(files.contains(&Path::new("a.c")));
        assert!(files.contains(&Path::new("b.h")));
        assert!(!files.contains(&Path::new("missing.h")));
    }
}
