//! Symbol extraction from a translation unit's cursor tree.
//!
//! Walks every cursor of a parsed unit and sorts it into:
//! - Declarations, with their definition when the unit has one
//! - Uses (references, calls, macro expansions) and what they refer to
//! - Include edges

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

use super::ast::{ChildVisit, Cursor, CursorKind, Frontend, TranslationUnit};
use super::compile_args::CompileArgs;
use crate::db::types::{SymbolRecord, TuSnapshot};

/// Parses one file at a time into a [`TuSnapshot`]. Shared by all workers.
pub struct TuParser {
    args: Arc<CompileArgs>,
    frontend: Arc<dyn Frontend>,
}

impl TuParser {
    pub fn new(args: Arc<CompileArgs>, frontend: Arc<dyn Frontend>) -> Self {
        Self { args, frontend }
    }

    /// Parse `file` with its compilation arguments. A file the frontend
    /// cannot handle yields an empty snapshot with no timestamp.
    pub fn parse(&self, file: &Path) -> TuSnapshot {
        let args = self.args.get(file);
        match self.frontend.parse_translation_unit(file, args) {
            Some(tu) => extract(&tu),
            None => {
                debug!(file = %file.display(), "no translation unit");
                TuSnapshot::empty(file)
            }
        }
    }
}

/// Build the snapshot for a parsed translation unit.
pub fn extract(tu: &TranslationUnit) -> TuSnapshot {
    let mut snapshot = TuSnapshot::new(tu.file(), tu.mtime());

    tu.root().visit(|cursor| {
        let Some(location) = cursor.location() else {
            return ChildVisit::Continue;
        };
        if is_outside_tree(&location.file) {
            return ChildVisit::Continue;
        }

        match cursor.kind() {
            CursorKind::FunctionDecl
            | CursorKind::StructDecl
            | CursorKind::FieldDecl
            | CursorKind::TypedefDecl
            | CursorKind::EnumDecl
            | CursorKind::EnumConstantDecl => {
                if let Some(symbol) = symbol_from_cursor(cursor) {
                    match cursor.definition().and_then(symbol_from_cursor) {
                        Some(definition) => snapshot.insert_decl_with_def(symbol, definition),
                        None => snapshot.insert_decl(symbol),
                    }
                }
            }
            CursorKind::MacroDefinition => {
                if let Some(symbol) = symbol_from_cursor(cursor) {
                    snapshot.insert_decl_with_def(symbol.clone(), symbol);
                }
            }
            CursorKind::VarDecl => {
                if let Some(symbol) = symbol_from_cursor(cursor) {
                    snapshot.insert_decl(symbol);
                }
            }
            CursorKind::ParmDecl => {
                // anonymous parameters have nothing to navigate to
                if !cursor.spelling().is_empty() {
                    if let Some(symbol) = symbol_from_cursor(cursor) {
                        snapshot.insert_decl(symbol);
                    }
                }
            }
            CursorKind::CallExpr => record_use(&mut snapshot, cursor, true),
            CursorKind::DeclRefExpr
            | CursorKind::TypeRef
            | CursorKind::MemberRefExpr
            | CursorKind::MacroExpansion => record_use(&mut snapshot, cursor, false),
            CursorKind::InclusionDirective => {
                snapshot.insert_header(
                    cursor.spelling().to_string(),
                    cursor.included_file().map(Path::to_path_buf),
                );
            }
            // Unions are only traversed; their fields are still recorded.
            CursorKind::UnionDecl | CursorKind::TranslationUnit | CursorKind::CompoundStmt => {}
        }
        ChildVisit::Recurse
    });

    trace!(
        file = %snapshot.file.display(),
        declarations = snapshot.declarations.len(),
        uses = snapshot.uses.len(),
        headers = snapshot.headers.len(),
        "extracted"
    );
    snapshot
}

fn record_use(snapshot: &mut TuSnapshot, cursor: Cursor<'_>, is_call: bool) {
    if let Some(site) = symbol_from_cursor(cursor) {
        let declaration = cursor.referenced().and_then(symbol_from_cursor);
        snapshot.insert_use(site, declaration, is_call);
    }
}

/// Location-less cursors (command-line macros, builtins) have no record.
fn symbol_from_cursor(cursor: Cursor<'_>) -> Option<SymbolRecord> {
    let location = cursor.location()?;
    Some(SymbolRecord {
        name: cursor.spelling().to_string(),
        usr: cursor.usr().to_string(),
        location: location.clone(),
    })
}

fn is_outside_tree(file: &Path) -> bool {
    file.as_os_str().is_empty() || file == Path::new(".")
}

/// Translation units are `.c` files; headers are only parsed through them.
pub fn is_source_file(path: &Path) -> bool {
    has_extension(path, "c")
}

pub fn is_header_file(path: &Path) -> bool {
    has_extension(path, "h")
}

/// Hidden files and directories (`.git`, `.cnav`, editor swap files).
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with('.') && n != "." && n != "..")
}

fn has_extension(path: &Path, ext: &str) -> bool {
    !is_hidden(path) && path.extension().map_or(false, |e| e == ext)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Source,
    Header,
    Other,
}

pub fn classify(path: &Path) -> FileClass {
    if is_source_file(path) {
        FileClass::Source
    } else if is_header_file(path) {
        FileClass::Header
    } else {
        FileClass::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::SymbolLocation;
    use crate::parser::ast::{CursorData, CursorId};
    use crate::parser::frontend::CFrontend;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn at(file: &str, line: u32, column: u32) -> SymbolLocation {
        SymbolLocation::new(file, line, column)
    }

    fn add(tu: &mut TranslationUnit, parent: CursorId, data: CursorData) -> CursorId {
        tu.add(parent, data)
    }

    #[test]
    fn test_declaration_with_definition_is_one_record() {
        let mut tu = TranslationUnit::new("a.c", None);
        let root = tu.root_id();
        let proto = add(&mut tu, root, CursorData::new(CursorKind::FunctionDecl, "f").with_usr("c:@F@f").at(at("a.c", 1, 5)));
        let body = add(&mut tu, root, CursorData::new(CursorKind::FunctionDecl, "f").with_usr("c:@F@f").at(at("a.c", 3, 5)));
        tu.node_mut(proto).definition = Some(body);
        tu.node_mut(body).definition = Some(body);

        let snapshot = extract(&tu);
        assert_eq!(snapshot.declarations.len(), 1);
        let decl = &snapshot.declarations[0];
        assert_eq!(decl.locations, vec![at("a.c", 1, 5), at("a.c", 3, 5)]);
        assert_eq!(decl.definition, Some(at("a.c", 3, 5)));
    }

    #[test]
    fn test_classification() {
        let mut tu = TranslationUnit::new("a.c", None);
        let root = tu.root_id();
        let inc = CursorData::new(CursorKind::InclusionDirective, "b.h")
            .at(at("a.c", 1, 1))
            .including(Some(PathBuf::from("b.h")));
        add(&mut tu, root, inc);
        let m = add(&mut tu, root, CursorData::new(CursorKind::MacroDefinition, "M").with_usr("c:b.h@8@macro@M").at(at("b.h", 1, 9)));
        let var = add(&mut tu, root, CursorData::new(CursorKind::VarDecl, "v").with_usr("c:@v").at(at("a.c", 2, 5)));
        add(&mut tu, var, CursorData::new(CursorKind::MacroExpansion, "M").at(at("a.c", 2, 9)).referencing(Some(m)));
        let f = add(&mut tu, root, CursorData::new(CursorKind::FunctionDecl, "f").with_usr("c:@F@f").at(at("a.c", 3, 6)));
        add(&mut tu, f, CursorData::new(CursorKind::ParmDecl, "").at(at("a.c", 3, 8)));
        add(&mut tu, f, CursorData::new(CursorKind::ParmDecl, "n").with_usr("c:a.c@20@F@f@n").at(at("a.c", 3, 13)));
        let call = add(&mut tu, f, CursorData::new(CursorKind::CallExpr, "g").at(at("a.c", 4, 3)));
        add(&mut tu, call, CursorData::new(CursorKind::DeclRefExpr, "g").at(at("a.c", 4, 3)));

        let snapshot = extract(&tu);

        assert_eq!(snapshot.headers.len(), 1);
        assert_eq!(snapshot.headers[0].included, Some(PathBuf::from("b.h")));

        let macro_decl = snapshot.find_declaration("c:b.h@8@macro@M").unwrap();
        assert_eq!(macro_decl.definition, Some(at("b.h", 1, 9)));
        assert!(snapshot.find_declaration("c:@v").unwrap().definition.is_none());
        assert!(snapshot.find_declaration("c:a.c@20@F@f@n").is_some());
        // f plus v, M, n; the unnamed parameter is dropped
        assert_eq!(snapshot.declarations.len(), 4);

        let uses: Vec<(&str, bool, bool)> = snapshot
            .uses
            .iter()
            .map(|u| (u.site.name.as_str(), u.is_call, u.declaration.is_some()))
            .collect();
        assert_eq!(uses, vec![("M", false, true), ("g", true, false), ("g", false, false)]);
    }

    #[test]
    fn test_union_is_traversed_but_not_recorded() {
        let mut tu = TranslationUnit::new("a.c", None);
        let root = tu.root_id();
        let u = add(&mut tu, root, CursorData::new(CursorKind::UnionDecl, "u").with_usr("c:@U@u").at(at("a.c", 1, 7)));
        tu.node_mut(u).definition = Some(u);
        let field = add(&mut tu, u, CursorData::new(CursorKind::FieldDecl, "i").with_usr("c:@U@u@FI@i").at(at("a.c", 1, 15)));
        tu.node_mut(field).definition = Some(field);

        let snapshot = extract(&tu);
        assert!(snapshot.find_declaration("c:@U@u").is_none());
        let i = snapshot.find_declaration("c:@U@u@FI@i").unwrap();
        assert_eq!(i.definition, Some(at("a.c", 1, 15)));
        assert_eq!(snapshot.declarations.len(), 1);
    }

    #[test]
    fn test_location_less_cursors_are_skipped_with_children() {
        let mut tu = TranslationUnit::new("a.c", None);
        let root = tu.root_id();
        let builtin = add(&mut tu, root, CursorData::new(CursorKind::MacroDefinition, "DEBUG").with_usr("c:@macro@DEBUG"));
        add(&mut tu, builtin, CursorData::new(CursorKind::VarDecl, "hidden").at(at("a.c", 1, 1)));
        add(&mut tu, root, CursorData::new(CursorKind::VarDecl, "dot").at(at(".", 1, 1)));

        let snapshot = extract(&tu);
        assert!(snapshot.is_empty());
    }

    struct Failing;

    impl Frontend for Failing {
        fn parse_translation_unit(&self, _file: &Path, _args: &[String]) -> Option<TranslationUnit> {
            None
        }
    }

    #[test]
    fn test_frontend_failure_yields_empty_snapshot() {
        let parser = TuParser::new(Arc::new(CompileArgs::default()), Arc::new(Failing));
        let snapshot = parser.parse(Path::new("gone.c"));
        assert_eq!(snapshot.file, PathBuf::from("gone.c"));
        assert!(snapshot.mtime.is_none());
        assert!(snapshot.is_empty());
    }

    /// Records the arguments each file was parsed with.
    struct Recording(Mutex<HashMap<PathBuf, Vec<String>>>);

    impl Frontend for Recording {
        fn parse_translation_unit(&self, file: &Path, args: &[String]) -> Option<TranslationUnit> {
            self.0.lock().unwrap().insert(file.to_path_buf(), args.to_vec());
            Some(TranslationUnit::new(file, None))
        }
    }

    #[test]
    fn test_parser_passes_compile_arguments() {
        let mut args = CompileArgs::default();
        args.insert("src/a.c", vec!["-DX".to_string()]);
        let frontend = Arc::new(Recording(Mutex::new(HashMap::new())));
        let parser = TuParser::new(Arc::new(args), frontend.clone());

        parser.parse(Path::new("src/a.c"));
        parser.parse(Path::new("src/b.c"));

        let seen = frontend.0.lock().unwrap();
        assert_eq!(seen[Path::new("src/a.c")], vec!["-DX".to_string()]);
        assert!(seen[Path::new("src/b.c")].is_empty());
    }

    #[test]
    fn test_real_file_end_to_end() {
        let dir = tempdir().unwrap();
        let header = dir.path().join("b.h");
        let source = dir.path().join("a.c");
        std::fs::write(&header, "#define M 1\nint helper(int n);\n").unwrap();
        std::fs::write(
            &source,
            "#include \"b.h\"\nint helper(int n) { return n + M; }\nint main(void) { return helper(2); }\n",
        )
        .unwrap();

        let parser = TuParser::new(Arc::new(CompileArgs::default()), Arc::new(CFrontend::new(Vec::new())));
        let snapshot = parser.parse(&source);

        assert!(snapshot.mtime.is_some());
        assert_eq!(snapshot.headers[0].included.as_deref(), Some(header.as_path()));

        let helper = snapshot.find_declaration("c:@F@helper").unwrap();
        assert_eq!(helper.locations.len(), 2);
        assert_eq!(helper.locations[0].file, header);
        assert_eq!(helper.definition.as_ref().unwrap().file, source);

        let call = snapshot.uses.iter().find(|u| u.is_call).unwrap();
        assert_eq!(call.site.name, "helper");
        assert_eq!(call.site.location, SymbolLocation::new(source.clone(), 3, 25));
        assert_eq!(call.declaration.as_ref().unwrap().usr, "c:@F@helper");

        let m = snapshot.uses.iter().find(|u| u.site.name == "M").unwrap();
        assert_eq!(m.declaration.as_ref().unwrap().location.file, header);
    }

    #[test]
    fn test_file_classes() {
        assert_eq!(classify(Path::new("src/a.c")), FileClass::Source);
        assert_eq!(classify(Path::new("inc/b.h")), FileClass::Header);
        assert_eq!(classify(Path::new("README.md")), FileClass::Other);
        assert_eq!(classify(Path::new("src/.a.c")), FileClass::Other);
        assert!(is_hidden(Path::new("proj/.git")));
        assert!(!is_hidden(Path::new(".")));
        assert!(!is_hidden(Path::new("proj/src")));
    }
}
