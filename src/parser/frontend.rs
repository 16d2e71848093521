//! tree-sitter backed C frontend.
//!
//! Builds a clang-style cursor tree for one translation unit: the main file
//! plus every project header it reaches through `#include`, flattened under
//! the translation-unit cursor the way a preprocessed unit reads. Headers
//! under a system include directory are recorded as include edges but not
//! parsed.
//!
//! Preprocessing is approximate. `-D` defines and `#define`/`#undef` feed a
//! macro table that steers `#ifdef`/`#ifndef`; `#if` with a literal
//! condition is honored and any other `#if` keeps every branch. Macros are
//! never expanded.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace, warn};
use tree_sitter::{Node, Parser};

use super::ast::{CursorData, CursorId, CursorKind, Frontend, TranslationUnit};
use crate::db::types::SymbolLocation;
use crate::paths::clean;

const MAX_INCLUDE_DEPTH: usize = 64;

pub struct CFrontend {
    system_include_dirs: Vec<PathBuf>,
}

impl CFrontend {
    pub fn new(system_include_dirs: Vec<PathBuf>) -> Self {
        Self { system_include_dirs }
    }
}

impl Frontend for CFrontend {
    fn parse_translation_unit(&self, file: &Path, args: &[String]) -> Option<TranslationUnit> {
        let mtime = std::fs::metadata(file).and_then(|m| m.modified()).ok()?;
        let text = read_source(file)?;

        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&tree_sitter_c::LANGUAGE.into()) {
            warn!(error = %e, "cannot load C grammar");
            return None;
        }
        let tree = parser.parse(&text, None)?;

        let mut unit = UnitBuilder::new(file, mtime, parser, args, &self.system_include_dirs);
        unit.included.insert(file.to_path_buf());
        let src = SourceFile::new(file, text.as_bytes(), 0);
        let root = unit.tu.root_id();
        unit.walk_children(tree.root_node(), &src, root);

        let tu = unit.finish();
        trace!(file = %file.display(), cursors = tu.len(), "translation unit built");
        Some(tu)
    }
}

fn read_source(path: &Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// One file's text while it is being walked.
struct SourceFile<'s> {
    path: &'s Path,
    text: &'s [u8],
    /// File name used in internal-linkage USRs.
    base: String,
    depth: usize,
}

impl<'s> SourceFile<'s> {
    fn new(path: &'s Path, text: &'s [u8], depth: usize) -> Self {
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            text,
            base,
            depth,
        }
    }

    fn text(&self, node: &Node) -> &'s str {
        node.utf8_text(self.text).unwrap_or("")
    }

    fn location(&self, node: &Node) -> SymbolLocation {
        let pos = node.start_position();
        SymbolLocation::new(self.path, pos.row as u32 + 1, pos.column as u32 + 1)
    }
}

struct UnitBuilder<'a> {
    tu: TranslationUnit,
    parser: Parser,
    include_dirs: Vec<PathBuf>,
    system_dirs: &'a [PathBuf],
    macros: HashMap<String, CursorId>,
    included: HashSet<PathBuf>,
    /// Ordinary identifiers; index 0 is file scope.
    scopes: Vec<HashMap<String, CursorId>>,
    /// `struct s`, `union u`, `enum e`
    tags: HashMap<String, CursorId>,
    /// First field seen for each member name.
    fields: HashMap<String, CursorId>,
    /// Tag and function cursors that carry a body.
    bodies: HashSet<CursorId>,
    /// Enclosing function while walking a body.
    function: Option<String>,
}

impl<'a> UnitBuilder<'a> {
    fn new(
        file: &Path,
        mtime: SystemTime,
        parser: Parser,
        args: &[String],
        system_dirs: &'a [PathBuf],
    ) -> Self {
        let mut builder = Self {
            tu: TranslationUnit::new(file, Some(mtime)),
            parser,
            include_dirs: Vec::new(),
            system_dirs,
            macros: HashMap::new(),
            included: HashSet::new(),
            scopes: vec![HashMap::new()],
            tags: HashMap::new(),
            fields: HashMap::new(),
            bodies: HashSet::new(),
            function: None,
        };

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let define = match arg.as_str() {
                "-D" => iter.next().map(String::as_str),
                "-I" => {
                    builder.include_dirs.extend(iter.next().map(PathBuf::from));
                    None
                }
                other => {
                    if let Some(dir) = other.strip_prefix("-I") {
                        builder.include_dirs.push(PathBuf::from(dir));
                    }
                    other.strip_prefix("-D")
                }
            };
            if let Some(define) = define {
                let name = define.split('=').next().unwrap_or(define);
                builder.predefine(name);
            }
        }
        builder
    }

    /// Command-line macro: no source location, so it never reaches the index.
    fn predefine(&mut self, name: &str) {
        if name.is_empty() {
            return;
        }
        let root = self.tu.root_id();
        let data = CursorData::new(CursorKind::MacroDefinition, name).with_usr(format!("c:@macro@{}", name));
        let id = self.tu.add(root, data);
        self.tu.node_mut(id).definition = Some(id);
        self.macros.insert(name.to_string(), id);
    }

    fn finish(mut self) -> TranslationUnit {
        let mut definitions: HashMap<String, CursorId> = HashMap::new();
        for id in self.tu.ids() {
            if self.bodies.contains(&id) {
                definitions.entry(self.tu.node(id).usr.clone()).or_insert(id);
            }
        }

        let links: Vec<(CursorId, CursorId)> = self
            .tu
            .ids()
            .filter_map(|id| {
                let node = self.tu.node(id);
                let linkable = matches!(
                    node.kind,
                    CursorKind::FunctionDecl | CursorKind::StructDecl | CursorKind::UnionDecl | CursorKind::EnumDecl
                );
                if !linkable || node.usr.is_empty() {
                    return None;
                }
                definitions.get(&node.usr).map(|&def| (id, def))
            })
            .collect();
        for (id, def) in links {
            self.tu.node_mut(id).definition = Some(def);
        }
        self.tu
    }

    fn add(&mut self, parent: CursorId, data: CursorData) -> CursorId {
        self.tu.add(parent, data)
    }

    /// Add a cursor that is its own definition.
    fn add_defined(&mut self, parent: CursorId, data: CursorData) -> CursorId {
        let id = self.tu.add(parent, data);
        self.tu.node_mut(id).definition = Some(id);
        id
    }

    fn declare(&mut self, name: &str, id: CursorId) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), id);
        }
    }

    fn lookup(&self, name: &str) -> Option<CursorId> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    /// USR already given to a file-scope entity of `kind` named `name`.
    fn global_usr(&self, name: &str, kind: CursorKind) -> Option<String> {
        self.scopes[0]
            .get(name)
            .map(|&id| self.tu.node(id))
            .filter(|n| n.kind == kind)
            .map(|n| n.usr.clone())
    }

    fn walk_children(&mut self, node: Node<'_>, src: &SourceFile<'_>, parent: CursorId) {
        for child in named_children(&node) {
            self.walk(child, src, parent);
        }
    }

    fn walk(&mut self, node: Node<'_>, src: &SourceFile<'_>, parent: CursorId) {
        match node.kind() {
            "preproc_include" => self.include(node, src),
            "preproc_def" | "preproc_function_def" => self.define_macro(node, src),
            "preproc_call" => self.preproc_call(node, src),
            "preproc_ifdef" | "preproc_elifdef" => self.conditional_ifdef(node, src, parent),
            "preproc_if" | "preproc_elif" => self.conditional_if(node, src, parent),
            "function_definition" => self.function_definition(node, src, parent),
            "declaration" => self.declaration(node, src, parent),
            "type_definition" => self.type_definition(node, src, parent),
            "struct_specifier" | "union_specifier" | "enum_specifier" => self.tag_specifier(node, src, parent),
            "compound_statement" => {
                self.scopes.push(HashMap::new());
                let block = self.add(parent, CursorData::new(CursorKind::CompoundStmt, "").at(src.location(&node)));
                self.walk_children(node, src, block);
                self.scopes.pop();
            }
            "for_statement" => {
                self.scopes.push(HashMap::new());
                self.walk_children(node, src, parent);
                self.scopes.pop();
            }
            "call_expression" => self.call(node, src, parent),
            "field_expression" => self.member_ref(node, src, parent),
            "identifier" => self.identifier_ref(node, src, parent, CursorKind::DeclRefExpr),
            "type_identifier" => self.identifier_ref(node, src, parent, CursorKind::TypeRef),
            "field_identifier" | "statement_identifier" | "primitive_type" | "sized_type_specifier"
            | "string_literal" | "system_lib_string" | "char_literal" | "number_literal" | "comment"
            | "preproc_arg" | "storage_class_specifier" | "type_qualifier" => {}
            _ => self.walk_children(node, src, parent),
        }
    }

    fn include(&mut self, node: Node<'_>, src: &SourceFile<'_>) {
        let Some(path_node) = node.child_by_field_name("path") else {
            return;
        };
        let raw = src.text(&path_node);
        let (name, quoted) = match path_node.kind() {
            "string_literal" => (raw.trim_matches('"'), true),
            "system_lib_string" => (raw.trim_start_matches('<').trim_end_matches('>'), false),
            // computed include
            _ => return,
        };
        if name.is_empty() {
            return;
        }

        let resolved = self.resolve_include(name, quoted, src.path);
        let root = self.tu.root_id();
        let directive = CursorData::new(CursorKind::InclusionDirective, name)
            .at(src.location(&node))
            .including(resolved.clone());
        self.add(root, directive);

        if let Some(header) = resolved {
            self.enter_header(header, src.depth + 1);
        }
    }

    fn resolve_include(&self, name: &str, quoted: bool, current: &Path) -> Option<PathBuf> {
        let local = quoted.then(|| current.parent().unwrap_or(Path::new("")).join(name));
        local
            .into_iter()
            .chain(self.include_dirs.iter().map(|d| d.join(name)))
            .chain(self.system_dirs.iter().map(|d| d.join(name)))
            .find(|candidate| candidate.is_file())
            .map(|found| clean(&found))
    }

    fn enter_header(&mut self, header: PathBuf, depth: usize) {
        if depth > MAX_INCLUDE_DEPTH {
            debug!(header = %header.display(), "include depth limit reached");
            return;
        }
        if self.system_dirs.iter().any(|d| header.starts_with(d)) {
            return;
        }
        if !self.included.insert(header.clone()) {
            return;
        }
        let Some(text) = read_source(&header) else {
            debug!(header = %header.display(), "header unreadable");
            return;
        };
        let Some(tree) = self.parser.parse(&text, None) else {
            return;
        };

        let src = SourceFile::new(&header, text.as_bytes(), depth);
        let root = self.tu.root_id();
        self.walk_children(tree.root_node(), &src, root);
    }

    fn define_macro(&mut self, node: Node<'_>, src: &SourceFile<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = src.text(&name_node);
        let usr = format!("c:{}@{}@macro@{}", src.base, name_node.start_byte(), name);
        let root = self.tu.root_id();
        let id = self.add_defined(
            root,
            CursorData::new(CursorKind::MacroDefinition, name)
                .with_usr(usr)
                .at(src.location(&name_node)),
        );
        self.macros.insert(name.to_string(), id);
    }

    fn preproc_call(&mut self, node: Node<'_>, src: &SourceFile<'_>) {
        let directive = node
            .child_by_field_name("directive")
            .map(|d| src.text(&d).trim())
            .unwrap_or("");
        if directive != "#undef" {
            return;
        }
        let argument = node.child_by_field_name("argument").map(|a| src.text(&a)).unwrap_or("");
        if let Some(name) = argument.split_whitespace().next() {
            self.macros.remove(name);
        }
    }

    fn conditional_ifdef(&mut self, node: Node<'_>, src: &SourceFile<'_>, parent: CursorId) {
        let negated = node
            .child(0)
            .map_or(false, |token| matches!(token.kind(), "#ifndef" | "#elifndef"));
        let Some(name) = node.child_by_field_name("name") else {
            self.walk_branches(node, src, parent, None, None);
            return;
        };
        let defined = self.macros.contains_key(src.text(&name));
        self.walk_branches(node, src, parent, Some(name.id()), Some(defined != negated));
    }

    fn conditional_if(&mut self, node: Node<'_>, src: &SourceFile<'_>, parent: CursorId) {
        let condition = node.child_by_field_name("condition");
        let taken = condition.and_then(|c| literal_condition(c, src));
        self.walk_branches(node, src, parent, condition.map(|c| c.id()), taken);
    }

    /// Walk the body when `taken`, the alternative when not, both when the
    /// condition could not be decided.
    fn walk_branches(
        &mut self,
        node: Node<'_>,
        src: &SourceFile<'_>,
        parent: CursorId,
        condition: Option<usize>,
        taken: Option<bool>,
    ) {
        let alternative = node.child_by_field_name("alternative");
        let alternative_id = alternative.map(|a| a.id());

        if taken != Some(false) {
            for child in named_children(&node) {
                if Some(child.id()) != condition && Some(child.id()) != alternative_id {
                    self.walk(child, src, parent);
                }
            }
        }
        if taken != Some(true) {
            if let Some(alternative) = alternative {
                self.walk(alternative, src, parent);
            }
        }
    }

    fn function_definition(&mut self, node: Node<'_>, src: &SourceFile<'_>, parent: CursorId) {
        if let Some(ty) = node.child_by_field_name("type") {
            self.walk(ty, src, parent);
        }
        let Some(declarator) = node.child_by_field_name("declarator") else {
            return;
        };
        let Some(name_node) = declarator_name(declarator) else {
            return;
        };
        let name = src.text(&name_node);
        let usr = self.function_usr(name, storage_class(node, src) == Some("static"), src);
        let function = self.add(
            parent,
            CursorData::new(CursorKind::FunctionDecl, name)
                .with_usr(usr)
                .at(src.location(&name_node)),
        );
        self.bodies.insert(function);
        self.declare(name, function);

        let enclosing = self.function.replace(name.to_string());
        self.scopes.push(HashMap::new());
        if let Some(params) = function_parameters(declarator) {
            self.parameters(params, src, function, true);
        }
        if let Some(body) = node.child_by_field_name("body") {
            // parameters and the outermost block share a scope
            let block = self.add(function, CursorData::new(CursorKind::CompoundStmt, "").at(src.location(&body)));
            self.walk_children(body, src, block);
        }
        self.scopes.pop();
        self.function = enclosing;
    }

    fn function_usr(&self, name: &str, is_static: bool, src: &SourceFile<'_>) -> String {
        if let Some(usr) = self.global_usr(name, CursorKind::FunctionDecl) {
            return usr;
        }
        if is_static {
            format!("c:{}@F@{}", src.base, name)
        } else {
            format!("c:@F@{}", name)
        }
    }

    fn parameters(&mut self, params: Node<'_>, src: &SourceFile<'_>, function: CursorId, in_scope: bool) {
        let function_name = self.tu.node(function).spelling.clone();
        let decls: Vec<Node> = named_children(&params)
            .into_iter()
            .filter(|p| p.kind() == "parameter_declaration")
            .collect();

        for param in &decls {
            let ty = param.child_by_field_name("type");
            if let Some(ty) = ty {
                self.walk(ty, src, function);
            }
            let declarator = param.child_by_field_name("declarator");
            match declarator.and_then(declarator_name) {
                Some(name_node) => {
                    let name = src.text(&name_node);
                    let usr = format!("c:{}@{}@F@{}@{}", src.base, name_node.start_byte(), function_name, name);
                    let id = self.add(
                        function,
                        CursorData::new(CursorKind::ParmDecl, name)
                            .with_usr(usr)
                            .at(src.location(&name_node)),
                    );
                    if in_scope {
                        self.declare(name, id);
                    }
                }
                None => {
                    // `f(void)` declares no parameters
                    let is_void = decls.len() == 1 && ty.map_or(false, |t| src.text(&t) == "void");
                    if declarator.is_none() && is_void {
                        continue;
                    }
                    self.add(function, CursorData::new(CursorKind::ParmDecl, "").at(src.location(param)));
                }
            }
        }
    }

    fn declaration(&mut self, node: Node<'_>, src: &SourceFile<'_>, parent: CursorId) {
        let storage = storage_class(node, src);
        if let Some(ty) = node.child_by_field_name("type") {
            self.walk(ty, src, parent);
        }
        for declarator in field_children(&node, "declarator") {
            self.declarator(declarator, src, parent, storage);
        }
    }

    fn declarator(&mut self, declarator: Node<'_>, src: &SourceFile<'_>, parent: CursorId, storage: Option<&str>) {
        let Some(name_node) = declarator_name(declarator) else {
            self.declarator_exprs(declarator, src, parent);
            return;
        };
        let name = src.text(&name_node);
        let location = src.location(&name_node);

        if let Some(params) = function_parameters(declarator) {
            let usr = self.function_usr(name, storage == Some("static"), src);
            let id = self.add(
                parent,
                CursorData::new(CursorKind::FunctionDecl, name).with_usr(usr).at(location),
            );
            self.declare(name, id);
            self.parameters(params, src, id, false);
            return;
        }

        let usr = match (&self.function, storage) {
            (Some(function), s) if s != Some("extern") => {
                format!("c:{}@{}@F@{}@{}", src.base, name_node.start_byte(), function, name)
            }
            _ => match self.global_usr(name, CursorKind::VarDecl) {
                Some(usr) => usr,
                None if storage == Some("static") => format!("c:{}@{}", src.base, name),
                None => format!("c:@{}", name),
            },
        };
        let id = self.add(parent, CursorData::new(CursorKind::VarDecl, name).with_usr(usr).at(location));
        self.declare(name, id);
        self.declarator_exprs(declarator, src, id);
    }

    /// Expressions hanging off a declarator: initializers and array sizes.
    fn declarator_exprs(&mut self, declarator: Node<'_>, src: &SourceFile<'_>, parent: CursorId) {
        let mut current = Some(declarator);
        while let Some(node) = current {
            let expr = match node.kind() {
                "init_declarator" => node.child_by_field_name("value"),
                "array_declarator" => node.child_by_field_name("size"),
                _ => None,
            };
            if let Some(expr) = expr {
                self.walk(expr, src, parent);
            }
            current = inner_declarator(node);
        }
    }

    fn type_definition(&mut self, node: Node<'_>, src: &SourceFile<'_>, parent: CursorId) {
        if let Some(ty) = node.child_by_field_name("type") {
            self.walk(ty, src, parent);
        }
        for declarator in field_children(&node, "declarator") {
            let Some(name_node) = declarator_name(declarator) else {
                continue;
            };
            let name = src.text(&name_node);
            let id = self.add_defined(
                parent,
                CursorData::new(CursorKind::TypedefDecl, name)
                    .with_usr(format!("c:{}@T@{}", src.base, name))
                    .at(src.location(&name_node)),
            );
            self.declare(name, id);
        }
    }

    fn tag_specifier(&mut self, node: Node<'_>, src: &SourceFile<'_>, parent: CursorId) {
        let (kind, keyword, prefix) = match node.kind() {
            "struct_specifier" => (CursorKind::StructDecl, "struct", "S"),
            "union_specifier" => (CursorKind::UnionDecl, "union", "U"),
            _ => (CursorKind::EnumDecl, "enum", "E"),
        };
        let name_node = node.child_by_field_name("name");
        let name = name_node.map(|n| src.text(&n)).unwrap_or("");
        let key = format!("{} {}", keyword, name);

        let Some(body) = node.child_by_field_name("body") else {
            // `struct s` used as a type, or a forward declaration
            let Some(name_node) = name_node else {
                return;
            };
            let location = src.location(&name_node);
            match self.tags.get(&key).copied() {
                Some(target) => {
                    self.add(parent, CursorData::new(CursorKind::TypeRef, key).at(location).referencing(Some(target)));
                }
                None => {
                    let usr = format!("c:@{}@{}", prefix, name);
                    let id = self.add(parent, CursorData::new(kind, name).with_usr(usr).at(location));
                    self.tags.insert(key, id);
                }
            }
            return;
        };

        let usr = if name.is_empty() {
            format!("c:@{}A@{}@{}", prefix, src.base, node.start_byte())
        } else {
            format!("c:@{}@{}", prefix, name)
        };
        let location = src.location(&name_node.unwrap_or(node));
        let id = self.add(parent, CursorData::new(kind, name).with_usr(usr.clone()).at(location));
        self.bodies.insert(id);
        if !name.is_empty() {
            self.tags.insert(key, id);
        }

        if kind == CursorKind::EnumDecl {
            self.enumerators(body, src, id, name);
        } else {
            self.fields(body, src, id, &usr);
        }
    }

    fn enumerators(&mut self, body: Node<'_>, src: &SourceFile<'_>, parent: CursorId, enum_name: &str) {
        for enumerator in named_children(&body) {
            if enumerator.kind() != "enumerator" {
                continue;
            }
            let Some(name_node) = enumerator.child_by_field_name("name") else {
                continue;
            };
            let name = src.text(&name_node);
            let usr = if enum_name.is_empty() {
                format!("c:@Ea@{}", name)
            } else {
                format!("c:@E@{}@{}", enum_name, name)
            };
            let id = self.add_defined(
                parent,
                CursorData::new(CursorKind::EnumConstantDecl, name)
                    .with_usr(usr)
                    .at(src.location(&name_node)),
            );
            self.declare(name, id);
            if let Some(value) = enumerator.child_by_field_name("value") {
                self.walk(value, src, id);
            }
        }
    }

    fn fields(&mut self, body: Node<'_>, src: &SourceFile<'_>, parent: CursorId, tag_usr: &str) {
        for member in named_children(&body) {
            if member.kind() != "field_declaration" {
                self.walk(member, src, parent);
                continue;
            }
            if let Some(ty) = member.child_by_field_name("type") {
                self.walk(ty, src, parent);
            }
            for declarator in field_children(&member, "declarator") {
                let Some(name_node) = declarator_name(declarator) else {
                    continue;
                };
                let name = src.text(&name_node);
                let id = self.add_defined(
                    parent,
                    CursorData::new(CursorKind::FieldDecl, name)
                        .with_usr(format!("{}@FI@{}", tag_usr, name))
                        .at(src.location(&name_node)),
                );
                self.fields.entry(name.to_string()).or_insert(id);
                self.declarator_exprs(declarator, src, id);
            }
        }
    }

    fn call(&mut self, node: Node<'_>, src: &SourceFile<'_>, parent: CursorId) {
        let callee = node.child_by_field_name("function");
        let arguments = node.child_by_field_name("arguments");

        let call = match callee {
            Some(f) if f.kind() == "identifier" => {
                let name = src.text(&f);
                let location = src.location(&f);
                if let Some(&definition) = self.macros.get(name) {
                    self.add(
                        parent,
                        CursorData::new(CursorKind::MacroExpansion, name)
                            .at(location)
                            .referencing(Some(definition)),
                    );
                    parent
                } else {
                    let target = self.lookup(name);
                    let call = self.add(
                        parent,
                        CursorData::new(CursorKind::CallExpr, name)
                            .at(location.clone())
                            .referencing(target),
                    );
                    self.add(
                        call,
                        CursorData::new(CursorKind::DeclRefExpr, name).at(location).referencing(target),
                    );
                    call
                }
            }
            Some(f) if f.kind() == "field_expression" => {
                let field = f.child_by_field_name("field");
                let name = field.map(|n| src.text(&n)).unwrap_or("");
                let location = src.location(&field.unwrap_or(f));
                let target = self.fields.get(name).copied();
                let call = self.add(
                    parent,
                    CursorData::new(CursorKind::CallExpr, name).at(location).referencing(target),
                );
                self.walk(f, src, call);
                call
            }
            other => {
                let call = self.add(parent, CursorData::new(CursorKind::CallExpr, "").at(src.location(&node)));
                if let Some(f) = other {
                    self.walk(f, src, call);
                }
                call
            }
        };

        if let Some(arguments) = arguments {
            self.walk(arguments, src, call);
        }
    }

    fn member_ref(&mut self, node: Node<'_>, src: &SourceFile<'_>, parent: CursorId) {
        if let Some(argument) = node.child_by_field_name("argument") {
            self.walk(argument, src, parent);
        }
        if let Some(field) = node.child_by_field_name("field") {
            let name = src.text(&field);
            let target = self.fields.get(name).copied();
            self.add(
                parent,
                CursorData::new(CursorKind::MemberRefExpr, name)
                    .at(src.location(&field))
                    .referencing(target),
            );
        }
    }

    /// An identifier in expression or type position.
    fn identifier_ref(&mut self, node: Node<'_>, src: &SourceFile<'_>, parent: CursorId, kind: CursorKind) {
        let name = src.text(&node);
        let location = src.location(&node);
        let data = match self.macros.get(name) {
            Some(&definition) => {
                CursorData::new(CursorKind::MacroExpansion, name).referencing(Some(definition))
            }
            None => CursorData::new(kind, name).referencing(self.lookup(name)),
        };
        self.add(parent, data.at(location));
    }
}

fn named_children<'t>(node: &Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn field_children<'t>(node: &Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

fn storage_class<'s>(node: Node<'_>, src: &SourceFile<'s>) -> Option<&'s str> {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .find(|c| c.kind() == "storage_class_specifier");
    found.map(|c| src.text(&c))
}

fn inner_declarator<'t>(node: Node<'t>) -> Option<Node<'t>> {
    match node.kind() {
        "parenthesized_declarator" | "attributed_declarator" => named_children(&node).into_iter().next(),
        _ => node.child_by_field_name("declarator"),
    }
}

/// The identifier a declarator declares.
fn declarator_name(node: Node<'_>) -> Option<Node<'_>> {
    let mut node = node;
    loop {
        match node.kind() {
            "identifier" | "field_identifier" | "type_identifier" => return Some(node),
            _ => node = inner_declarator(node)?,
        }
    }
}

/// Parameter list when the declarator declares a function (as opposed to a
/// pointer to one).
fn function_parameters(node: Node<'_>) -> Option<Node<'_>> {
    let mut node = node;
    loop {
        match node.kind() {
            "identifier" | "field_identifier" | "type_identifier" => return None,
            "function_declarator" => {
                let inner = node.child_by_field_name("declarator")?;
                if inner.kind() == "identifier" {
                    return node.child_by_field_name("parameters");
                }
                node = inner;
            }
            _ => node = inner_declarator(node)?,
        }
    }
}

/// `#if 0`, `#if 1`, `#if (0)`; anything else is undecided.
fn literal_condition(node: Node<'_>, src: &SourceFile<'_>) -> Option<bool> {
    let mut node = node;
    while node.kind() == "parenthesized_expression" {
        node = named_children(&node).into_iter().next()?;
    }
    if node.kind() != "number_literal" {
        return None;
    }
    let digits = src.text(&node).trim_end_matches(['u', 'U', 'l', 'L']);
    digits.parse::<i64>().ok().map(|value| value != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Cursor;
    use tempfile::{tempdir, TempDir};

    fn write(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn parse(file: &Path, args: &[String]) -> TranslationUnit {
        CFrontend::new(Vec::new()).parse_translation_unit(file, args).unwrap()
    }

    fn find<'t>(tu: &'t TranslationUnit, kind: CursorKind, spelling: &str) -> Vec<Cursor<'t>> {
        tu.ids()
            .map(|id| tu.cursor(id))
            .filter(|c| c.kind() == kind && c.spelling() == spelling)
            .collect()
    }

    #[test]
    fn test_prototype_and_body_share_definition() {
        let dir = tempdir().unwrap();
        let file = write(&dir, "a.c", "int f(int x);\n\nint f(int x) {\n  return x;\n}\n");
        let tu = parse(&file, &[]);

        let decls = find(&tu, CursorKind::FunctionDecl, "f");
        assert_eq!(decls.len(), 2);
        assert!(decls.iter().all(|d| d.usr() == "c:@F@f"));
        let body = decls[1];
        for decl in &decls {
            assert_eq!(decl.definition().map(|d| d.id()), Some(body.id()));
        }
        assert_eq!(decls[0].location().unwrap().line, 1);
        assert_eq!(body.location().unwrap().line, 3);
        assert_eq!(body.location().unwrap().column, 5);

        let x_ref = find(&tu, CursorKind::DeclRefExpr, "x");
        assert_eq!(x_ref.len(), 1);
        assert_eq!(x_ref[0].referenced().unwrap().kind(), CursorKind::ParmDecl);
    }

    #[test]
    fn test_macro_use_resolves_into_header() {
        let dir = tempdir().unwrap();
        let header = write(&dir, "b.h", "#define M 42\n");
        let file = write(&dir, "a.c", "#include \"b.h\"\nint v = M;\n");
        let tu = parse(&file, &[]);

        let includes = find(&tu, CursorKind::InclusionDirective, "b.h");
        assert_eq!(includes.len(), 1);
        assert_eq!(includes[0].included_file(), Some(header.as_path()));

        let expansions = find(&tu, CursorKind::MacroExpansion, "M");
        assert_eq!(expansions.len(), 1);
        let definition = expansions[0].referenced().unwrap();
        assert_eq!(definition.kind(), CursorKind::MacroDefinition);
        assert_eq!(definition.location().unwrap().file, header);
        assert_eq!(expansions[0].location().unwrap().file, file);
    }

    #[test]
    fn test_missing_header_leaves_use_unresolved() {
        let dir = tempdir().unwrap();
        let file = write(&dir, "a.c", "#include \"b.h\"\nint v = M;\n");
        let tu = parse(&file, &[]);

        assert_eq!(find(&tu, CursorKind::InclusionDirective, "b.h")[0].included_file(), None);
        let refs = find(&tu, CursorKind::DeclRefExpr, "M");
        assert_eq!(refs.len(), 1);
        assert!(refs[0].referenced().is_none());
    }

    #[test]
    fn test_command_line_defines_select_branches() {
        let dir = tempdir().unwrap();
        let file = write(
            &dir,
            "a.c",
            "#ifdef FEATURE\nint on;\n#else\nint off;\n#endif\n#if 0\nint never;\n#endif\n",
        );

        let tu = parse(&file, &["-DFEATURE".to_string()]);
        assert_eq!(find(&tu, CursorKind::VarDecl, "on").len(), 1);
        assert!(find(&tu, CursorKind::VarDecl, "off").is_empty());
        assert!(find(&tu, CursorKind::VarDecl, "never").is_empty());
        let feature = find(&tu, CursorKind::MacroDefinition, "FEATURE");
        assert!(feature[0].location().is_none());

        let tu = parse(&file, &[]);
        assert!(find(&tu, CursorKind::VarDecl, "on").is_empty());
        assert_eq!(find(&tu, CursorKind::VarDecl, "off").len(), 1);
    }

    #[test]
    fn test_include_dirs_from_arguments() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("inc")).unwrap();
        let header = write(&dir, "inc/util.h", "int util(void);\n");
        let file = write(&dir, "a.c", "#include <util.h>\nint main(void) { return util(); }\n");
        let args = vec!["-I".to_string(), dir.path().join("inc").to_string_lossy().into_owned()];
        let tu = parse(&file, &args);

        assert_eq!(
            find(&tu, CursorKind::InclusionDirective, "util.h")[0].included_file(),
            Some(header.as_path())
        );
        let call = find(&tu, CursorKind::CallExpr, "util");
        assert_eq!(call.len(), 1);
        let callee = call[0].referenced().unwrap();
        assert_eq!(callee.location().unwrap().file, header);
        assert!(callee.definition().is_none());
        assert_eq!(call[0].children().next().unwrap().kind(), CursorKind::DeclRefExpr);
    }

    #[test]
    fn test_struct_members_and_type_refs() {
        let dir = tempdir().unwrap();
        let file = write(
            &dir,
            "a.c",
            "struct point { int x; int y; };\ntypedef struct point point_t;\n\
             static int get(point_t *p) { return p->x; }\n",
        );
        let tu = parse(&file, &[]);

        let field = find(&tu, CursorKind::FieldDecl, "x")[0];
        assert_eq!(field.usr(), "c:@S@point@FI@x");
        assert_eq!(field.definition().map(|d| d.id()), Some(field.id()));

        let member = find(&tu, CursorKind::MemberRefExpr, "x");
        assert_eq!(member[0].referenced().map(|c| c.id()), Some(field.id()));

        let struct_ref = find(&tu, CursorKind::TypeRef, "struct point");
        assert_eq!(struct_ref[0].referenced().unwrap().kind(), CursorKind::StructDecl);
        let typedef_ref = find(&tu, CursorKind::TypeRef, "point_t");
        assert_eq!(typedef_ref[0].referenced().unwrap().kind(), CursorKind::TypedefDecl);

        let get = find(&tu, CursorKind::FunctionDecl, "get")[0];
        assert_eq!(get.usr(), "c:a.c@F@get");
        let param = find(&tu, CursorKind::ParmDecl, "p")[0];
        assert!(param.usr().contains("@F@get@p"));
    }

    #[test]
    fn test_enum_constants_and_unnamed_params() {
        let dir = tempdir().unwrap();
        let file = write(&dir, "a.c", "enum color { RED, GREEN = RED + 1 };\nint paint(int, enum color c);\n");
        let tu = parse(&file, &[]);

        let red = find(&tu, CursorKind::EnumConstantDecl, "RED")[0];
        assert_eq!(red.usr(), "c:@E@color@RED");
        let red_ref = find(&tu, CursorKind::DeclRefExpr, "RED");
        assert_eq!(red_ref[0].referenced().map(|c| c.id()), Some(red.id()));

        let params: Vec<_> = tu.ids().map(|id| tu.cursor(id)).filter(|c| c.kind() == CursorKind::ParmDecl).collect();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].spelling(), "");
        assert_eq!(params[1].spelling(), "c");
    }

    #[test]
    fn test_unreadable_file_yields_nothing() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("gone.c");
        assert!(CFrontend::new(Vec::new()).parse_translation_unit(&missing, &[]).is_none());
    }
}
