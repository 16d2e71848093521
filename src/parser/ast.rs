//! Cursor tree produced by a C frontend.
//!
//! A [`TranslationUnit`] is an arena of cursor nodes rooted at the
//! translation-unit cursor. Cross references (`referenced`, `definition`)
//! are arena indices, so the tree can be built in one pass and linked later.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::db::types::SymbolLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorKind {
    TranslationUnit,
    FunctionDecl,
    StructDecl,
    UnionDecl,
    FieldDecl,
    TypedefDecl,
    EnumDecl,
    EnumConstantDecl,
    VarDecl,
    ParmDecl,
    MacroDefinition,
    MacroExpansion,
    InclusionDirective,
    CallExpr,
    DeclRefExpr,
    TypeRef,
    MemberRefExpr,
    CompoundStmt,
}

/// Visitor verdict for one cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildVisit {
    /// Skip this cursor's children and move on to its next sibling.
    Continue,
    /// Visit this cursor's children before its next sibling.
    Recurse,
    /// Stop the traversal.
    Break,
}

pub type CursorId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct CursorData {
    pub kind: CursorKind,
    pub spelling: String,
    pub usr: String,
    /// `None` for entities without a source position (command-line macros).
    pub location: Option<SymbolLocation>,
    pub children: Vec<CursorId>,
    pub referenced: Option<CursorId>,
    pub definition: Option<CursorId>,
    pub included_file: Option<PathBuf>,
}

impl CursorData {
    pub fn new(kind: CursorKind, spelling: impl Into<String>) -> Self {
        Self {
            kind,
            spelling: spelling.into(),
            usr: String::new(),
            location: None,
            children: Vec::new(),
            referenced: None,
            definition: None,
            included_file: None,
        }
    }

    pub fn with_usr(mut self, usr: impl Into<String>) -> Self {
        self.usr = usr.into();
        self
    }

    pub fn at(mut self, location: SymbolLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn referencing(mut self, target: Option<CursorId>) -> Self {
        self.referenced = target;
        self
    }

    pub fn including(mut self, file: Option<PathBuf>) -> Self {
        self.included_file = file;
        self
    }
}

/// A parsed file and every header it pulled in.
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    file: PathBuf,
    mtime: Option<SystemTime>,
    nodes: Vec<CursorData>,
}

impl TranslationUnit {
    const ROOT: CursorId = 0;

    pub fn new(file: impl Into<PathBuf>, mtime: Option<SystemTime>) -> Self {
        let file = file.into();
        let root = CursorData::new(CursorKind::TranslationUnit, file.to_string_lossy().into_owned());
        Self {
            file,
            mtime,
            nodes: vec![root],
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn mtime(&self) -> Option<SystemTime> {
        self.mtime
    }

    pub fn root_id(&self) -> CursorId {
        Self::ROOT
    }

    pub fn root(&self) -> Cursor<'_> {
        Cursor { tu: self, id: Self::ROOT }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Append `data` as the last child of `parent`.
    pub fn add(&mut self, parent: CursorId, data: CursorData) -> CursorId {
        let id = self.nodes.len();
        self.nodes.push(data);
        self.nodes[parent].children.push(id);
        id
    }

    pub fn node(&self, id: CursorId) -> &CursorData {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: CursorId) -> &mut CursorData {
        &mut self.nodes[id]
    }

    pub fn cursor(&self, id: CursorId) -> Cursor<'_> {
        Cursor { tu: self, id }
    }

    pub fn ids(&self) -> std::ops::Range<CursorId> {
        0..self.nodes.len()
    }
}

/// Borrowed handle to one node of a [`TranslationUnit`].
#[derive(Clone, Copy)]
pub struct Cursor<'tu> {
    tu: &'tu TranslationUnit,
    id: CursorId,
}

impl<'tu> Cursor<'tu> {
    pub fn id(&self) -> CursorId {
        self.id
    }

    fn data(&self) -> &'tu CursorData {
        &self.tu.nodes[self.id]
    }

    pub fn kind(&self) -> CursorKind {
        self.data().kind
    }

    pub fn spelling(&self) -> &'tu str {
        &self.data().spelling
    }

    pub fn usr(&self) -> &'tu str {
        &self.data().usr
    }

    pub fn location(&self) -> Option<&'tu SymbolLocation> {
        self.data().location.as_ref()
    }

    /// The entity a reference or expression refers to.
    pub fn referenced(&self) -> Option<Cursor<'tu>> {
        self.data().referenced.map(|id| self.tu.cursor(id))
    }

    /// The cursor holding this entity's definition, if the unit has one.
    pub fn definition(&self) -> Option<Cursor<'tu>> {
        self.data().definition.map(|id| self.tu.cursor(id))
    }

    pub fn included_file(&self) -> Option<&'tu Path> {
        self.data().included_file.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = Cursor<'tu>> + 'tu {
        let tu = self.tu;
        self.data().children.iter().map(move |&id| tu.cursor(id))
    }

    /// Pre-order walk over the descendants of this cursor (not the cursor
    /// itself), steered by the visitor's verdict on each node.
    pub fn visit<F>(&self, mut visitor: F)
    where
        F: FnMut(Cursor<'tu>) -> ChildVisit,
    {
        let mut stack: Vec<CursorId> = self.data().children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let cursor = self.tu.cursor(id);
            match visitor(cursor) {
                ChildVisit::Break => return,
                ChildVisit::Continue => {}
                ChildVisit::Recurse => stack.extend(cursor.data().children.iter().rev().copied()),
            }
        }
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("spelling", &self.spelling())
            .finish()
    }
}

/// The AST oracle: turns one file plus its compile arguments into a cursor
/// tree. Returns `None` when no translation unit can be produced.
pub trait Frontend: Send + Sync {
    fn parse_translation_unit(&self, file: &Path, args: &[String]) -> Option<TranslationUnit>;
}
