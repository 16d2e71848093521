//! Parsing: compile arguments, the cursor tree model, the tree-sitter
//! frontend and symbol extraction.

pub mod ast;
pub mod compile_args;
pub mod extractor;
pub mod frontend;

pub use ast::{ChildVisit, Cursor, CursorKind, Frontend, TranslationUnit};
pub use compile_args::CompileArgs;
pub use extractor::{classify, is_hidden, FileClass, TuParser};
pub use frontend::CFrontend;
