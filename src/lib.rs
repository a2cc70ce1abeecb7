//! Semantic analysis engine for IBM High Level Assembler (HLASM).
//!
//! HLASM source interleaves three layers: machine instructions, assembler
//! directives (sections, location counters, data definitions) and a
//! Turing-complete conditional-assembly layer whose expansion rewrites
//! the statement stream being analyzed. This crate drives one source
//! unit from parsed statements to a fully resolved ordinary-symbol table
//! plus an ordered diagnostic stream, with macro expansion, `COPY`
//! inclusion and attribute lookahead along the way.
//!
//! The crate deliberately contains no parsing and no I/O. It consumes a
//! [`processing::StatementParser`] for statements and operand fields, a
//! [`processing::ParseLibProvider`] for library members, and exposes the
//! [`context::HlasmContext`] with the symbol tables, diagnostics and
//! occurrence queries after [`processing::ProcessingManager::run`]
//! finishes. The [hlparse](../hlparse/index.html) crate supplies the
//! pest-based parser, the analyzer driver and a small CLI around this
//! engine.
//!
//! Processing is single threaded and statement at a time. The manager
//! keeps a stack of modes (ordinary code, macro-definition capture,
//! lookahead, copy-member capture) and the top mode consumes the
//! statement stream until it pops itself. Cancellation is cooperative
//! through an atomic flag polled between statements.

pub mod checking;
pub mod context;
pub mod copy;
pub mod diagnostics;
pub mod ebcdic;
pub mod eval;
pub mod expression;
pub mod ids;
pub mod instruction;
pub mod location;
pub mod lsp;
pub mod macros;
pub mod ordinary;
pub mod processing;
pub mod statement;
pub mod symbol;
pub mod variables;

pub use context::{ContextOptions, HlasmContext};
pub use diagnostics::{Diagnostic, Severity};
pub use ids::IdIndex;
pub use location::{Location, Position, Range};
pub use processing::{EmptyLibProvider, LibraryKind, ParseLibProvider, ProcessingManager};
