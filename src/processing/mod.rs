//! Statement processing: the manager, the four processors and the
//! interfaces to the external parser and library provider.

mod lookahead;
mod macro_def;
mod manager;
mod ordinary;

pub use manager::ProcessingManager;

use crate::context::HlasmContext;
use crate::location::Position;
use crate::statement::{Operand, OperandFormat, Statement};

/// The parser the core consumes. One instance serves one statement
/// stream; lookahead rewinds it by statement index. The context is
/// passed in so field names intern into the analysis' identifier store.
pub trait StatementParser {
    /// Next statement or `None` at end of input.
    fn next_statement(&mut self, ctx: &mut HlasmContext) -> Option<Statement>;

    /// Parses an operand field according to the format the resolved
    /// opcode dictates. Also used to re-parse after substitution.
    fn reparse_operands(
        &mut self,
        ctx: &mut HlasmContext,
        text: &str,
        format: OperandFormat,
        at: Position,
    ) -> Vec<Operand>;

    /// Index of the next statement to be delivered.
    fn position(&self) -> usize;

    fn rewind(&mut self, statement_index: usize);

    fn is_last_line(&self) -> bool;

    fn file_name(&self) -> &str;

    /// Comment lines directly above the given statement, used as macro
    /// documentation for hovers.
    fn leading_comments(&self, _statement_index: usize) -> &[String] {
        &[]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LibraryKind {
    Copy,
    Macro,
}

/// Resolves COPY members and external macro definitions. A successful
/// fetch drives a nested analysis of the member text against the same
/// context and returns true.
pub trait ParseLibProvider {
    fn parse_library(&self, name: &str, ctx: &mut HlasmContext, kind: LibraryKind) -> bool;

    fn has_library(&self, name: &str) -> bool;
}

/// Provider with no libraries at all.
pub struct EmptyLibProvider;

impl ParseLibProvider for EmptyLibProvider {
    fn parse_library(&self, _name: &str, _ctx: &mut HlasmContext, _kind: LibraryKind) -> bool {
        false
    }

    fn has_library(&self, _name: &str) -> bool {
        false
    }
}
