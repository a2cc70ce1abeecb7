//! Statement parsing and the analysis driver for the
//! [hlasm](../hlasm/index.html) engine.
//!
//! The main entry point is [`Analyzer`]: it takes HLASM source text,
//! feeds it statement by statement into the engine's processing manager
//! and leaves behind a [`hlasm::HlasmContext`] holding the resolved
//! symbol tables, the diagnostics and the occurrence store for editor
//! queries.
//!
//! Parsing follows HLASM's column conventions before anything reaches a
//! grammar: a label starts in column 1, a non-blank in column 72
//! continues the statement on the next line at column 16, and `*` in
//! column 1 is a comment line. Operand fields are kept as raw text until
//! the processing engine has resolved the operation code, because the
//! operand syntax depends on it; at that point the field is split at
//! top-level commas and each operand is parsed with [pest] against the
//! format the engine requests:
//!
//! Format        | Used for                  | Shape
//! --------------|---------------------------|---------------------------------
//! conditional   | SETx, AIF, AGO, ACTR      | expressions and `(cond).TARGET`
//! declarations  | LCLx, GBLx                | `&NAME` with optional dimension
//! assembler     | EQU, ORG, COPY, OPSYN, …  | expressions
//! data          | DC, DS                    | `dup type L(len) S(scale) 'nom'`
//! machine       | LR, L, MVC, …             | expressions and `D(X,B)`
//! macro call    | user macros, prototypes   | leaves, sublists, `KEY=value`
//!
//! Conditional-assembly expressions support the full operator set
//! (arithmetic, comparison keywords, AND/OR/XOR/NOT, concatenation,
//! substring and duplication) with self-defining terms (`B'…'`, `X'…'`,
//! `C'…'`) and attribute references (`L'`, `T'`, `S'`, `I'`, `K'`, `N'`,
//! `O'`, `D'`).
//!
//! Library members (COPY members and external macro definitions) come
//! from a [`hlasm::ParseLibProvider`]; [`VecLibProvider`] serves them
//! from memory and [`DirLibProvider`] from a directory, both driving the
//! nested analysis against the caller's context.
//!
//! [pest]: https://docs.rs/pest/

mod analyzer;
mod int_util;
mod parser;
mod scan;
mod source;
mod text_parser;

#[cfg(test)]
mod test;

pub use analyzer::{Analyzer, DirLibProvider, VecLibProvider};
pub use text_parser::TextParser;

/// Analyzes a standalone source text with no library members.
pub fn analyze_text(text: &str) -> Analyzer<'static> {
    let mut analyzer = Analyzer::new(text, "");
    analyzer.analyze();
    analyzer
}
