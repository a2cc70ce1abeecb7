//! Diagnostic records and the per-analysis sink.
//!
//! Analysis never fails with an error value; every recoverable problem is
//! appended here. Each diagnostic carries the primary file/range plus one
//! related location per active macro invocation and copy member, outermost
//! first, so an editor can show the full expansion trail.

use crate::location::{Location, Range};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RelatedLocation {
    pub location: Location,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub file: String,
    pub range: Range,
    pub related: Vec<RelatedLocation>,
}

impl Diagnostic {
    pub fn error(code: &str, message: String, file: &str, range: Range) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            code: code.to_string(),
            message,
            file: file.to_string(),
            range,
            related: Vec::new(),
        }
    }

    pub fn warning(code: &str, message: String, file: &str, range: Range) -> Diagnostic {
        Diagnostic {
            severity: Severity::Warning,
            ..Diagnostic::error(code, message, file, range)
        }
    }

    pub fn info(code: &str, message: String, file: &str, range: Range) -> Diagnostic {
        Diagnostic {
            severity: Severity::Info,
            ..Diagnostic::error(code, message, file, range)
        }
    }

    pub fn unknown_operation_code(name: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E010",
            format!("unknown operation code {}", name),
            file,
            range,
        )
    }

    pub fn invalid_operand(what: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error("E010", format!("invalid {} operand", what), file, range)
    }

    pub fn already_defined(what: &str, name: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E011",
            format!("{} {} already defined", what, name),
            file,
            range,
        )
    }

    pub fn operand_count(instr: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E020",
            format!("wrong number of operands for {}", instr),
            file,
            range,
        )
    }

    pub fn missing_operands(instr: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error("E022", format!("{} requires operands", instr), file, range)
    }

    pub fn opsyn_undefined(name: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E031",
            format!("OPSYN on undefined operation code {}", name),
            file,
            range,
        )
    }

    pub fn undefined_sequence_symbol(name: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E032",
            format!("undefined sequence symbol .{}", name),
            file,
            range,
        )
    }

    pub fn actr_exhausted(file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E033",
            "ACTR branch counter exhausted".to_string(),
            file,
            range,
        )
    }

    pub fn unknown_keyword(name: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E045",
            format!("unknown keyword parameter {}", name),
            file,
            range,
        )
    }

    pub fn duplicate_keyword(name: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E046",
            format!("keyword parameter {} specified more than once", name),
            file,
            range,
        )
    }

    pub fn missing_mend(file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E047",
            "macro definition not terminated by MEND".to_string(),
            file,
            range,
        )
    }

    pub fn misplaced_in_open_code(instr: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E048",
            format!("{} is not expected in open code", instr),
            file,
            range,
        )
    }

    pub fn cyclic_definition(name: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E049",
            format!("cyclic definition of symbol {}", name),
            file,
            range,
        )
    }

    pub fn library_fetch_failed(name: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E050",
            format!("library member {} not found", name),
            file,
            range,
        )
    }

    pub fn recursive_copy(name: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E051",
            format!("COPY member {} includes itself", name),
            file,
            range,
        )
    }

    pub fn lookahead_failed(name: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E052",
            format!("symbol {} not found by lookahead", name),
            file,
            range,
        )
    }

    pub fn macro_nest_exceeded(file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E053",
            "macro call nesting limit exceeded".to_string(),
            file,
            range,
        )
    }

    pub fn invalid_macro_library(name: &str, detail: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E054",
            format!("macro library {}: {}", name, detail),
            file,
            range,
        )
    }

    pub fn invalid_relocatable_arithmetic(file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E060",
            "invalid arithmetic on relocatable values".to_string(),
            file,
            range,
        )
    }

    pub fn absolute_value_required(file: &str, range: Range) -> Diagnostic {
        Diagnostic::error(
            "E061",
            "expression must resolve to an absolute value".to_string(),
            file,
            range,
        )
    }

    pub fn value_out_of_bounds(what: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::error("E062", format!("{} out of bounds", what), file, range)
    }

    pub fn division_by_zero(file: &str, range: Range) -> Diagnostic {
        Diagnostic::error("E070", "division by zero".to_string(), file, range)
    }

    pub fn unexpected_field(file: &str, range: Range) -> Diagnostic {
        Diagnostic::warning(
            "W010",
            "field is not expected here".to_string(),
            file,
            range,
        )
    }

    pub fn set_symbol_mismatch(name: &str, file: &str, range: Range) -> Diagnostic {
        Diagnostic::warning(
            "W011",
            format!("SET symbol {} used with wrong type or shape", name),
            file,
            range,
        )
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Ordered diagnostic collection with one-shot suppression support.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diags: Vec<Diagnostic>,
    once_keys: HashSet<(String, String, Range)>,
}

impl DiagnosticSink {
    pub fn new() -> DiagnosticSink {
        DiagnosticSink::default()
    }

    pub fn add(&mut self, mut diag: Diagnostic, stack: &[RelatedLocation]) {
        diag.related = stack.to_vec();
        self.diags.push(diag);
    }

    /// Adds the diagnostic unless one with the same (code, file, range) was
    /// already added through this method. Re-entered lookahead reports the
    /// same failure for every retry of the triggering statement; only the
    /// first one is kept.
    pub fn add_once(&mut self, diag: Diagnostic, stack: &[RelatedLocation]) {
        let key = (diag.code.clone(), diag.file.clone(), diag.range);
        if self.once_keys.insert(key) {
            self.add(diag, stack);
        }
    }

    pub fn diags(&self) -> &[Diagnostic] {
        &self.diags
    }

    pub fn error_count(&self) -> usize {
        self.diags.iter().filter(|d| d.is_error()).count()
    }

    pub fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diags)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_once_suppresses_duplicates() {
        let mut sink = DiagnosticSink::new();
        let d = Diagnostic::lookahead_failed("X", "f", Range::line(1, 0, 4));
        sink.add_once(d.clone(), &[]);
        sink.add_once(d, &[]);
        sink.add_once(
            Diagnostic::lookahead_failed("X", "f", Range::line(2, 0, 4)),
            &[],
        );
        assert_eq!(sink.diags().len(), 2);
    }

    #[test]
    fn stack_is_attached() {
        let mut sink = DiagnosticSink::new();
        let stack = vec![RelatedLocation {
            location: Location::new("f", crate::location::Position::new(4, 1)),
            message: "while expanding macro M".to_string(),
        }];
        sink.add(
            Diagnostic::actr_exhausted("f", Range::line(1, 0, 2)),
            &stack,
        );
        assert_eq!(sink.diags()[0].related, stack);
    }
}
