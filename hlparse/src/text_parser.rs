//! [`StatementParser`] over a source text: logical lines become an
//! indexed statement stream that lookahead can rewind.

use hlasm::context::HlasmContext;
use hlasm::processing::StatementParser;
use hlasm::statement::{InstrField, LabelField, Operand, OperandFormat, Statement};
use hlasm::location::{Position, Range};

use crate::parser;
use crate::scan::{self, build_chain, has_variable, split_operands};
use crate::source::{split_fields, split_logical_lines, LogicalLine, RawFields};

pub struct TextParser {
    file: String,
    lines: Vec<(LogicalLine, RawFields)>,
    index: usize,
}

impl TextParser {
    pub fn new(text: &str, file: &str) -> TextParser {
        let lines = split_logical_lines(text)
            .into_iter()
            .map(|line| {
                let fields = if line.is_comment {
                    RawFields::default()
                } else {
                    split_fields(&line.text)
                };
                (line, fields)
            })
            .collect();
        TextParser {
            file: file.to_string(),
            lines,
            index: 0,
        }
    }

    /// Comment lines directly above a statement, for macro hovers.
    pub fn leading_comments(&self, index: usize) -> &[String] {
        self.lines
            .get(index)
            .map(|(line, _)| line.leading_comments.as_slice())
            .unwrap_or(&[])
    }

    fn build_statement(&self, index: usize, ctx: &mut HlasmContext) -> Statement {
        let (line, fields) = &self.lines[index];
        let label = classify_label(&fields.label, ctx);
        let instruction = classify_instr(&fields.instruction, ctx);
        Statement {
            index,
            label,
            label_range: Range::line(
                line.line,
                fields.label_col,
                fields.label_col + fields.label.chars().count().max(1) as u32,
            ),
            instruction,
            instr_range: Range::line(
                line.line,
                fields.instr_col,
                fields.instr_col + fields.instruction.chars().count().max(1) as u32,
            ),
            operands: fields.operands.clone(),
            ops_range: Range::line(
                line.line,
                fields.ops_col,
                fields.ops_col + fields.operands.chars().count().max(1) as u32,
            ),
            range: Range::line(line.line, 0, fields.len.max(1)),
        }
    }
}

fn classify_label(text: &str, ctx: &mut HlasmContext) -> LabelField {
    if text.is_empty() {
        return LabelField::Empty;
    }
    if let Some(rest) = text.strip_prefix('.') {
        if is_name(rest) {
            return LabelField::Sequence(ctx.add_id(rest));
        }
    }
    if text.starts_with('&') && !text.starts_with("&&") {
        let chars: Vec<char> = text.chars().collect();
        let (var, consumed) = scan::scan_var_ref(&chars, 0, ctx);
        if consumed == chars.len() {
            return LabelField::Var(var);
        }
        return LabelField::Concat(build_chain(text, ctx));
    }
    if has_variable(text) {
        return LabelField::Concat(build_chain(text, ctx));
    }
    if is_name(text) {
        return LabelField::Ordinary(ctx.add_id(text));
    }
    LabelField::Concat(build_chain(text, ctx))
}

fn classify_instr(text: &str, ctx: &mut HlasmContext) -> InstrField {
    if text.is_empty() {
        return InstrField::Empty;
    }
    if has_variable(text) {
        return InstrField::Concat(build_chain(text, ctx));
    }
    InstrField::Ordinary(ctx.add_id(text))
}

fn is_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || matches!(c, '@' | '#' | '$' | '_') => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '#' | '$' | '_'))
}

impl StatementParser for TextParser {
    fn next_statement(&mut self, ctx: &mut HlasmContext) -> Option<Statement> {
        if self.index >= self.lines.len() {
            return None;
        }
        let stmt = self.build_statement(self.index, ctx);
        self.index += 1;
        Some(stmt)
    }

    fn reparse_operands(
        &mut self,
        ctx: &mut HlasmContext,
        text: &str,
        format: OperandFormat,
        at: Position,
    ) -> Vec<Operand> {
        if format == OperandFormat::Ignored || text.trim().is_empty() {
            return Vec::new();
        }
        split_operands(text)
            .into_iter()
            .map(|(piece, offset)| {
                let trimmed = piece.trim();
                let start = at.col + offset;
                let range = Range::line(at.line, start, start + piece.chars().count().max(1) as u32);
                if trimmed.is_empty() && format != OperandFormat::MacroArgs {
                    return Operand::Empty(range);
                }
                match format {
                    OperandFormat::Ca => parser::parse_ca_operand(trimmed, ctx, range),
                    OperandFormat::VarDecl => parser::parse_var_decl(trimmed, ctx, range),
                    OperandFormat::Asm => parser::parse_asm_operand(trimmed, ctx, range),
                    OperandFormat::Mach => parser::parse_mach_operand(trimmed, ctx, range),
                    OperandFormat::DataDef => parser::parse_data_def(trimmed, ctx, range),
                    OperandFormat::MacroArgs => parser::parse_macro_arg(trimmed, ctx, range),
                    OperandFormat::Ignored => unreachable!(),
                }
            })
            .collect()
    }

    fn position(&self) -> usize {
        self.index
    }

    fn rewind(&mut self, statement_index: usize) {
        self.index = statement_index;
    }

    fn is_last_line(&self) -> bool {
        self.index >= self.lines.len()
    }

    fn file_name(&self) -> &str {
        &self.file
    }

    fn leading_comments(&self, statement_index: usize) -> &[String] {
        TextParser::leading_comments(self, statement_index)
    }
}
