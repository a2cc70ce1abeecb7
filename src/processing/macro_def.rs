//! The macro-definition processor: captures statements between MACRO and
//! the matching MEND into a cached body.

use log::debug;

use crate::diagnostics::Diagnostic;
use crate::expression::{ConcatChain, ConcatPart, VarName};
use crate::ids::IdIndex;
use crate::lsp::SymKind;
use crate::macros::MacroDefinition;
use crate::statement::{InstrField, LabelField, Operand, OperandFormat, Statement};
use crate::variables::MacroParamData;

use super::manager::{MacroDefState, ProcState, ProcessingManager};

impl<'a> ProcessingManager<'a> {
    pub(super) fn process_macro_def(&mut self, stmt: Statement) {
        let expecting = match &self.state {
            ProcState::MacroDef(state) => state.expecting_prototype,
            _ => unreachable!("macro-definition processing without its state"),
        };
        if expecting {
            if stmt.is_empty() {
                return;
            }
            self.process_prototype(stmt);
            return;
        }

        // Inner MACRO/MEND pairs are captured textually and materialize
        // when the outer macro is invoked.
        let macro_id = self.ctx.add_id("MACRO");
        let mend_id = self.ctx.add_id("MEND");
        let instr = match &stmt.instruction {
            InstrField::Ordinary(id) => Some(*id),
            _ => None,
        };

        let state = match &mut self.state {
            ProcState::MacroDef(state) => state,
            _ => unreachable!(),
        };
        if instr == Some(macro_id) {
            state.nest += 1;
            store_statement(state, stmt);
            return;
        }
        if instr == Some(mend_id) {
            if state.nest > 0 {
                state.nest -= 1;
                store_statement(state, stmt);
                return;
            }
            // The closing MEND stays in the body so its sequence label is
            // a valid branch target; it expands as a no-op.
            store_statement(state, stmt);
            self.finish_macro_def();
            return;
        }
        store_statement(state, stmt);
    }

    fn process_prototype(&mut self, stmt: Statement) {
        let file = self.current_stream_file();

        let name = match &stmt.instruction {
            InstrField::Ordinary(id) => *id,
            InstrField::Concat(chain) => {
                let text = chain_to_text(chain, self.ctx);
                self.ctx.add_id(&text)
            }
            InstrField::Empty => IdIndex::EMPTY,
        };

        let mut label_param = None;
        match &stmt.label {
            LabelField::Var(var) if var.subscripts.is_empty() => {
                if let VarName::Plain(id) = var.name {
                    label_param = Some(id);
                }
            }
            LabelField::Empty => {}
            _ => {
                let stack = self.ctx.processing_frames();
                self.ctx
                    .diags
                    .add(Diagnostic::unexpected_field(&file, stmt.label_range), &stack);
            }
        }

        let ops = self.parser.reparse_operands(self.ctx, 
            &stmt.operands,
            OperandFormat::MacroArgs,
            stmt.ops_range.start,
        );

        let state = match &mut self.state {
            ProcState::MacroDef(state) => state,
            _ => unreachable!(),
        };
        state.expecting_prototype = false;
        state.name = name;
        if let Some(param) = label_param {
            state.label_param = Some(param);
            state.param_names.insert(param);
        }

        let mut dup_params = Vec::new();
        for op in ops {
            match op {
                Operand::Empty(_) => state.positional.push(None),
                Operand::MacroArg {
                    keyword: Some(keyword),
                    data,
                    range,
                } => {
                    if !state.param_names.insert(keyword) {
                        dup_params.push((keyword, range));
                    } else {
                        state.keywords.insert(keyword, data);
                    }
                }
                Operand::Model(chain, range) => {
                    match prototype_param(&chain) {
                        Some((VarName::Plain(id), default)) => {
                            if !state.param_names.insert(id) {
                                dup_params.push((id, range));
                                state.positional.push(None);
                                continue;
                            }
                            match default {
                                Some(text) => {
                                    state
                                        .keywords
                                        .insert(id, MacroParamData::Single(text));
                                }
                                None => state.positional.push(Some(id)),
                            }
                        }
                        _ => {
                            dup_params.push((IdIndex::EMPTY, range));
                            state.positional.push(None);
                        }
                    }
                }
                other => {
                    dup_params.push((IdIndex::EMPTY, other.range()));
                    state.positional.push(None);
                }
            }
        }

        for (id, range) in dup_params {
            let text = if id.is_empty() {
                "parameter".to_string()
            } else {
                self.ctx.resolve_id(id).to_string()
            };
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add(
                Diagnostic::already_defined("symbolic parameter", &text, &file, range),
                &stack,
            );
        }
    }

    fn finish_macro_def(&mut self) {
        let state = match std::mem::replace(&mut self.state, ProcState::Ordinary) {
            ProcState::MacroDef(state) => state,
            _ => unreachable!(),
        };
        self.ctx.pop_processing();
        debug!("registering macro {}", self.ctx.resolve_id(state.name));
        let location = state.location.clone();
        let name = state.name;
        self.ctx.add_macro(MacroDefinition {
            name,
            label_param: state.label_param,
            positional: state.positional,
            keywords: state.keywords,
            body: state.body,
            labels: state.labels,
            location: location.clone(),
            documentation: state.documentation,
        });
        self.ctx.occurrences.add(
            SymKind::Macro,
            name,
            &location.file,
            crate::location::Range::line(location.pos.line, 0, 1),
            true,
        );
    }
}

fn store_statement(state: &mut MacroDefState, mut stmt: Statement) {
    if state.nest == 0 {
        if let LabelField::Sequence(name) = stmt.label {
            let body_len = state.body.len();
            state.labels.entry(name).or_insert_with(|| body_len);
        }
    }
    stmt.index = state.body.len();
    state.body.push(stmt);
}

/// Splits a prototype operand chain into the parameter name and, for
/// keyword parameters, the literal default text.
fn prototype_param(chain: &ConcatChain) -> Option<(VarName, Option<String>)> {
    let mut parts = chain.iter();
    let name = match parts.next() {
        Some(ConcatPart::Var(var)) if var.subscripts.is_empty() => var.name.clone(),
        _ => return None,
    };
    match parts.next() {
        None => Some((name, None)),
        Some(ConcatPart::Equals) => {
            let mut default = String::new();
            for part in parts {
                match part {
                    ConcatPart::Str(text) => default.push_str(text),
                    ConcatPart::Equals => default.push('='),
                    ConcatPart::Dot => default.push('.'),
                    ConcatPart::Var(_) => return None,
                }
            }
            Some((name, Some(default)))
        }
        Some(_) => None,
    }
}

fn chain_to_text(chain: &ConcatChain, ctx: &crate::context::HlasmContext) -> String {
    let mut result = String::new();
    for part in chain {
        match part {
            ConcatPart::Str(text) => result.push_str(text),
            ConcatPart::Equals => result.push('='),
            ConcatPart::Dot => result.push('.'),
            ConcatPart::Var(var) => {
                if let VarName::Plain(id) = var.name {
                    result.push('&');
                    result.push_str(ctx.resolve_id(id));
                }
            }
        }
    }
    result
}
