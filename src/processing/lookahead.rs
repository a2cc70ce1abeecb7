//! The lookahead processor: scans forward for a sequence symbol or an
//! ordinary symbol's attributes without executing anything, then rewinds.

use log::debug;

use crate::context::{OpcodeInfo, SeqSymbol, StreamSnapshot};
use crate::expression::AttrKind;
use crate::ids::IdIndex;
use crate::instruction::{AsmInstr, InstrKind};
use crate::location::Location;
use crate::ordinary::OrdEval;
use crate::statement::{InstrField, LabelField, Operand, OperandFormat, Statement};
use crate::symbol::{SymbolAttributes, SymbolOrigin};

use super::manager::{LookaheadKind, ProcState, ProcessingManager};
use super::LibraryKind;

impl<'a> ProcessingManager<'a> {
    pub(super) fn process_lookahead(&mut self, stmt: Statement, snapshot: StreamSnapshot) {
        if stmt.is_empty() {
            return;
        }

        let macro_id = self.ctx.add_id("MACRO");
        let mend_id = self.ctx.add_id("MEND");
        let copy_id = self.ctx.add_id("COPY");
        let instr = match &stmt.instruction {
            InstrField::Ordinary(id) => Some(*id),
            _ => None,
        };

        // MACRO/MEND bodies are opaque to an outer lookahead.
        let nest = match &mut self.state {
            ProcState::Lookahead(state) => {
                if instr == Some(macro_id) {
                    state.macro_nest += 1;
                    return;
                }
                if instr == Some(mend_id) {
                    if state.macro_nest > 0 {
                        state.macro_nest -= 1;
                    }
                    return;
                }
                state.macro_nest
            }
            _ => unreachable!("lookahead processing without its state"),
        };
        if nest > 0 {
            return;
        }

        if instr == Some(copy_id) {
            self.lookahead_copy(&stmt);
            return;
        }

        let file = self.current_stream_file();

        // Sequence symbols become visible to later jumps even when they
        // are not the target.
        if let LabelField::Sequence(name) = stmt.label {
            if !self.ctx.is_in_macro() {
                let symbol = SeqSymbol {
                    name,
                    location: Location::new(&file, stmt.range.start),
                    snapshot: snapshot.clone(),
                };
                self.ctx.add_opencode_seq_symbol(symbol);
            }
            let (target, kind) = match &self.state {
                ProcState::Lookahead(state) => (state.target, state.kind),
                _ => unreachable!(),
            };
            if kind == LookaheadKind::Sequence && name == target {
                debug!("lookahead found .{}", self.ctx.resolve_id(name));
                self.finish_lookahead_jump(&snapshot);
                return;
            }
        }

        // Ordinary labels feed the attribute cache.
        if let Some(name) = self.lookahead_label(&stmt, &file) {
            if let Some(attrs) = self.extract_attrs(&stmt, instr, &file) {
                self.ctx.ord.attr_cache.entry(name).or_insert(attrs);
            }
            let (target, kind) = match &self.state {
                ProcState::Lookahead(state) => (state.target, state.kind),
                _ => unreachable!(),
            };
            if kind == LookaheadKind::Ordinary && name == target {
                debug!("lookahead resolved {}", self.ctx.resolve_id(name));
                self.finish_lookahead_retry();
            }
        }
    }

    /// Jump-style finish: sequence target found at the current statement.
    fn finish_lookahead_jump(&mut self, found: &StreamSnapshot) {
        let state = match std::mem::replace(&mut self.state, ProcState::Ordinary) {
            ProcState::Lookahead(state) => state,
            _ => unreachable!(),
        };
        self.ctx.pop_processing();
        if self.ctx.branch_counter() <= 0 {
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add(
                crate::diagnostics::Diagnostic::actr_exhausted(
                    &state.trigger_file,
                    state.trigger_range,
                ),
                &stack,
            );
            if self.ctx.is_in_macro() {
                self.ctx.leave_macro();
            } else {
                self.stopped = true;
            }
            return;
        }
        self.ctx.decrement_branch_counter();
        self.restore_stream(found);
    }

    /// Retry-style finish: the ordinary symbol's attributes are cached;
    /// rewind and re-run the statement that triggered the scan.
    fn finish_lookahead_retry(&mut self) {
        let state = match std::mem::replace(&mut self.state, ProcState::Ordinary) {
            ProcState::Lookahead(state) => state,
            _ => unreachable!(),
        };
        self.ctx.pop_processing();
        let satisfied = match state.attr {
            Some(AttrKind::Length) => self
                .ctx
                .ord
                .attr_cache
                .get(&state.target)
                .map(|attrs| attrs.length.is_some())
                .unwrap_or(false),
            _ => self.ctx.ord.attr_cache.contains_key(&state.target),
        };
        if !satisfied {
            // The defining statement exists but cannot supply the queried
            // attribute (e.g. a length that needs variable substitution).
            self.ctx
                .ord
                .attr_cache
                .entry(state.target)
                .or_insert_with(|| SymbolAttributes::new(SymbolOrigin::Equate))
                .length
                .get_or_insert(1);
            let name = self.ctx.resolve_id(state.target).to_string();
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add_once(
                crate::diagnostics::Diagnostic::lookahead_failed(
                    &name,
                    &state.trigger_file,
                    state.trigger_range,
                ),
                &stack,
            );
        }
        self.restore_stream(&state.return_snapshot);
    }

    /// Label resolution during the scan; variables substitute with their
    /// current values, anything unresolvable is skipped.
    fn lookahead_label(&mut self, stmt: &Statement, file: &str) -> Option<IdIndex> {
        match &stmt.label {
            LabelField::Ordinary(id) => Some(*id),
            LabelField::Var(_) | LabelField::Concat(_) => self.label_name_for_lookahead(stmt, file),
            _ => None,
        }
    }

    fn label_name_for_lookahead(&mut self, stmt: &Statement, file: &str) -> Option<IdIndex> {
        // Substitution with the live variable context is best-effort.
        self.label_name(stmt, file)
    }

    /// Partial attribute extraction from a defining statement.
    fn extract_attrs(
        &mut self,
        stmt: &Statement,
        instr: Option<IdIndex>,
        file: &str,
    ) -> Option<SymbolAttributes> {
        let opcode = instr.and_then(|id| self.ctx.get_operation_code(id));
        match opcode {
            Some(OpcodeInfo::Instr(InstrKind::Assembler(asm))) => match asm {
                AsmInstr::EQU => Some(self.extract_equ_attrs(stmt, file)),
                AsmInstr::DC | AsmInstr::DS => Some(self.extract_data_attrs(stmt, file)),
                AsmInstr::CSECT
                | AsmInstr::DSECT
                | AsmInstr::RSECT
                | AsmInstr::COM
                | AsmInstr::LOCTR
                | AsmInstr::START => Some(
                    SymbolAttributes::new(SymbolOrigin::Section)
                        .with_type(b'J')
                        .with_length(1),
                ),
                _ => None,
            },
            Some(OpcodeInfo::Instr(kind @ InstrKind::Machine(_)))
            | Some(OpcodeInfo::Instr(kind @ InstrKind::Mnemonic(_))) => {
                let length = self.ctx.instruction_set().instr_length(kind);
                Some(
                    SymbolAttributes::new(SymbolOrigin::MachineLabel)
                        .with_type(b'I')
                        .with_length(length),
                )
            }
            _ => None,
        }
    }

    fn extract_equ_attrs(&mut self, stmt: &Statement, _file: &str) -> SymbolAttributes {
        let ops = self.parser.reparse_operands(
            self.ctx,
            &stmt.operands,
            OperandFormat::Asm,
            stmt.ops_range.start,
        );
        let mut attrs = SymbolAttributes::new(SymbolOrigin::Equate);

        // Operands containing variable symbols or syntax errors cannot be
        // trusted without execution; anything at or past the first such
        // operand stays unknown.
        let clean_until = ops
            .iter()
            .position(|op| matches!(op, Operand::Model(_, _) | Operand::Invalid(_)))
            .unwrap_or(ops.len());

        if clean_until > 1 {
            if let Some(Operand::Expr(expr, _)) = ops.get(1) {
                if let (OrdEval::Abs(value), _) = self.ctx.ord.eval(expr, None) {
                    if (0..=65535).contains(&value) {
                        attrs.length = Some(value as u16);
                    }
                }
            }
        }
        if attrs.length.is_none()
            && clean_until > 0
            && (ops.get(1).is_none() || matches!(ops.get(1), Some(Operand::Empty(_))))
        {
            // No explicit length: inherited from the leftmost term of the
            // value expression when it names a symbol.
            if let Some(Operand::Expr(expr, _)) = ops.first() {
                match expr.leftmost_term() {
                    crate::expression::Expr::OrdSym(id) => {
                        let id = *id;
                        let known = self
                            .ctx
                            .ord
                            .get_symbol(id)
                            .and_then(|symbol| symbol.attrs.length)
                            .or_else(|| {
                                self.ctx.ord.attr_cache.get(&id).and_then(|a| a.length)
                            });
                        if let Some(length) = known {
                            attrs.length = Some(length);
                        }
                    }
                    _ => attrs.length = Some(1),
                }
            }
        }
        if clean_until > 2 {
            if let Some(Operand::Expr(expr, _)) = ops.get(2) {
                if let (OrdEval::Abs(value), _) = self.ctx.ord.eval(expr, None) {
                    if (0..=255).contains(&value) {
                        attrs.type_attr = value as u8;
                    }
                }
            }
        }
        attrs
    }

    fn extract_data_attrs(&mut self, stmt: &Statement, _file: &str) -> SymbolAttributes {
        let ops = self.parser.reparse_operands(self.ctx, 
            &stmt.operands,
            OperandFormat::DataDef,
            stmt.ops_range.start,
        );
        let mut attrs = SymbolAttributes::new(SymbolOrigin::DataDef);
        if let Some(Operand::DataDef(def, _)) = ops.first() {
            attrs.type_attr = def.type_char as u8;
            match &def.length {
                None => attrs.length = Some(def.implied_length() as u16),
                Some(expr) => {
                    if let (OrdEval::Abs(value), _) = self.ctx.ord.eval(expr, None) {
                        attrs.length = Some(value.max(0) as u16);
                    }
                }
            }
            if let Some(expr) = &def.scale {
                if let (OrdEval::Abs(value), _) = self.ctx.ord.eval(expr, None) {
                    attrs.scale = value as i16;
                }
            }
        }
        attrs
    }

    /// COPY during lookahead: members participate in the scan. Fetch
    /// failures stay quiet; ordinary processing reports them when the
    /// statement is really reached.
    fn lookahead_copy(&mut self, stmt: &Statement) {
        let ops = self.parser.reparse_operands(self.ctx, 
            &stmt.operands,
            OperandFormat::Asm,
            stmt.ops_range.start,
        );
        let member = ops.iter().find_map(|op| match op {
            Operand::Expr(crate::expression::Expr::OrdSym(id), _) => Some(*id),
            _ => None,
        });
        let member = match member {
            Some(member) => member,
            None => return,
        };
        if self.ctx.get_copy_member(member).is_none() {
            let name = self.ctx.resolve_id(member).to_string();
            if !self.lib.parse_library(&name, self.ctx, LibraryKind::Copy) {
                return;
            }
        }
        let _ = self.ctx.enter_copy_member(member, false);
    }
}
