//! The ordinary processor: conditional assembly, assembler directives,
//! machine instructions and macro calls.

use log::debug;

use crate::checking::{check_displacement, check_operand, CheckValue};
use crate::context::{OpcodeInfo, SeqSymbol, StreamSnapshot};
use crate::diagnostics::Diagnostic;
use crate::eval::{collect_lookahead_refs, CaEval};
use crate::expression::{AttrKind, AttrTarget, BinOp, Expr, SetType, SetValue};
use crate::ids::IdIndex;
use crate::instruction::{AsmInstr, CaInstr, InstrKind};
use crate::location::{Location, Range};
use crate::lsp::SymKind;
use crate::macros::MacroArg;
use crate::ordinary::{OrdEval, PendingTarget, PostponedKind, SectionKind};
use crate::statement::{
    DataDef, InstrField, LabelField, Nominal, Operand, OperandFormat, Statement,
};
use crate::symbol::{Symbol, SymbolAttributes, SymbolOrigin, SymbolState, SymbolValue};
use crate::variables::MacroParamData;

use super::manager::{
    LookaheadKind, LookaheadState, MacroDefState, ProcState, ProcessingManager,
};
use super::LibraryKind;

impl<'a> ProcessingManager<'a> {
    pub(super) fn process_ordinary(&mut self, stmt: Statement, snapshot: StreamSnapshot) {
        let file = self.current_stream_file();

        if self.expect_macro_header {
            if stmt.is_empty() {
                return;
            }
            if self.instr_id(&stmt, &file) == Some(self.ctx.add_id("MACRO")) {
                self.expect_macro_header = false;
            } else {
                let stack = self.ctx.processing_frames();
                self.ctx.diags.add(
                    Diagnostic::invalid_macro_library(
                        &file,
                        "the member must start with MACRO",
                        &file,
                        stmt.range,
                    ),
                    &stack,
                );
                self.stopped = true;
                return;
            }
        }

        if stmt.is_empty() {
            return;
        }

        let opcode_id = match self.instr_id(&stmt, &file) {
            Some(id) => id,
            None => {
                // A lone label still defines a sequence symbol.
                self.process_label_seq_or_empty(&stmt, &snapshot, &file);
                return;
            }
        };

        match self.ctx.get_operation_code(opcode_id) {
            Some(OpcodeInfo::Instr(InstrKind::Ca(ca))) => {
                self.process_ca(ca, stmt, snapshot, &file)
            }
            Some(OpcodeInfo::Instr(InstrKind::Assembler(asm))) => {
                self.process_asm(asm, opcode_id, stmt, snapshot, &file)
            }
            Some(OpcodeInfo::Instr(kind)) => self.process_machine(kind, stmt, snapshot, &file),
            Some(OpcodeInfo::Macro(def)) => {
                self.process_macro_call(def, stmt, snapshot, &file)
            }
            None => {
                let name = self.ctx.resolve_id(opcode_id).to_string();
                if self.ctx.mark_fetch_attempted(opcode_id) {
                    if self
                        .lib
                        .parse_library(&name, self.ctx, LibraryKind::Macro)
                    {
                        if let Some(OpcodeInfo::Macro(def)) =
                            self.ctx.get_operation_code(opcode_id)
                        {
                            self.process_macro_call(def, stmt, snapshot, &file);
                        }
                        // A fetched member that failed to define the macro
                        // was already diagnosed by the nested analysis.
                    } else {
                        let stack = self.ctx.processing_frames();
                        self.ctx.diags.add(
                            Diagnostic::unknown_operation_code(&name, &file, stmt.instr_range),
                            &stack,
                        );
                    }
                }
            }
        }
    }

    /// Resolves the instruction field, substituting variables.
    fn instr_id(&mut self, stmt: &Statement, file: &str) -> Option<IdIndex> {
        match &stmt.instruction {
            InstrField::Empty => None,
            InstrField::Ordinary(id) => Some(*id),
            InstrField::Concat(chain) => {
                let text = {
                    let mut eval = CaEval::new(self.ctx, file, stmt.instr_range);
                    eval.concatenate(chain)
                };
                if text.trim().is_empty() {
                    None
                } else {
                    Some(self.ctx.add_id(text.trim()))
                }
            }
        }
    }

    /// Resolves the label field to a symbol name, substituting variables.
    pub(crate) fn label_name(&mut self, stmt: &Statement, file: &str) -> Option<IdIndex> {
        match &stmt.label {
            LabelField::Empty | LabelField::Sequence(_) => None,
            LabelField::Ordinary(id) => Some(*id),
            LabelField::Var(var) => {
                let text = {
                    let mut eval = CaEval::new(self.ctx, file, stmt.label_range);
                    eval.eval_var(var).to_c()
                };
                let text = text.trim().to_string();
                if text.is_empty() {
                    None
                } else {
                    Some(self.ctx.add_id(&text))
                }
            }
            LabelField::Concat(chain) => {
                let text = {
                    let mut eval = CaEval::new(self.ctx, file, stmt.label_range);
                    eval.concatenate(chain)
                };
                let text = text.trim().to_string();
                if text.is_empty() {
                    None
                } else {
                    Some(self.ctx.add_id(&text))
                }
            }
        }
    }

    /// Label text for macro label arguments (kept verbatim).
    fn label_text(&mut self, stmt: &Statement, file: &str) -> Option<String> {
        match &stmt.label {
            LabelField::Empty | LabelField::Sequence(_) => None,
            LabelField::Ordinary(id) => Some(self.ctx.resolve_id(*id).to_string()),
            LabelField::Var(var) => {
                let mut eval = CaEval::new(self.ctx, file, stmt.label_range);
                Some(eval.eval_var(var).to_c())
            }
            LabelField::Concat(chain) => {
                let mut eval = CaEval::new(self.ctx, file, stmt.label_range);
                Some(eval.concatenate(chain))
            }
        }
    }

    /// Records the label as a sequence symbol or warns when a field is
    /// present where none is expected.
    fn process_label_seq_or_empty(
        &mut self,
        stmt: &Statement,
        snapshot: &StreamSnapshot,
        file: &str,
    ) {
        match &stmt.label {
            LabelField::Empty => {}
            LabelField::Sequence(name) => self.define_seq_symbol(*name, stmt, snapshot, file),
            _ => {
                let stack = self.ctx.processing_frames();
                self.ctx
                    .diags
                    .add(Diagnostic::unexpected_field(file, stmt.label_range), &stack);
            }
        }
    }

    fn define_seq_symbol(
        &mut self,
        name: IdIndex,
        stmt: &Statement,
        snapshot: &StreamSnapshot,
        file: &str,
    ) {
        if self.ctx.is_in_macro() {
            // Macro-body sequence symbols were pre-indexed at definition.
            return;
        }
        // Re-visiting the label after a jump is not a redefinition.
        if let Some(existing) = self.ctx.opencode_seq_snapshot(name) {
            if *existing == *snapshot {
                return;
            }
            let text = self.ctx.resolve_id(name).to_string();
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add(
                Diagnostic::already_defined("sequence symbol", &text, file, stmt.label_range),
                &stack,
            );
            return;
        }
        let symbol = SeqSymbol {
            name,
            location: Location::new(file, stmt.range.start),
            snapshot: snapshot.clone(),
        };
        self.ctx
            .occurrences
            .add(SymKind::Sequence, name, file, stmt.label_range, true);
        self.ctx.add_opencode_seq_symbol(symbol);
    }

    // ----- conditional assembly -----

    fn process_ca(
        &mut self,
        ca: CaInstr,
        stmt: Statement,
        snapshot: StreamSnapshot,
        file: &str,
    ) {
        let format = match ca {
            CaInstr::LCLA
            | CaInstr::LCLB
            | CaInstr::LCLC
            | CaInstr::GBLA
            | CaInstr::GBLB
            | CaInstr::GBLC => OperandFormat::VarDecl,
            _ if ca.operandless() => OperandFormat::Ignored,
            _ => OperandFormat::Ca,
        };
        let ops = self.parser.reparse_operands(self.ctx, &stmt.operands, format, stmt.ops_range.start);

        // Attribute references over symbols the table does not know yet
        // suspend the statement and scan forward.
        if format == OperandFormat::Ca {
            let mut label_exprs: Vec<Expr> = Vec::new();
            if let LabelField::Var(var) = &stmt.label {
                label_exprs.extend(var.subscripts.iter().cloned());
            }
            for expr in label_exprs
                .iter()
                .chain(ops.iter().filter_map(operand_expr))
            {
                if let Some((target, attr)) =
                    collect_lookahead_refs(expr, self.ctx).first().copied()
                {
                    self.start_lookahead(
                        target,
                        LookaheadKind::Ordinary,
                        Some(attr),
                        snapshot,
                        file,
                        stmt.ops_range,
                    );
                    return;
                }
            }
        }

        match ca {
            CaInstr::SETA => self.process_set(SetType::A, &stmt, ops, file),
            CaInstr::SETB => self.process_set(SetType::B, &stmt, ops, file),
            CaInstr::SETC => self.process_set(SetType::C, &stmt, ops, file),
            CaInstr::LCLA => self.process_decl(SetType::A, false, &stmt, ops, file),
            CaInstr::LCLB => self.process_decl(SetType::B, false, &stmt, ops, file),
            CaInstr::LCLC => self.process_decl(SetType::C, false, &stmt, ops, file),
            CaInstr::GBLA => self.process_decl(SetType::A, true, &stmt, ops, file),
            CaInstr::GBLB => self.process_decl(SetType::B, true, &stmt, ops, file),
            CaInstr::GBLC => self.process_decl(SetType::C, true, &stmt, ops, file),
            CaInstr::ANOP | CaInstr::AEJECT | CaInstr::ASPACE | CaInstr::AREAD => {
                self.process_label_seq_or_empty(&stmt, &snapshot, file);
            }
            CaInstr::ACTR => {
                self.process_label_seq_or_empty(&stmt, &snapshot, file);
                match ops.iter().find(|op| !op.is_empty()) {
                    Some(Operand::CaExpr(expr, range)) => {
                        let value = {
                            let mut eval = CaEval::new(self.ctx, file, *range);
                            let value = eval.eval(expr);
                            eval.eval_to_a(&value)
                        };
                        self.ctx.set_branch_counter(value);
                    }
                    _ => {
                        let stack = self.ctx.processing_frames();
                        self.ctx.diags.add(
                            Diagnostic::missing_operands("ACTR", file, stmt.ops_range),
                            &stack,
                        );
                    }
                }
            }
            CaInstr::AGO => self.process_ago(&stmt, ops, &snapshot, file),
            CaInstr::AIF => self.process_aif(&stmt, ops, &snapshot, file),
            CaInstr::MACRO => {
                if !matches!(stmt.label, LabelField::Empty) {
                    let stack = self.ctx.processing_frames();
                    self.ctx
                        .diags
                        .add(Diagnostic::unexpected_field(file, stmt.label_range), &stack);
                }
                debug!("macro definition starts at {}:{}", file, stmt.range.start.line);
                self.ctx
                    .push_processing(crate::context::ProcessingKind::MacroDef, None);
                let documentation = if self.ctx.is_in_macro()
                    || !self.ctx.current_copy_stack().is_empty()
                {
                    String::new()
                } else {
                    self.parser.leading_comments(stmt.index).join("\n")
                };
                self.state = ProcState::MacroDef(MacroDefState {
                    expecting_prototype: true,
                    nest: 0,
                    name: IdIndex::EMPTY,
                    label_param: None,
                    positional: Vec::new(),
                    keywords: Default::default(),
                    body: Vec::new(),
                    labels: Default::default(),
                    param_names: Default::default(),
                    location: Location::new(file, stmt.range.start),
                    documentation,
                });
            }
            CaInstr::MEND => {
                // Cached bodies keep their closing MEND; during expansion
                // it does nothing, the body simply ends after it.
                if !self.ctx.is_in_macro() {
                    let stack = self.ctx.processing_frames();
                    self.ctx.diags.add(
                        Diagnostic::misplaced_in_open_code("MEND", file, stmt.instr_range),
                        &stack,
                    );
                }
            }
            CaInstr::MEXIT => {
                if self.ctx.is_in_macro() {
                    self.ctx.leave_macro();
                } else {
                    let stack = self.ctx.processing_frames();
                    self.ctx.diags.add(
                        Diagnostic::misplaced_in_open_code("MEXIT", file, stmt.instr_range),
                        &stack,
                    );
                }
            }
        }
    }

    fn process_set(
        &mut self,
        set_type: SetType,
        stmt: &Statement,
        ops: Vec<Operand>,
        file: &str,
    ) {
        let var = match &stmt.label {
            LabelField::Var(var) => var.clone(),
            _ => {
                let stack = self.ctx.processing_frames();
                self.ctx.diags.add(
                    Diagnostic::invalid_operand("SET label", file, stmt.label_range),
                    &stack,
                );
                return;
            }
        };

        let (name, base_index) = {
            let mut eval = CaEval::new(self.ctx, file, stmt.label_range);
            let name = eval.var_ref_name(&var);
            let index = match var.subscripts.first() {
                Some(sub) => {
                    let value = eval.eval(sub);
                    Some(eval.eval_to_a(&value).max(0) as usize)
                }
                None => None,
            };
            (name, index)
        };
        self.ctx
            .occurrences
            .add(SymKind::Variable, name, file, stmt.label_range, true);

        let mut offset = 0usize;
        let mut any = false;
        for op in &ops {
            let (expr, range) = match op {
                Operand::CaExpr(expr, range) => (expr, *range),
                Operand::Empty(_) => continue,
                other => {
                    let stack = self.ctx.processing_frames();
                    self.ctx.diags.add(
                        Diagnostic::invalid_operand("SET", file, other.range()),
                        &stack,
                    );
                    continue;
                }
            };
            any = true;
            let value = {
                let mut eval = CaEval::new(self.ctx, file, range);
                let raw = eval.eval(expr);
                match set_type {
                    SetType::A => SetValue::A(eval.eval_to_a(&raw)),
                    SetType::B => SetValue::B(eval.eval_to_a(&raw) != 0),
                    SetType::C => SetValue::C(raw.to_c()),
                }
            };
            let index = base_index.map(|base| base + offset);
            self.ctx.set_var(name, index, value, file, range);
            offset += 1;
            if base_index.is_none() {
                break;
            }
        }
        if !any {
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add(
                Diagnostic::missing_operands("SET instruction", file, stmt.ops_range),
                &stack,
            );
        }
    }

    fn process_decl(
        &mut self,
        set_type: SetType,
        global: bool,
        stmt: &Statement,
        ops: Vec<Operand>,
        file: &str,
    ) {
        if !matches!(stmt.label, LabelField::Empty) {
            let stack = self.ctx.processing_frames();
            self.ctx
                .diags
                .add(Diagnostic::unexpected_field(file, stmt.label_range), &stack);
        }
        let mut any = false;
        for op in &ops {
            match op {
                Operand::VarDecl { name, array, range } => {
                    any = true;
                    self.ctx
                        .declare_var(*name, set_type, !array, global, file, *range);
                    self.ctx
                        .occurrences
                        .add(SymKind::Variable, *name, file, *range, true);
                }
                Operand::Empty(_) => {}
                other => {
                    any = true;
                    let stack = self.ctx.processing_frames();
                    self.ctx.diags.add(
                        Diagnostic::invalid_operand("variable declaration", file, other.range()),
                        &stack,
                    );
                }
            }
        }
        if !any {
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add(
                Diagnostic::missing_operands("variable symbol definition", file, stmt.ops_range),
                &stack,
            );
        }
    }

    fn process_ago(
        &mut self,
        stmt: &Statement,
        ops: Vec<Operand>,
        snapshot: &StreamSnapshot,
        file: &str,
    ) {
        self.process_label_seq_or_empty(stmt, snapshot, file);

        let branches: Vec<(Option<&Expr>, IdIndex, Range)> = ops
            .iter()
            .filter_map(|op| match op {
                Operand::CaBranch {
                    condition,
                    target,
                    range,
                } => Some((condition.as_ref(), *target, *range)),
                _ => None,
            })
            .collect();
        if branches.is_empty() {
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add(
                Diagnostic::missing_operands("AGO", file, stmt.ops_range),
                &stack,
            );
            return;
        }

        match branches[0].0 {
            None => {
                if branches.len() > 1 {
                    let stack = self.ctx.processing_frames();
                    self.ctx.diags.add(
                        Diagnostic::invalid_operand("AGO", file, stmt.ops_range),
                        &stack,
                    );
                }
                let (_, target, range) = branches[0];
                self.jump(target, range, snapshot, file);
            }
            Some(selector) => {
                let index = {
                    let mut eval = CaEval::new(self.ctx, file, branches[0].2);
                    let value = eval.eval(selector);
                    eval.eval_to_a(&value)
                };
                // Out-of-range selectors fall through without a word.
                if index >= 1 && (index as usize) <= branches.len() {
                    let (_, target, range) = branches[index as usize - 1];
                    self.jump(target, range, snapshot, file);
                }
            }
        }
    }

    fn process_aif(
        &mut self,
        stmt: &Statement,
        ops: Vec<Operand>,
        snapshot: &StreamSnapshot,
        file: &str,
    ) {
        self.process_label_seq_or_empty(stmt, snapshot, file);

        let mut any = false;
        for op in &ops {
            match op {
                Operand::CaBranch {
                    condition: Some(condition),
                    target,
                    range,
                } => {
                    any = true;
                    let taken = {
                        let mut eval = CaEval::new(self.ctx, file, *range);
                        let value = eval.eval(condition);
                        eval.eval_to_a(&value) != 0
                    };
                    if taken {
                        self.jump(*target, *range, snapshot, file);
                        return;
                    }
                }
                Operand::Empty(_) => {}
                other => {
                    let stack = self.ctx.processing_frames();
                    self.ctx.diags.add(
                        Diagnostic::invalid_operand("AIF", file, other.range()),
                        &stack,
                    );
                    return;
                }
            }
        }
        if !any {
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add(
                Diagnostic::missing_operands("AIF", file, stmt.ops_range),
                &stack,
            );
        }
    }

    /// Branches to a sequence symbol, starting lookahead when the target
    /// is not known yet.
    fn jump(&mut self, target: IdIndex, range: Range, trigger: &StreamSnapshot, file: &str) {
        self.ctx
            .occurrences
            .add(SymKind::Sequence, target, file, range, false);
        match self.ctx.get_seq_symbol(target) {
            Some(snapshot) => {
                if self.ctx.branch_counter() <= 0 {
                    let stack = self.ctx.processing_frames();
                    self.ctx
                        .diags
                        .add(Diagnostic::actr_exhausted(file, range), &stack);
                    if self.ctx.is_in_macro() {
                        self.ctx.leave_macro();
                    } else {
                        self.stopped = true;
                    }
                    return;
                }
                self.ctx.decrement_branch_counter();
                self.restore_stream(&snapshot);
            }
            None => {
                self.start_lookahead(
                    target,
                    LookaheadKind::Sequence,
                    None,
                    trigger.clone(),
                    file,
                    range,
                );
            }
        }
    }

    pub(super) fn start_lookahead(
        &mut self,
        target: IdIndex,
        kind: LookaheadKind,
        attr: Option<AttrKind>,
        return_snapshot: StreamSnapshot,
        file: &str,
        range: Range,
    ) {
        debug!(
            "lookahead for {} starts at {}",
            self.ctx.resolve_id(target),
            file
        );
        self.ctx
            .push_processing(crate::context::ProcessingKind::Lookahead, None);
        self.state = ProcState::Lookahead(LookaheadState {
            target,
            kind,
            attr,
            return_snapshot,
            trigger_file: file.to_string(),
            trigger_range: range,
            macro_nest: 0,
        });
    }

    // ----- assembler instructions -----

    fn process_asm(
        &mut self,
        asm: AsmInstr,
        opcode_id: IdIndex,
        stmt: Statement,
        snapshot: StreamSnapshot,
        file: &str,
    ) {
        let format = match asm {
            AsmInstr::DC | AsmInstr::DS | AsmInstr::DXD => OperandFormat::DataDef,
            AsmInstr::TITLE
            | AsmInstr::PUNCH
            | AsmInstr::MNOTE
            | AsmInstr::PRINT
            | AsmInstr::PUSH
            | AsmInstr::POP
            | AsmInstr::AMODE
            | AsmInstr::RMODE
            | AsmInstr::ACONTROL
            | AsmInstr::ALIAS
            | AsmInstr::CATTR
            | AsmInstr::XATTR
            | AsmInstr::USING
            | AsmInstr::DROP => OperandFormat::Ignored,
            _ => OperandFormat::Asm,
        };
        let ops = self.parser.reparse_operands(self.ctx, &stmt.operands, format, stmt.ops_range.start);
        let ops = self.substitute_models(ops, format, file);
        if format != OperandFormat::Ignored {
            self.check_asm_operand_count(asm, opcode_id, &ops, &stmt, file);
        }
        self.record_expr_refs(&ops, file);

        match asm {
            AsmInstr::CSECT | AsmInstr::START => {
                self.process_section(SectionKind::Executable, &stmt, file)
            }
            AsmInstr::RSECT => self.process_section(SectionKind::ReadOnly, &stmt, file),
            AsmInstr::DSECT => self.process_section(SectionKind::Dummy, &stmt, file),
            AsmInstr::COM => self.process_section(SectionKind::Common, &stmt, file),
            AsmInstr::LOCTR => {
                let name = match self.label_name(&stmt, file) {
                    Some(name) => name,
                    None => {
                        let stack = self.ctx.processing_frames();
                        self.ctx.diags.add(
                            Diagnostic::invalid_operand("LOCTR label", file, stmt.label_range),
                            &stack,
                        );
                        return;
                    }
                };
                self.ctx
                    .occurrences
                    .add(SymKind::Ordinary, name, file, stmt.label_range, true);
                let location = Location::new(file, stmt.range.start);
                self.ctx.ord.set_loctr(name, location, &mut self.ctx.diags);
            }
            AsmInstr::EQU => self.process_equ(&stmt, ops, &snapshot, file),
            AsmInstr::DC | AsmInstr::DS | AsmInstr::DXD => {
                self.process_data_def(asm == AsmInstr::DC, &stmt, ops, &snapshot, file)
            }
            AsmInstr::ORG => self.process_org(&stmt, ops, file),
            AsmInstr::OPSYN => self.process_opsyn(&stmt, ops, file),
            AsmInstr::COPY => self.process_copy(&stmt, ops, file),
            AsmInstr::MNOTE => self.process_mnote(&stmt, file),
            AsmInstr::END => {
                self.stopped = true;
            }
            AsmInstr::CCW | AsmInstr::CCW0 | AsmInstr::CCW1 => {
                let location = Location::new(file, stmt.range.start);
                self.ctx
                    .ord
                    .align(8, location.clone(), &mut self.ctx.diags);
                self.define_ordinary_label(
                    &stmt,
                    SymbolAttributes::new(SymbolOrigin::DataDef)
                        .with_type(b'W')
                        .with_length(8),
                    &snapshot,
                    file,
                );
                self.ctx.ord.advance(8, location, &mut self.ctx.diags);
            }
            AsmInstr::CNOP => {
                if let Some(Operand::Expr(expr, range)) = ops.get(1) {
                    let (outcome, _) = self.ctx.ord.eval(expr, None);
                    if let OrdEval::Abs(boundary) = outcome {
                        let location = Location::new(file, range.start);
                        self.ctx
                            .ord
                            .align(boundary.max(1), location, &mut self.ctx.diags);
                    }
                }
            }
            // Listing and linkage directives have no semantic effect here.
            _ => {
                self.process_label_seq_or_empty(&stmt, &snapshot, file);
            }
        }
    }

    fn check_asm_operand_count(
        &mut self,
        asm: AsmInstr,
        opcode_id: IdIndex,
        ops: &[Operand],
        stmt: &Statement,
        file: &str,
    ) {
        let (min, max) = asm.operand_bounds();
        let count = ops.iter().filter(|op| !op.is_empty()).count() as i32;
        if count < min || (max >= 0 && count > max) {
            let name = self.ctx.resolve_id(opcode_id).to_string();
            let stack = self.ctx.processing_frames();
            let diag = if count < min {
                Diagnostic::missing_operands(&name, file, stmt.ops_range)
            } else {
                Diagnostic::operand_count(&name, file, stmt.ops_range)
            };
            self.ctx.diags.add(diag, &stack);
        }
    }

    fn process_section(&mut self, kind: SectionKind, stmt: &Statement, file: &str) {
        let name = self.label_name(stmt, file).unwrap_or(IdIndex::EMPTY);
        if !name.is_empty() {
            self.ctx
                .occurrences
                .add(SymKind::Ordinary, name, file, stmt.label_range, true);
        }
        let name_text = self.ctx.resolve_id(name).to_string();
        let location = Location::new(file, stmt.range.start);
        self.ctx
            .ord
            .set_section(name, &name_text, kind, location, &mut self.ctx.diags);
    }

    fn process_equ(
        &mut self,
        stmt: &Statement,
        ops: Vec<Operand>,
        snapshot: &StreamSnapshot,
        file: &str,
    ) {
        let name = match self.label_name(stmt, file) {
            Some(name) => name,
            None => {
                self.process_label_seq_or_empty(stmt, snapshot, file);
                return;
            }
        };
        let name_text = self.ctx.resolve_id(name).to_string();
        self.ctx
            .occurrences
            .add(SymKind::Ordinary, name, file, stmt.label_range, true);

        let value_expr = match ops.first() {
            Some(Operand::Expr(expr, _)) => expr.clone(),
            _ => {
                let stack = self.ctx.processing_frames();
                self.ctx.diags.add(
                    Diagnostic::missing_operands("EQU", file, stmt.ops_range),
                    &stack,
                );
                return;
            }
        };
        let location = Location::new(file, stmt.range.start);

        let loctr = if expr_uses_loctr(&value_expr)
            || ops.iter().skip(1).any(|op| match op {
                Operand::Expr(expr, _) => expr_uses_loctr(expr),
                _ => false,
            }) {
            Some(
                self.ctx
                    .ord
                    .current_reloc(location.clone(), &mut self.ctx.diags),
            )
        } else {
            None
        };

        // Explicit length (second operand), bounds 0..=65535.
        let mut attrs = SymbolAttributes::new(SymbolOrigin::Equate);
        let mut length_pending: Option<Expr> = None;
        match ops.get(1) {
            Some(Operand::Expr(expr, range)) => {
                let (outcome, _) = self.ctx.ord.eval(expr, loctr.as_ref());
                match outcome {
                    OrdEval::Abs(value) if (0..=65535).contains(&value) => {
                        attrs.length = Some(value as u16)
                    }
                    OrdEval::Abs(_) => {
                        let stack = self.ctx.processing_frames();
                        self.ctx.diags.add(
                            Diagnostic::value_out_of_bounds("length attribute", file, *range),
                            &stack,
                        );
                    }
                    OrdEval::Unresolved(_) => length_pending = Some(expr.clone()),
                    _ => {}
                }
            }
            _ => {}
        }
        if attrs.length.is_none() && length_pending.is_none() {
            // Implicit length: the leftmost term of the value expression.
            match value_expr.leftmost_term() {
                Expr::OrdSym(id) => {
                    length_pending = Some(Expr::Attr(AttrKind::Length, AttrTarget::Sym(*id)))
                }
                _ => attrs.length = Some(1),
            }
        }

        // Explicit type (third operand), bounds 0..=255.
        if let Some(Operand::Expr(expr, range)) = ops.get(2) {
            let (outcome, _) = self.ctx.ord.eval(expr, loctr.as_ref());
            match outcome {
                OrdEval::Abs(value) if (0..=255).contains(&value) => {
                    attrs.type_attr = value as u8;
                }
                OrdEval::Abs(_) => {
                    let stack = self.ctx.processing_frames();
                    self.ctx.diags.add(
                        Diagnostic::value_out_of_bounds("type attribute", file, *range),
                        &stack,
                    );
                }
                _ => {}
            }
        }

        let (outcome, faults) = self.ctx.ord.eval(&value_expr, loctr.as_ref());
        let state = match outcome {
            OrdEval::Abs(value) => SymbolState::Resolved(SymbolValue::Abs(value)),
            OrdEval::Reloc(reloc) => SymbolState::Resolved(SymbolValue::Reloc(reloc)),
            OrdEval::Unresolved(_) => SymbolState::Pending,
            OrdEval::Invalid => {
                let stack = self.ctx.processing_frames();
                for fault in &faults {
                    self.ctx
                        .diags
                        .add(fault.diagnostic(file, stmt.ops_range), &stack);
                }
                SymbolState::Resolved(SymbolValue::Abs(0))
            }
        };
        let pending_value = state == SymbolState::Pending;

        let symbol = Symbol {
            name,
            value: state,
            attrs,
            location,
        };
        if !self
            .ctx
            .ord
            .define_symbol(symbol, &name_text, &mut self.ctx.diags, &[])
        {
            return;
        }
        if pending_value {
            self.ctx.ord.add_pending(
                PendingTarget::Value(name),
                name,
                &name_text,
                value_expr,
                loctr.clone(),
                file,
                stmt.ops_range,
                &mut self.ctx.diags,
            );
        }
        if let Some(expr) = length_pending {
            self.ctx.ord.add_pending(
                PendingTarget::Length(name),
                name,
                &name_text,
                expr,
                loctr,
                file,
                stmt.ops_range,
                &mut self.ctx.diags,
            );
        }
    }

    fn process_data_def(
        &mut self,
        is_dc: bool,
        stmt: &Statement,
        ops: Vec<Operand>,
        snapshot: &StreamSnapshot,
        file: &str,
    ) {
        let location = Location::new(file, stmt.range.start);
        let label = self.data_def_label(stmt, snapshot, file);
        let mut first = true;
        for op in &ops {
            let (def, range) = match op {
                Operand::DataDef(def, range) => (def, *range),
                Operand::Empty(_) => continue,
                other => {
                    let stack = self.ctx.processing_frames();
                    self.ctx.diags.add(
                        Diagnostic::invalid_operand("data definition", file, other.range()),
                        &stack,
                    );
                    continue;
                }
            };

            self.ctx
                .ord
                .align(def.alignment(), location.clone(), &mut self.ctx.diags);

            if first {
                if let Some(name) = label {
                    self.define_data_label(name, stmt, def, range, file);
                }
                first = false;
            }

            self.advance_data(def, label, is_dc, range, file, &location);
        }
    }

    /// Resolves a DC/DS label name, routing sequence symbols to the
    /// sequence table.
    fn data_def_label(
        &mut self,
        stmt: &Statement,
        snapshot: &StreamSnapshot,
        file: &str,
    ) -> Option<IdIndex> {
        if matches!(stmt.label, LabelField::Sequence(_)) {
            self.process_label_seq_or_empty(stmt, snapshot, file);
            return None;
        }
        self.label_name(stmt, file)
    }

    /// Defines the data definition's label with type, length and scale
    /// attributes; unresolved lengths go to the solver.
    fn define_data_label(
        &mut self,
        name: IdIndex,
        stmt: &Statement,
        def: &DataDef,
        range: Range,
        file: &str,
    ) {
        let name_text = self.ctx.resolve_id(name).to_string();
        self.ctx
            .occurrences
            .add(SymKind::Ordinary, name, file, stmt.label_range, true);

        let location = Location::new(file, stmt.range.start);
        let mut attrs = SymbolAttributes::new(SymbolOrigin::DataDef)
            .with_type(def.type_char as u8);

        let loctr = self
            .ctx
            .ord
            .current_reloc(location.clone(), &mut self.ctx.diags);

        let mut length_pending = None;
        match &def.length {
            None => attrs.length = Some(def.implied_length() as u16),
            Some(expr) => {
                let (outcome, _) = self.ctx.ord.eval(expr, Some(&loctr));
                match outcome {
                    OrdEval::Abs(value) => attrs.length = Some(value.max(0) as u16),
                    OrdEval::Unresolved(_) | OrdEval::Reloc(_) => {
                        length_pending = Some(expr.clone())
                    }
                    OrdEval::Invalid => attrs.length = Some(1),
                }
            }
        }
        if let Some(expr) = &def.scale {
            let (outcome, _) = self.ctx.ord.eval(expr, Some(&loctr));
            if let OrdEval::Abs(value) = outcome {
                attrs.scale = value as i16;
            }
        }
        attrs.integer = integer_attr(def.type_char, attrs.length, attrs.scale);

        let symbol = Symbol {
            name,
            value: SymbolState::Resolved(SymbolValue::Reloc(loctr.clone())),
            attrs,
            location,
        };
        if self
            .ctx
            .ord
            .define_symbol(symbol, &name_text, &mut self.ctx.diags, &[])
        {
            if let Some(expr) = length_pending {
                self.ctx.ord.add_pending(
                    PendingTarget::Length(name),
                    name,
                    &name_text,
                    expr,
                    Some(loctr),
                    file,
                    range,
                    &mut self.ctx.diags,
                );
            }
        }
    }

    /// Moves the location counter past a data operand, opening a gap when
    /// the byte size is not yet computable.
    fn advance_data(
        &mut self,
        def: &DataDef,
        label: Option<IdIndex>,
        is_dc: bool,
        range: Range,
        file: &str,
        location: &Location,
    ) {
        let loctr = self
            .ctx
            .ord
            .current_reloc(location.clone(), &mut self.ctx.diags);

        // S-type nominals carry displacement constraints.
        if is_dc && def.type_char == 'S' {
            if let Some(Nominal::Exprs(exprs)) = &def.nominal {
                for expr in exprs {
                    let (outcome, _) = self.ctx.ord.eval(expr, Some(&loctr));
                    match outcome {
                        OrdEval::Abs(value) => {
                            if let Some(diag) =
                                check_displacement(&CheckValue::Abs(value), file, range)
                            {
                                let stack = self.ctx.processing_frames();
                                self.ctx.diags.add(diag, &stack);
                            }
                        }
                        OrdEval::Unresolved(_) | OrdEval::Reloc(_) => {
                            self.ctx.ord.postpone_check(
                                PostponedKind::DataDisplacement,
                                "DC",
                                expr.clone(),
                                Some(loctr.clone()),
                                file,
                                range,
                            );
                        }
                        OrdEval::Invalid => {}
                    }
                }
            }
        }

        let count = def.nominal_count();
        let dup = match &def.dup {
            None => Known(1),
            Some(expr) => match self.ctx.ord.eval(expr, Some(&loctr)).0 {
                OrdEval::Abs(value) => Known(value.max(0)),
                _ => Deferred(expr.clone()),
            },
        };
        let unit = match &def.length {
            None => Known(def.implied_length()),
            Some(expr) => match self.ctx.ord.eval(expr, Some(&loctr)).0 {
                OrdEval::Abs(value) => Known(value.max(0)),
                _ => Deferred(expr.clone()),
            },
        };

        match (dup, unit) {
            (Known(dup), Known(unit)) => {
                self.ctx
                    .ord
                    .advance(dup * unit * count, location.clone(), &mut self.ctx.diags);
            }
            (dup, unit) => {
                let size_expr = Expr::Binary(
                    BinOp::Mul,
                    Box::new(dup.into_expr()),
                    Box::new(Expr::Binary(
                        BinOp::Mul,
                        Box::new(unit.into_expr()),
                        Box::new(Expr::Num(count)),
                    )),
                );
                let name = label.unwrap_or(IdIndex::EMPTY);
                let name_text = self.ctx.resolve_id(name).to_string();
                self.ctx.ord.start_gap(
                    size_expr,
                    name,
                    &name_text,
                    Some(loctr),
                    file,
                    range,
                    &mut self.ctx.diags,
                );
            }
        }
    }

    fn process_org(&mut self, stmt: &Statement, ops: Vec<Operand>, file: &str) {
        let location = Location::new(file, stmt.range.start);
        let target = match ops.first() {
            None | Some(Operand::Empty(_)) => None,
            Some(Operand::Expr(expr, _)) => {
                let loctr = self
                    .ctx
                    .ord
                    .current_reloc(location.clone(), &mut self.ctx.diags);
                Some(self.ctx.ord.eval(expr, Some(&loctr)).0)
            }
            Some(other) => {
                let stack = self.ctx.processing_frames();
                self.ctx.diags.add(
                    Diagnostic::invalid_operand("ORG", file, other.range()),
                    &stack,
                );
                return;
            }
        };
        self.ctx.ord.org(target, location, &mut self.ctx.diags);
    }

    fn process_opsyn(&mut self, stmt: &Statement, ops: Vec<Operand>, file: &str) {
        let alias = match self.label_name(stmt, file) {
            Some(alias) => alias,
            None => {
                let stack = self.ctx.processing_frames();
                self.ctx.diags.add(
                    Diagnostic::invalid_operand("OPSYN label", file, stmt.label_range),
                    &stack,
                );
                return;
            }
        };
        let target = ops.iter().find_map(|op| match op {
            Operand::Expr(Expr::OrdSym(id), _) => Some(*id),
            _ => None,
        });
        let ok = match target {
            Some(target) => self.ctx.add_opsyn(alias, target),
            None => self.ctx.remove_opsyn(alias),
        };
        if !ok {
            let name = match target {
                Some(target) => self.ctx.resolve_id(target).to_string(),
                None => self.ctx.resolve_id(alias).to_string(),
            };
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add(
                Diagnostic::opsyn_undefined(&name, file, stmt.range),
                &stack,
            );
        }
    }

    fn process_copy(&mut self, stmt: &Statement, ops: Vec<Operand>, file: &str) {
        let name = match ops.iter().find_map(|op| match op {
            Operand::Expr(Expr::OrdSym(id), range) => Some((*id, *range)),
            _ => None,
        }) {
            Some(name) => name,
            None => {
                let stack = self.ctx.processing_frames();
                self.ctx.diags.add(
                    Diagnostic::invalid_operand("COPY", file, stmt.ops_range),
                    &stack,
                );
                return;
            }
        };
        let (member, range) = name;
        self.ctx
            .occurrences
            .add(SymKind::CopyMember, member, file, range, false);
        self.enter_copy(member, range, file);
    }

    /// Enters a copy member, fetching it through the library provider on
    /// first use.
    pub(super) fn enter_copy(&mut self, member: IdIndex, range: Range, file: &str) -> bool {
        if self.ctx.get_copy_member(member).is_none() {
            let name = self.ctx.resolve_id(member).to_string();
            if !self.lib.parse_library(&name, self.ctx, LibraryKind::Copy)
                || self.ctx.get_copy_member(member).is_none()
            {
                let stack = self.ctx.processing_frames();
                self.ctx.diags.add(
                    Diagnostic::library_fetch_failed(&name, file, range),
                    &stack,
                );
                return false;
            }
        }
        let at_top_source = self.library_mode();
        match self.ctx.enter_copy_member(member, at_top_source) {
            Ok(()) => true,
            Err(()) => {
                let name = self.ctx.resolve_id(member).to_string();
                let stack = self.ctx.processing_frames();
                self.ctx
                    .diags
                    .add(Diagnostic::recursive_copy(&name, file, range), &stack);
                false
            }
        }
    }

    fn process_mnote(&mut self, stmt: &Statement, file: &str) {
        let text = stmt.operands.trim();
        let (severity, message) = match text.split_once(',') {
            Some((sev, msg)) if sev.trim() == "*" => (None, msg.trim()),
            Some((sev, msg)) => match sev.trim().parse::<u32>() {
                Ok(level) => (Some(level), msg.trim()),
                Err(_) => (None, text),
            },
            None => (None, text),
        };
        let message = message.trim_matches('\'').to_string();
        let stack = self.ctx.processing_frames();
        let diag = match severity {
            Some(level) if level >= 8 => {
                Diagnostic::error("MNOTE", message, file, stmt.range)
            }
            Some(level) if level >= 4 => {
                Diagnostic::warning("MNOTE", message, file, stmt.range)
            }
            _ => Diagnostic::info("MNOTE", message, file, stmt.range),
        };
        self.ctx.diags.add(diag, &stack);
    }

    // ----- machine instructions -----

    fn process_machine(
        &mut self,
        kind: InstrKind,
        stmt: Statement,
        snapshot: StreamSnapshot,
        file: &str,
    ) {
        let location = Location::new(file, stmt.range.start);
        let length = self.ctx.instruction_set().instr_length(kind);
        self.ctx
            .ord
            .align(2, location.clone(), &mut self.ctx.diags);

        self.define_ordinary_label(
            &stmt,
            SymbolAttributes::new(SymbolOrigin::MachineLabel)
                .with_type(b'I')
                .with_length(length),
            &snapshot,
            file,
        );

        let ops = self.parser.reparse_operands(self.ctx, &stmt.operands, OperandFormat::Mach, stmt.ops_range.start);
        let ops = self.substitute_models(ops, OperandFormat::Mach, file);
        self.record_expr_refs(&ops, file);

        let (name, classes): (String, &[crate::checking::CheckClass]) = match kind {
            InstrKind::Machine(index) => {
                let instr = self.ctx.instruction_set().machine(index);
                (instr.name.to_string(), instr.format.operands())
            }
            InstrKind::Mnemonic(index) => {
                let mnemo = self.ctx.instruction_set().mnemonic(index);
                (mnemo.name.to_string(), mnemo.operands)
            }
            _ => unreachable!("not a machine instruction"),
        };

        let present: Vec<&Operand> = ops.iter().filter(|op| !op.is_empty()).collect();
        if present.len() != classes.len() {
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add(
                Diagnostic::error(
                    "M012",
                    format!(
                        "{} expects {} operands, found {}",
                        name,
                        classes.len(),
                        present.len()
                    ),
                    file,
                    stmt.ops_range,
                ),
                &stack,
            );
        }

        let loctr = self
            .ctx
            .ord
            .current_reloc(location.clone(), &mut self.ctx.diags);
        for (op, &class) in present.iter().zip(classes.iter()) {
            let value = match op {
                Operand::Expr(expr, range) => {
                    let (outcome, faults) = self.ctx.ord.eval(expr, Some(&loctr));
                    match outcome {
                        OrdEval::Abs(value) => CheckValue::Abs(value),
                        OrdEval::Reloc(_) => CheckValue::Reloc,
                        OrdEval::Unresolved(_) => {
                            self.ctx.ord.postpone_check(
                                PostponedKind::MachOperand(class),
                                &name,
                                expr.clone(),
                                Some(loctr.clone()),
                                file,
                                *range,
                            );
                            continue;
                        }
                        OrdEval::Invalid => {
                            let stack = self.ctx.processing_frames();
                            for fault in &faults {
                                self.ctx.diags.add(fault.diagnostic(file, *range), &stack);
                            }
                            continue;
                        }
                    }
                }
                Operand::Complex(_, _) => CheckValue::Complex,
                _ => CheckValue::Unknown,
            };
            if let Some(diag) = check_operand(&name, class, &value, file, op.range()) {
                let stack = self.ctx.processing_frames();
                self.ctx.diags.add(diag, &stack);
            }
        }

        self.ctx
            .ord
            .advance(length as i32, location, &mut self.ctx.diags);
    }

    /// Defines the statement's label as an ordinary symbol at the current
    /// location, or records a sequence symbol instead.
    fn define_ordinary_label(
        &mut self,
        stmt: &Statement,
        attrs: SymbolAttributes,
        snapshot: &StreamSnapshot,
        file: &str,
    ) {
        if let LabelField::Sequence(name) = stmt.label {
            self.define_seq_symbol(name, stmt, snapshot, file);
            return;
        }
        let name = match self.label_name(stmt, file) {
            Some(name) => name,
            None => return,
        };
        let name_text = self.ctx.resolve_id(name).to_string();
        self.ctx
            .occurrences
            .add(SymKind::Ordinary, name, file, stmt.label_range, true);
        let location = Location::new(file, stmt.range.start);
        let value = self
            .ctx
            .ord
            .current_reloc(location.clone(), &mut self.ctx.diags);
        let symbol = Symbol {
            name,
            value: SymbolState::Resolved(SymbolValue::Reloc(value)),
            attrs,
            location,
        };
        let stack = self.ctx.processing_frames();
        self.ctx
            .ord
            .define_symbol(symbol, &name_text, &mut self.ctx.diags, &stack);
    }

    // ----- macro calls -----

    fn process_macro_call(
        &mut self,
        def: std::rc::Rc<crate::macros::MacroDefinition>,
        stmt: Statement,
        snapshot: StreamSnapshot,
        file: &str,
    ) {
        self.ctx
            .occurrences
            .add(SymKind::Macro, def.name, file, stmt.instr_range, false);

        let label = match &stmt.label {
            LabelField::Sequence(_) => {
                self.process_label_seq_or_empty(&stmt, &snapshot, file);
                None
            }
            _ => self
                .label_text(&stmt, file)
                .map(MacroParamData::Single),
        };

        let ops = self.parser.reparse_operands(self.ctx, &stmt.operands, OperandFormat::MacroArgs, stmt.ops_range.start);
        let mut args = Vec::new();
        for op in ops {
            match op {
                Operand::MacroArg {
                    keyword,
                    data,
                    range,
                } => {
                    let keyword_text = keyword
                        .map(|k| self.ctx.resolve_id(k).to_string())
                        .unwrap_or_default();
                    args.push(MacroArg {
                        keyword,
                        keyword_text,
                        data,
                        range,
                    });
                }
                Operand::Model(chain, range) => {
                    let text = {
                        let mut eval = CaEval::new(self.ctx, file, range);
                        eval.concatenate(&chain)
                    };
                    // Substitution may have produced keyword syntax.
                    match crate::macros::split_keyword(&text) {
                        Some((name, value)) => {
                            let keyword = self.ctx.add_id(name);
                            args.push(MacroArg {
                                keyword: Some(keyword),
                                keyword_text: name.to_string(),
                                data: crate::macros::string_to_macrodata(value),
                                range,
                            });
                        }
                        None => args.push(MacroArg {
                            keyword: None,
                            keyword_text: String::new(),
                            data: crate::macros::string_to_macrodata(&text),
                            range,
                        }),
                    }
                }
                Operand::Empty(range) => args.push(MacroArg {
                    keyword: None,
                    keyword_text: String::new(),
                    data: MacroParamData::empty(),
                    range,
                }),
                other => args.push(MacroArg {
                    keyword: None,
                    keyword_text: String::new(),
                    data: MacroParamData::empty(),
                    range: other.range(),
                }),
            }
        }

        debug!("entering macro {}", self.ctx.resolve_id(def.name));
        if !self.ctx.enter_macro(def, label, args, file) {
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add(
                Diagnostic::macro_nest_exceeded(file, stmt.range),
                &stack,
            );
            self.stopped = true;
        }
    }

    // ----- shared helpers -----

    /// Substitutes variable symbols in model operands and re-parses them
    /// with the same format.
    pub(super) fn substitute_models(
        &mut self,
        ops: Vec<Operand>,
        format: OperandFormat,
        file: &str,
    ) -> Vec<Operand> {
        if format == OperandFormat::MacroArgs
            || !ops.iter().any(|op| matches!(op, Operand::Model(_, _)))
        {
            return ops;
        }
        let mut result = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                Operand::Model(chain, range) => {
                    let text = {
                        let mut eval = CaEval::new(self.ctx, file, range);
                        eval.concatenate(&chain)
                    };
                    let reparsed = self.parser.reparse_operands(self.ctx, &text, format, range.start);
                    result.extend(reparsed);
                }
                other => result.push(other),
            }
        }
        result
    }

    /// Records ordinary-symbol references found in expression operands.
    fn record_expr_refs(&mut self, ops: &[Operand], file: &str) {
        let mut refs = Vec::new();
        for op in ops {
            if let Operand::Expr(expr, range) = op {
                let mut names = Vec::new();
                expr.ordinary_refs(&mut names);
                for name in names {
                    refs.push((name, *range));
                }
            }
        }
        for (name, range) in refs {
            self.ctx
                .occurrences
                .add(SymKind::Ordinary, name, file, range, false);
        }
    }
}

enum SizePart {
    KnownSize(i32),
    DeferredSize(Expr),
}
use SizePart::{DeferredSize as Deferred, KnownSize as Known};

impl SizePart {
    fn into_expr(self) -> Expr {
        match self {
            Known(value) => Expr::Num(value),
            Deferred(expr) => expr,
        }
    }
}

fn operand_expr(op: &Operand) -> Option<&Expr> {
    match op {
        Operand::CaExpr(expr, _) => Some(expr),
        Operand::CaBranch {
            condition: Some(expr),
            ..
        } => Some(expr),
        _ => None,
    }
}

fn expr_uses_loctr(expr: &Expr) -> bool {
    match expr {
        Expr::LocCtr => true,
        Expr::Unary(_, inner) => expr_uses_loctr(inner),
        Expr::Binary(_, lhs, rhs) => expr_uses_loctr(lhs) || expr_uses_loctr(rhs),
        _ => false,
    }
}

/// `I'` from type, length and scale for the numeric data types.
fn integer_attr(type_char: char, length: Option<u16>, scale: i16) -> i16 {
    let length = match length {
        Some(length) => length as i32,
        None => return 0,
    };
    let scale = scale as i32;
    let value = match type_char {
        'F' | 'H' => 8 * length - scale - 1,
        'P' => 2 * length - scale - 1,
        'Z' => length - scale,
        _ => 0,
    };
    value.max(0) as i16
}
