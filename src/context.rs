//! The HLASM context: owner of every table the analysis mutates.
//!
//! One context lives for one analysis unit. Library members fetched
//! during the run (external macros, COPY members) are analyzed against
//! the same context through a nested driver, which is why the source and
//! processing stacks live here rather than in the manager.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::copy::{CopyFrame, CopyMember};
use crate::diagnostics::{DiagnosticSink, RelatedLocation};
use crate::expression::{SetType, SetValue};
use crate::ids::{IdIndex, IdStorage};
use crate::instruction::{InstrKind, InstructionSet};
use crate::location::{Location, Position, Range};
use crate::lsp::OccurrenceStore;
use crate::macros::{MacroArg, MacroDefinition, MacroInvocation};
use crate::ordinary::OrdinaryContext;
use crate::variables::{MacroParamData, SetSymbol};

/// Macro recursion bound; HLASM itself is limited by storage only, but a
/// runaway recursive macro must not hang the analyzer.
const MACRO_NEST_LIMIT: usize = 100;

const DEFAULT_ACTR: i32 = 4096;

#[derive(Clone, Debug, Default)]
pub struct ContextOptions {
    pub sysparm: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingKind {
    Ordinary,
    MacroDef,
    Lookahead,
    Copy,
}

#[derive(Clone, Copy, Debug)]
pub struct ProcessingFrame {
    pub kind: ProcessingKind,
    pub owns_source: bool,
}

#[derive(Debug)]
pub struct SourceFrame {
    pub file: String,
    pub copy_stack: Vec<CopyFrame>,
}

/// Variable slot within a scope. Globals are stored once in the context
/// and referenced indirectly, matching GBLx sharing semantics.
#[derive(Debug)]
pub enum VarEntry {
    Local(SetSymbol),
    Global,
    /// Read-only system value rendered at scope entry.
    SysConst(SetValue),
    /// `&SYSMAC`: composite of scope names.
    SysData(MacroParamData),
    /// `&SYSLIST`: resolved against the invocation arguments.
    SysList,
}

#[derive(Clone, Debug)]
pub struct SeqSymbol {
    pub name: IdIndex,
    pub location: Location,
    pub snapshot: StreamSnapshot,
}

/// Where a statement stream stood when a sequence symbol was defined;
/// jumping restores it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamSnapshot {
    pub statement: usize,
    pub copy_stack: Vec<(IdIndex, usize)>,
}

#[derive(Debug)]
pub struct CodeScope {
    pub variables: HashMap<IdIndex, VarEntry>,
    pub seq_symbols: HashMap<IdIndex, SeqSymbol>,
    pub this_macro: Option<MacroInvocation>,
    pub branch_counter: i32,
}

impl CodeScope {
    fn new(invocation: Option<MacroInvocation>) -> CodeScope {
        CodeScope {
            variables: HashMap::new(),
            seq_symbols: HashMap::new(),
            this_macro: invocation,
            branch_counter: DEFAULT_ACTR,
        }
    }

    pub fn is_in_macro(&self) -> bool {
        self.this_macro.is_some()
    }
}

#[derive(Clone, Debug)]
pub enum OpcodeInfo {
    Instr(InstrKind),
    Macro(Rc<MacroDefinition>),
}

#[derive(Clone, Debug)]
enum OpsynEntry {
    Instr(InstrKind),
    Macro(Rc<MacroDefinition>),
    Deleted,
}

pub struct HlasmContext {
    ids: IdStorage,
    pub globals: HashMap<IdIndex, SetSymbol>,
    scope_stack: Vec<CodeScope>,
    source_stack: Vec<SourceFrame>,
    proc_stack: Vec<ProcessingFrame>,
    macros: HashMap<IdIndex, Rc<MacroDefinition>>,
    copy_members: HashMap<IdIndex, Rc<CopyMember>>,
    opsyn: HashMap<IdIndex, OpsynEntry>,
    pub ord: OrdinaryContext,
    instruction_set: InstructionSet,
    instr_map: HashMap<IdIndex, InstrKind>,
    sysndx: u32,
    pub diags: DiagnosticSink,
    pub occurrences: OccurrenceStore,
    fetched_libs: HashSet<IdIndex>,
    options: ContextOptions,
    sysdate: (i32, u32, u32),
    systime: (u32, u32),
}

impl HlasmContext {
    pub fn new(file_name: &str, options: ContextOptions) -> HlasmContext {
        HlasmContext::with_instruction_set(file_name, options, InstructionSet::new())
    }

    pub fn with_instruction_set(
        file_name: &str,
        options: ContextOptions,
        instruction_set: InstructionSet,
    ) -> HlasmContext {
        let mut ids = IdStorage::new();
        let mut instr_map = HashMap::new();
        let names: Vec<&'static str> = instruction_set.completion_names().collect();
        for name in names {
            let id = ids.add(name);
            if let Some(kind) = instruction_set.lookup(name) {
                instr_map.insert(id, kind);
            }
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut ctx = HlasmContext {
            ids,
            globals: HashMap::new(),
            scope_stack: vec![CodeScope::new(None)],
            source_stack: vec![SourceFrame {
                file: file_name.to_string(),
                copy_stack: Vec::new(),
            }],
            proc_stack: vec![ProcessingFrame {
                kind: ProcessingKind::Ordinary,
                owns_source: true,
            }],
            macros: HashMap::new(),
            copy_members: HashMap::new(),
            opsyn: HashMap::new(),
            ord: OrdinaryContext::new(),
            instruction_set,
            instr_map,
            sysndx: 0,
            diags: DiagnosticSink::new(),
            occurrences: OccurrenceStore::new(),
            fetched_libs: HashSet::new(),
            options,
            sysdate: civil_from_epoch(now),
            systime: ((now / 3600 % 24) as u32, (now / 60 % 60) as u32),
        };
        ctx.add_unit_system_vars();
        ctx
    }

    // ----- identifiers -----

    pub fn ids(&self) -> &IdStorage {
        &self.ids
    }

    pub fn add_id(&mut self, name: &str) -> IdIndex {
        self.ids.add(name)
    }

    pub fn resolve_id(&self, id: IdIndex) -> &str {
        self.ids.resolve(id)
    }

    // ----- scopes and variables -----

    pub fn is_in_macro(&self) -> bool {
        self.scope_stack.last().unwrap().is_in_macro()
    }

    pub fn curr_scope(&self) -> &CodeScope {
        self.scope_stack.last().unwrap()
    }

    pub fn curr_scope_mut(&mut self) -> &mut CodeScope {
        self.scope_stack.last_mut().unwrap()
    }

    pub fn scope_depth(&self) -> usize {
        self.scope_stack.len()
    }

    pub fn this_macro(&self) -> Option<&MacroInvocation> {
        self.scope_stack.last().unwrap().this_macro.as_ref()
    }

    pub fn this_macro_mut(&mut self) -> Option<&mut MacroInvocation> {
        self.scope_stack.last_mut().unwrap().this_macro.as_mut()
    }

    /// Searches the current scope, the invocation parameters, then the
    /// globals declared in this scope.
    pub fn lookup_var(&self, name: IdIndex) -> Option<VarSlot<'_>> {
        let scope = self.curr_scope();
        match scope.variables.get(&name) {
            Some(VarEntry::Local(symbol)) => return Some(VarSlot::Set(symbol)),
            Some(VarEntry::Global) => {
                return self.globals.get(&name).map(VarSlot::Set);
            }
            Some(VarEntry::SysConst(value)) => return Some(VarSlot::Const(value)),
            Some(VarEntry::SysData(data)) => return Some(VarSlot::Data(data)),
            Some(VarEntry::SysList) => {
                return scope.this_macro.as_ref().map(VarSlot::SysList);
            }
            None => {}
        }
        if let Some(invocation) = &scope.this_macro {
            if let Some(data) = invocation.named.get(&name) {
                return Some(VarSlot::Data(data));
            }
        }
        None
    }

    pub fn var_exists(&self, name: IdIndex) -> bool {
        self.lookup_var(name).is_some()
    }

    /// LCLx/GBLx declaration. Redeclaration with a matching shape is
    /// silent; a shape or type conflict is diagnosed.
    pub fn declare_var(
        &mut self,
        name: IdIndex,
        set_type: SetType,
        scalar: bool,
        global: bool,
        file: &str,
        range: Range,
    ) {
        let name_text = self.ids.resolve(name).to_string();
        let stack = self.processing_frames();
        if global {
            let entry = self
                .globals
                .entry(name)
                .or_insert_with(|| SetSymbol::new(name, set_type, scalar));
            if entry.set_type != set_type || entry.scalar != scalar {
                self.diags.add(
                    crate::diagnostics::Diagnostic::set_symbol_mismatch(&name_text, file, range),
                    &stack,
                );
                return;
            }
            self.curr_scope_mut().variables.insert(name, VarEntry::Global);
        } else {
            let scope = self.curr_scope_mut();
            match scope.variables.get(&name) {
                None => {
                    scope
                        .variables
                        .insert(name, VarEntry::Local(SetSymbol::new(name, set_type, scalar)));
                }
                Some(VarEntry::Local(existing))
                    if existing.set_type == set_type && existing.scalar == scalar => {}
                Some(_) => {
                    self.diags.add(
                        crate::diagnostics::Diagnostic::set_symbol_mismatch(
                            &name_text, file, range,
                        ),
                        &stack,
                    );
                }
            }
        }
    }

    /// SETx assignment with auto-declaration. The value must already be
    /// coerced to the instruction's type.
    pub fn set_var(
        &mut self,
        name: IdIndex,
        index: Option<usize>,
        value: SetValue,
        file: &str,
        range: Range,
    ) {
        let name_text = self.ids.resolve(name).to_string();
        let stack = self.processing_frames();
        let set_type = value.type_of();

        if name_text.starts_with("SYS") {
            self.diags.add(
                crate::diagnostics::Diagnostic::set_symbol_mismatch(&name_text, file, range),
                &stack,
            );
            return;
        }

        // Figure out which table holds the variable.
        enum Place {
            Local,
            Global,
            Readonly,
            Absent,
        }
        let place = match self.curr_scope().variables.get(&name) {
            Some(VarEntry::Local(_)) => Place::Local,
            Some(VarEntry::Global) => Place::Global,
            Some(_) => Place::Readonly,
            None => {
                if self
                    .this_macro()
                    .map(|invocation| invocation.named.contains_key(&name))
                    .unwrap_or(false)
                {
                    Place::Readonly
                } else {
                    Place::Absent
                }
            }
        };

        let mismatch_diag =
            crate::diagnostics::Diagnostic::set_symbol_mismatch(&name_text, file, range);
        match place {
            Place::Readonly => {
                self.diags.add(mismatch_diag, &stack);
            }
            Place::Absent => {
                let mut symbol = SetSymbol::new(name, set_type, index.is_none());
                symbol.set(index, value);
                self.curr_scope_mut()
                    .variables
                    .insert(name, VarEntry::Local(symbol));
            }
            Place::Local | Place::Global => {
                let is_global = matches!(place, Place::Global);
                let (found_type, found_scalar) = {
                    let symbol = if is_global {
                        self.globals.get(&name).unwrap()
                    } else {
                        match self.curr_scope().variables.get(&name) {
                            Some(VarEntry::Local(symbol)) => symbol,
                            _ => unreachable!(),
                        }
                    };
                    (symbol.set_type, symbol.scalar)
                };
                if found_type != set_type
                    || (found_scalar && index.is_some())
                    || (!found_scalar && index.is_none())
                {
                    self.diags.add(mismatch_diag, &stack);
                    return;
                }
                let symbol = if is_global {
                    self.globals.get_mut(&name).unwrap()
                } else {
                    match self.curr_scope_mut().variables.get_mut(&name) {
                        Some(VarEntry::Local(symbol)) => symbol,
                        _ => unreachable!(),
                    }
                };
                symbol.set(index, value);
            }
        }
    }

    // ----- sequence symbols -----

    pub fn add_opencode_seq_symbol(&mut self, symbol: SeqSymbol) -> bool {
        let scope = &mut self.scope_stack[0];
        if scope.seq_symbols.contains_key(&symbol.name) {
            return false;
        }
        scope.seq_symbols.insert(symbol.name, symbol);
        true
    }

    pub fn opencode_seq_snapshot(&self, name: IdIndex) -> Option<&StreamSnapshot> {
        self.scope_stack[0]
            .seq_symbols
            .get(&name)
            .map(|symbol| &symbol.snapshot)
    }

    /// Resolves a sequence symbol in the active scope: the macro body
    /// label table when expanding, the open-code table otherwise.
    pub fn get_seq_symbol(&self, name: IdIndex) -> Option<StreamSnapshot> {
        if let Some(invocation) = self.this_macro() {
            return invocation
                .def
                .labels
                .get(&name)
                .map(|&statement| StreamSnapshot {
                    statement,
                    copy_stack: Vec::new(),
                });
        }
        self.scope_stack[0]
            .seq_symbols
            .get(&name)
            .map(|symbol| symbol.snapshot.clone())
    }

    // ----- branch counter -----

    pub fn set_branch_counter(&mut self, value: i32) {
        self.curr_scope_mut().branch_counter = value;
    }

    pub fn branch_counter(&self) -> i32 {
        self.curr_scope().branch_counter
    }

    pub fn decrement_branch_counter(&mut self) {
        self.curr_scope_mut().branch_counter -= 1;
    }

    // ----- opcodes, OPSYN -----

    pub fn get_operation_code(&self, name: IdIndex) -> Option<OpcodeInfo> {
        match self.opsyn.get(&name) {
            Some(OpsynEntry::Deleted) => return None,
            Some(OpsynEntry::Instr(kind)) => return Some(OpcodeInfo::Instr(*kind)),
            Some(OpsynEntry::Macro(def)) => return Some(OpcodeInfo::Macro(Rc::clone(def))),
            None => {}
        }
        if let Some(def) = self.macros.get(&name) {
            return Some(OpcodeInfo::Macro(Rc::clone(def)));
        }
        self.instr_map.get(&name).map(|kind| OpcodeInfo::Instr(*kind))
    }

    /// `A OPSYN B`: binds A to B's current meaning (value, not alias).
    pub fn add_opsyn(&mut self, alias: IdIndex, target: IdIndex) -> bool {
        let entry = match self.get_operation_code(target) {
            Some(OpcodeInfo::Instr(kind)) => OpsynEntry::Instr(kind),
            Some(OpcodeInfo::Macro(def)) => OpsynEntry::Macro(def),
            None => return false,
        };
        self.opsyn.insert(alias, entry);
        true
    }

    /// `A OPSYN` with no operand deletes A.
    pub fn remove_opsyn(&mut self, alias: IdIndex) -> bool {
        if self.get_operation_code(alias).is_none() {
            return false;
        }
        self.opsyn.insert(alias, OpsynEntry::Deleted);
        true
    }

    /// `O'` attribute of a name.
    pub fn opcode_attr(&self, name: IdIndex) -> char {
        match self.get_operation_code(name) {
            Some(OpcodeInfo::Macro(_)) => 'M',
            Some(OpcodeInfo::Instr(kind)) => match kind {
                InstrKind::Assembler(_) | InstrKind::Ca(_) => 'A',
                InstrKind::Mnemonic(_) => 'E',
                InstrKind::Machine(_) => 'O',
            },
            None => 'U',
        }
    }

    pub fn instruction_set(&self) -> &InstructionSet {
        &self.instruction_set
    }

    // ----- macros -----

    pub fn add_macro(&mut self, def: MacroDefinition) -> Rc<MacroDefinition> {
        let name = def.name;
        let def = Rc::new(def);
        self.macros.insert(name, Rc::clone(&def));
        def
    }

    pub fn macros(&self) -> &HashMap<IdIndex, Rc<MacroDefinition>> {
        &self.macros
    }

    pub fn get_macro(&self, name: IdIndex) -> Option<Rc<MacroDefinition>> {
        match self.get_operation_code(name) {
            Some(OpcodeInfo::Macro(def)) => Some(def),
            _ => None,
        }
    }

    /// Binds arguments and pushes a macro scope. Returns false when the
    /// nesting limit is hit; the caller reports the diagnostic site.
    pub fn enter_macro(
        &mut self,
        def: Rc<MacroDefinition>,
        label: Option<MacroParamData>,
        args: Vec<MacroArg>,
        file: &str,
    ) -> bool {
        if self.scope_stack.len() > MACRO_NEST_LIMIT {
            return false;
        }
        self.sysndx += 1;
        let sysndx = self.sysndx;
        let stack = self.processing_frames();
        let invocation = def.call(label, args, sysndx, file, &stack, &mut self.diags);
        self.scope_stack.push(CodeScope::new(Some(invocation)));
        self.add_macro_system_vars();
        true
    }

    pub fn leave_macro(&mut self) {
        debug_assert!(self.is_in_macro());
        self.scope_stack.pop();
    }

    // ----- copy members -----

    pub fn add_copy_member(&mut self, member: CopyMember) {
        self.copy_members.insert(member.name, Rc::new(member));
    }

    pub fn copy_members(&self) -> &HashMap<IdIndex, Rc<CopyMember>> {
        &self.copy_members
    }

    pub fn get_copy_member(&self, name: IdIndex) -> Option<Rc<CopyMember>> {
        self.copy_members.get(&name).map(Rc::clone)
    }

    /// Pushes a copy frame onto the active stream's copy stack, or onto
    /// the top source frame directly for a library-driven analysis that
    /// must not touch an enclosing macro expansion. Fails on
    /// self-inclusion.
    pub fn enter_copy_member(&mut self, name: IdIndex, at_top_source: bool) -> Result<(), ()> {
        let member = match self.copy_members.get(&name) {
            Some(member) => Rc::clone(member),
            None => return Err(()),
        };
        let stack = if at_top_source {
            self.top_source_copy_stack()
        } else {
            self.current_copy_stack()
        };
        if stack.iter().any(|f| f.member == name) {
            return Err(());
        }
        let frame = CopyFrame::enter(&member);
        if at_top_source {
            self.top_source_copy_stack_mut().push(frame);
        } else {
            self.current_copy_stack_mut().push(frame);
        }
        Ok(())
    }

    pub fn top_source_copy_stack(&self) -> &[CopyFrame] {
        &self.source_stack.last().unwrap().copy_stack
    }

    pub fn top_source_copy_stack_mut(&mut self) -> &mut Vec<CopyFrame> {
        &mut self.source_stack.last_mut().unwrap().copy_stack
    }

    pub fn current_copy_stack(&self) -> &[CopyFrame] {
        if let Some(invocation) = self.this_macro() {
            &invocation.copy_stack
        } else {
            &self.source_stack.last().unwrap().copy_stack
        }
    }

    pub fn current_copy_stack_mut(&mut self) -> &mut Vec<CopyFrame> {
        if self.is_in_macro() {
            &mut self
                .scope_stack
                .last_mut()
                .unwrap()
                .this_macro
                .as_mut()
                .unwrap()
                .copy_stack
        } else {
            &mut self.source_stack.last_mut().unwrap().copy_stack
        }
    }

    pub fn whole_copy_stack(&self) -> Vec<IdIndex> {
        let mut result = Vec::new();
        for frame in &self.source_stack {
            result.extend(frame.copy_stack.iter().map(|f| f.member));
        }
        for scope in &self.scope_stack {
            if let Some(invocation) = &scope.this_macro {
                result.extend(invocation.copy_stack.iter().map(|f| f.member));
            }
        }
        result
    }

    // ----- source and processing stacks -----

    pub fn current_file(&self) -> &str {
        &self.source_stack.last().unwrap().file
    }

    pub fn opencode_file(&self) -> &str {
        &self.source_stack[0].file
    }

    pub fn push_processing(&mut self, kind: ProcessingKind, file: Option<String>) {
        let owns_source = file.is_some();
        if let Some(file) = file {
            self.source_stack.push(SourceFrame {
                file,
                copy_stack: Vec::new(),
            });
        }
        self.proc_stack.push(ProcessingFrame { kind, owns_source });
    }

    pub fn pop_processing(&mut self) {
        let frame = self.proc_stack.pop().expect("processing stack underflow");
        if frame.owns_source {
            self.source_stack.pop();
        }
    }

    pub fn processing_kind(&self) -> ProcessingKind {
        self.proc_stack.last().unwrap().kind
    }

    /// Related locations for diagnostics: one per active macro invocation
    /// and one per copy frame, outermost first.
    pub fn processing_frames(&self) -> Vec<RelatedLocation> {
        let mut frames = Vec::new();
        for scope in self.scope_stack.iter().skip(1) {
            if let Some(invocation) = &scope.this_macro {
                let line = invocation.def.location.pos.line + invocation.current_statement as u32;
                frames.push(RelatedLocation {
                    location: Location::new(
                        invocation.def.location.file.clone(),
                        Position::new(line, 0),
                    ),
                    message: format!(
                        "while expanding macro {}",
                        self.ids.resolve(invocation.def.name)
                    ),
                });
            }
        }
        for frame in &self.source_stack {
            for copy in &frame.copy_stack {
                frames.push(RelatedLocation {
                    location: Location::new(copy.file.clone(), Position::new(0, 0)),
                    message: format!(
                        "while including COPY member {}",
                        self.ids.resolve(copy.member)
                    ),
                });
            }
        }
        frames
    }

    /// Runs the end-of-analysis resolution pass of the ordinary context.
    pub fn finalize_ordinary(&mut self) {
        self.ord.finalize(&self.ids, &mut self.diags);
    }

    // ----- editor queries -----

    /// Definition site of the symbol under the cursor.
    pub fn definition(&self, file: &str, pos: Position) -> Option<Location> {
        let occurrence = self.occurrences.at(file, pos)?;
        let def = self.occurrences.definition(occurrence.kind, occurrence.name)?;
        Some(Location::new(def.file.clone(), def.range.start))
    }

    /// Every recorded occurrence of the symbol under the cursor.
    pub fn references(&self, file: &str, pos: Position) -> Vec<Location> {
        match self.occurrences.at(file, pos) {
            Some(occurrence) => self
                .occurrences
                .references(occurrence.kind, occurrence.name)
                .into_iter()
                .map(|occ| Location::new(occ.file.clone(), occ.range.start))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Hover text for the symbol under the cursor.
    pub fn hover(&self, file: &str, pos: Position) -> Option<String> {
        use crate::lsp::SymKind;
        use crate::symbol::{SymbolState, SymbolValue};

        let occurrence = self.occurrences.at(file, pos)?;
        let name = self.ids.resolve(occurrence.name);
        match occurrence.kind {
            SymKind::Ordinary => {
                let symbol = self.ord.get_symbol(occurrence.name)?;
                let value = match &symbol.value {
                    SymbolState::Resolved(SymbolValue::Abs(value)) => format!("= {}", value),
                    SymbolState::Resolved(SymbolValue::Reloc(_)) => "relocatable".to_string(),
                    SymbolState::Pending => "unresolved".to_string(),
                };
                Some(format!(
                    "{} {}  L:{} T:{}",
                    name,
                    value,
                    symbol.attrs.length_or_default(),
                    symbol.attrs.type_attr as char,
                ))
            }
            SymKind::Macro => {
                let def = self.macros.get(&occurrence.name)?;
                let mut text = format!("macro {}", name);
                if !def.documentation.is_empty() {
                    text.push('\n');
                    text.push_str(&def.documentation);
                }
                Some(text)
            }
            SymKind::Variable => Some(format!("&{}", name)),
            SymKind::Sequence => Some(format!(".{}", name)),
            SymKind::CopyMember => Some(format!("COPY member {}", name)),
        }
    }

    /// Completion candidates for a lexical trigger. The opcode catalogue
    /// is the union of instruction names and user-defined macros.
    pub fn complete(&self, trigger: crate::lsp::CompletionTrigger) -> Vec<String> {
        use crate::lsp::CompletionTrigger;
        let mut result: Vec<String> = match trigger {
            CompletionTrigger::Opcode => self
                .instruction_set
                .completion_names()
                .map(str::to_string)
                .chain(self.macros.keys().map(|&id| self.ids.resolve(id).to_string()))
                .collect(),
            CompletionTrigger::Variable => self
                .globals
                .keys()
                .chain(self.scope_stack[0].variables.keys())
                .map(|&id| format!("&{}", self.ids.resolve(id)))
                .collect(),
            CompletionTrigger::Sequence => self.scope_stack[0]
                .seq_symbols
                .keys()
                .map(|&id| format!(".{}", self.ids.resolve(id)))
                .collect(),
        };
        result.sort();
        result.dedup();
        result
    }

    // ----- library bookkeeping -----

    pub fn mark_fetch_attempted(&mut self, name: IdIndex) -> bool {
        self.fetched_libs.insert(name)
    }

    // ----- system variables -----

    pub fn sysndx(&self) -> u32 {
        self.sysndx
    }

    fn add_unit_system_vars(&mut self) {
        let (year, month, day) = self.sysdate;
        let (hour, minute) = self.systime;
        let sysparm = self.options.sysparm.clone().unwrap_or_default();

        let vars = [
            ("SYSPARM", sysparm),
            (
                "SYSDATE",
                format!("{:02}/{:02}/{:02}", month, day, year % 100),
            ),
            ("SYSDATC", format!("{:04}{:02}{:02}", year, month, day)),
            ("SYSTIME", format!("{:02}:{:02}", hour, minute)),
        ];
        for (name, value) in vars {
            let id = self.ids.add(name);
            self.scope_stack[0]
                .variables
                .insert(id, VarEntry::SysConst(SetValue::C(value)));
        }
    }

    /// Populates `&SYSNDX`, `&SYSECT`, `&SYSLOC`, `&SYSSTYP`, `&SYSNEST`,
    /// `&SYSMAC` and `&SYSLIST` for a freshly entered macro scope.
    fn add_macro_system_vars(&mut self) {
        let sysect = self
            .ord
            .current_section()
            .map(|section| self.ids.resolve(section.name).to_string())
            .unwrap_or_default();
        let sysstyp = self
            .ord
            .current_section()
            .map(|section| section.kind.styp().to_string())
            .unwrap_or_default();
        let sysloc = self
            .ord
            .current_loctr_name()
            .map(|name| self.ids.resolve(name).to_string())
            .unwrap_or_else(|| sysect.clone());
        let sysndx = format!("{:04}", self.sysndx);
        let sysnest = (self.scope_stack.len() - 1) as i32;

        let mut sysmac = Vec::new();
        for scope in self.scope_stack.iter().rev() {
            match &scope.this_macro {
                Some(invocation) => sysmac.push(MacroParamData::Single(
                    self.ids.resolve(invocation.def.name).to_string(),
                )),
                None => sysmac.push(MacroParamData::Single("OPEN CODE".to_string())),
            }
        }

        let entries = [
            ("SYSNDX", VarEntry::SysConst(SetValue::C(sysndx))),
            ("SYSECT", VarEntry::SysConst(SetValue::C(sysect))),
            ("SYSSTYP", VarEntry::SysConst(SetValue::C(sysstyp))),
            ("SYSLOC", VarEntry::SysConst(SetValue::C(sysloc))),
            ("SYSNEST", VarEntry::SysConst(SetValue::A(sysnest))),
            ("SYSMAC", VarEntry::SysData(MacroParamData::Composite(sysmac))),
            ("SYSLIST", VarEntry::SysList),
        ];
        let unit_vars = ["SYSPARM", "SYSDATE", "SYSDATC", "SYSTIME"];

        for (name, entry) in entries {
            let id = self.ids.add(name);
            self.curr_scope_mut().variables.insert(id, entry);
        }
        for name in unit_vars {
            let id = self.ids.add(name);
            if let Some(VarEntry::SysConst(value)) = self.scope_stack[0].variables.get(&id) {
                let value = value.clone();
                self.curr_scope_mut()
                    .variables
                    .insert(id, VarEntry::SysConst(value));
            }
        }
    }
}

pub enum VarSlot<'a> {
    Set(&'a SetSymbol),
    Const(&'a SetValue),
    Data(&'a MacroParamData),
    SysList(&'a MacroInvocation),
}

/// Civil date from an epoch second count (Gregorian, UTC).
fn civil_from_epoch(secs: u64) -> (i32, u32, u32) {
    let days = (secs / 86400) as i64;
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if month <= 2 { year + 1 } else { year };
    (year as i32, month, day)
}
