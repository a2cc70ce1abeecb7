//! Ordinary assembly state: sections, location counters, the symbol table
//! and the forward-reference solver.
//!
//! Addresses are modeled with *spaces*. Every location counter starts with
//! one space; a data definition whose byte size cannot be computed yet
//! freezes the current space and opens a new one behind an unresolved
//! *gap*. Symbol values keep their space terms forever; reads normalize
//! them against whatever has been resolved so far, so subtracting two
//! addresses becomes absolute exactly when enough structure is known.
//!
//! Forward references (EQU chains, deferred DC lengths, gaps) live in a
//! pending list. Every new definition re-runs the solver; a pending whose
//! dependencies transitively include itself is a definition cycle, which
//! is diagnosed once and broken by defaulting every member (zero for
//! values, one for lengths and gaps). Location counter bases are assigned
//! in a finalization pass at the end of the analysis, after which the
//! remaining pendings either resolve or are diagnosed as undefined.

use std::collections::{HashMap, HashSet};

use crate::checking::{check_displacement, check_operand, CheckClass, CheckValue};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::expression::{AttrKind, AttrTarget, BinOp, Expr, UnOp};
use crate::ids::{IdIndex, IdStorage};
use crate::location::{Location, Range};
use crate::symbol::{
    RelocValue, SpaceId, Symbol, SymbolAttributes, SymbolOrigin, SymbolState, SymbolValue,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SectionId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoctrId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GapId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionKind {
    Executable,
    ReadOnly,
    Dummy,
    Common,
}

impl SectionKind {
    pub fn styp(self) -> &'static str {
        match self {
            SectionKind::Executable => "CSECT",
            SectionKind::ReadOnly => "RSECT",
            SectionKind::Dummy => "DSECT",
            SectionKind::Common => "COM",
        }
    }
}

#[derive(Debug)]
pub struct Section {
    pub name: IdIndex,
    pub kind: SectionKind,
    pub loctrs: Vec<LoctrId>,
    cur_loctr: LoctrId,
}

#[derive(Debug)]
pub struct Loctr {
    pub name: IdIndex,
    pub section: SectionId,
    spaces: Vec<SpaceId>,
    base: Option<i32>,
}

#[derive(Debug)]
struct Space {
    loctr: LoctrId,
    /// Offset of this space within its location counter; the first space
    /// sits at zero, later ones behind a gap.
    start: Option<i32>,
    /// (predecessor space, predecessor offset at freeze, separating gap)
    pred: Option<(SpaceId, i32, GapId)>,
    cur: i32,
    extent: i32,
}

#[derive(Debug)]
struct Gap {
    resolved: Option<i32>,
}

/// What an unresolved expression is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepKey {
    Value(IdIndex),
    Length(IdIndex),
    Space(SpaceId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingTarget {
    Value(IdIndex),
    Length(IdIndex),
    Gap(GapId, SpaceId),
}

#[derive(Clone, Debug)]
struct Pending {
    target: PendingTarget,
    name: IdIndex,
    expr: Expr,
    loctr_snapshot: Option<RelocValue>,
    file: String,
    range: Range,
}

#[derive(Clone, Copy, Debug)]
pub enum PostponedKind {
    MachOperand(CheckClass),
    DataDisplacement,
}

#[derive(Clone, Debug)]
struct PostponedCheck {
    kind: PostponedKind,
    instr: String,
    expr: Expr,
    loctr_snapshot: Option<RelocValue>,
    file: String,
    range: Range,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OrdEval {
    Abs(i32),
    Reloc(RelocValue),
    Unresolved(Vec<DepKey>),
    Invalid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrdFault {
    DivZero,
    InvalidReloc,
    AbsRequired,
    NotOrdinary,
}

impl OrdFault {
    pub fn diagnostic(self, file: &str, range: Range) -> Diagnostic {
        match self {
            OrdFault::DivZero => Diagnostic::division_by_zero(file, range),
            OrdFault::InvalidReloc => Diagnostic::invalid_relocatable_arithmetic(file, range),
            OrdFault::AbsRequired => Diagnostic::absolute_value_required(file, range),
            OrdFault::NotOrdinary => Diagnostic::invalid_operand("expression", file, range),
        }
    }
}

#[derive(Debug, Default)]
pub struct OrdinaryContext {
    pub symbols: HashMap<IdIndex, Symbol>,
    sections: Vec<Section>,
    loctrs: Vec<Loctr>,
    spaces: Vec<Space>,
    gaps: Vec<Gap>,
    section_index: HashMap<IdIndex, SectionId>,
    loctr_index: HashMap<IdIndex, LoctrId>,
    active_section: Option<SectionId>,
    pending: Vec<Pending>,
    postponed: Vec<PostponedCheck>,
    /// Attributes discovered by lookahead for symbols that are not yet
    /// (or never will be) defined.
    pub attr_cache: HashMap<IdIndex, SymbolAttributes>,
    finalized: bool,
}

impl OrdinaryContext {
    pub fn new() -> OrdinaryContext {
        OrdinaryContext::default()
    }

    // ----- sections and location counters -----

    pub fn symbol_defined(&self, name: IdIndex) -> bool {
        self.symbols.contains_key(&name)
    }

    pub fn get_symbol(&self, name: IdIndex) -> Option<&Symbol> {
        self.symbols.get(&name)
    }

    pub fn section_defined(&self, name: IdIndex, kind: SectionKind) -> bool {
        self.section_index
            .get(&name)
            .map(|&id| self.sections[id.0 as usize].kind == kind)
            .unwrap_or(false)
    }

    pub fn current_section(&self) -> Option<&Section> {
        self.active_section.map(|id| &self.sections[id.0 as usize])
    }

    pub fn current_loctr_name(&self) -> Option<IdIndex> {
        let section = self.current_section()?;
        Some(self.loctrs[section.cur_loctr.0 as usize].name)
    }

    /// Starts or resumes a section. The section label becomes an ordinary
    /// symbol of type `J`. A name reused with a different section kind is
    /// diagnosed and the statement otherwise ignored.
    pub fn set_section(
        &mut self,
        name: IdIndex,
        name_text: &str,
        kind: SectionKind,
        location: Location,
        diags: &mut DiagnosticSink,
    ) {
        if let Some(&id) = self.section_index.get(&name) {
            if self.sections[id.0 as usize].kind != kind {
                diags.add(
                    Diagnostic::already_defined(
                        "section",
                        name_text,
                        &location.file,
                        Range::line(location.pos.line, location.pos.col, location.pos.col + 1),
                    ),
                    &[],
                );
                return;
            }
            self.active_section = Some(id);
            return;
        }

        let section_id = SectionId(self.sections.len() as u32);
        let loctr_id = self.new_loctr(name, section_id);
        self.sections.push(Section {
            name,
            kind,
            loctrs: vec![loctr_id],
            cur_loctr: loctr_id,
        });
        self.section_index.insert(name, section_id);
        self.active_section = Some(section_id);

        if !name.is_empty() && !self.symbols.contains_key(&name) {
            let space = self.loctrs[loctr_id.0 as usize].spaces[0];
            self.symbols.insert(
                name,
                Symbol {
                    name,
                    value: SymbolState::Resolved(SymbolValue::Reloc(RelocValue::from_space(
                        space, 0,
                    ))),
                    attrs: SymbolAttributes::new(SymbolOrigin::Section)
                        .with_type(b'J')
                        .with_length(1),
                    location,
                },
            );
        }
        self.solve(diags);
    }

    /// Switches to a location counter. Names are unit-global: resuming a
    /// counter also resumes the section that owns it.
    pub fn set_loctr(&mut self, name: IdIndex, location: Location, diags: &mut DiagnosticSink) {
        if let Some(&id) = self.loctr_index.get(&name) {
            let section = self.loctrs[id.0 as usize].section;
            self.active_section = Some(section);
            self.sections[section.0 as usize].cur_loctr = id;
            return;
        }

        self.ensure_section(location.clone(), diags);
        let section_id = self.active_section.unwrap();
        let loctr_id = self.new_loctr(name, section_id);
        let section = &mut self.sections[section_id.0 as usize];
        section.loctrs.push(loctr_id);
        section.cur_loctr = loctr_id;

        if !name.is_empty() && !self.symbols.contains_key(&name) {
            let space = self.loctrs[loctr_id.0 as usize].spaces[0];
            self.symbols.insert(
                name,
                Symbol {
                    name,
                    value: SymbolState::Resolved(SymbolValue::Reloc(RelocValue::from_space(
                        space, 0,
                    ))),
                    attrs: SymbolAttributes::new(SymbolOrigin::Section)
                        .with_type(b'J')
                        .with_length(1),
                    location,
                },
            );
        }
        self.solve(diags);
    }

    fn new_loctr(&mut self, name: IdIndex, section: SectionId) -> LoctrId {
        let loctr_id = LoctrId(self.loctrs.len() as u32);
        let space_id = SpaceId(self.spaces.len() as u32);
        self.spaces.push(Space {
            loctr: loctr_id,
            start: Some(0),
            pred: None,
            cur: 0,
            extent: 0,
        });
        self.loctrs.push(Loctr {
            name,
            section,
            spaces: vec![space_id],
            base: None,
        });
        self.loctr_index.insert(name, loctr_id);
        loctr_id
    }

    /// Private unnamed section created on the first statement that needs
    /// a location counter without any CSECT in effect.
    fn ensure_section(&mut self, location: Location, diags: &mut DiagnosticSink) {
        if self.active_section.is_none() {
            self.set_section(
                IdIndex::EMPTY,
                "",
                SectionKind::Executable,
                location,
                diags,
            );
        }
    }

    fn active_space(&self) -> Option<SpaceId> {
        let section = self.current_section()?;
        let loctr = &self.loctrs[section.cur_loctr.0 as usize];
        loctr.spaces.last().copied()
    }

    /// The value of `*`.
    pub fn current_reloc(&mut self, location: Location, diags: &mut DiagnosticSink) -> RelocValue {
        self.ensure_section(location, diags);
        let space = self.active_space().unwrap();
        RelocValue::from_space(space, self.spaces[space.0 as usize].cur)
    }

    pub fn align(&mut self, boundary: i32, location: Location, diags: &mut DiagnosticSink) {
        self.ensure_section(location, diags);
        if boundary > 1 {
            let space = self.active_space().unwrap();
            let space = &mut self.spaces[space.0 as usize];
            space.cur = (space.cur + boundary - 1) / boundary * boundary;
            space.extent = space.extent.max(space.cur);
        }
    }

    pub fn advance(&mut self, bytes: i32, location: Location, diags: &mut DiagnosticSink) {
        self.ensure_section(location, diags);
        let space = self.active_space().unwrap();
        let space = &mut self.spaces[space.0 as usize];
        space.cur += bytes.max(0);
        space.extent = space.extent.max(space.cur);
    }

    /// `ORG expr` rebinds the active offset; `ORG` with no expression
    /// rewinds to the high-water mark of the active space.
    pub fn org(&mut self, target: Option<OrdEval>, location: Location, diags: &mut DiagnosticSink) {
        self.ensure_section(location.clone(), diags);
        let space_id = self.active_space().unwrap();
        let new_cur = match target {
            None => Some(self.spaces[space_id.0 as usize].extent),
            Some(OrdEval::Abs(value)) => {
                let start = self.spaces[space_id.0 as usize].start.unwrap_or(0);
                Some((value - start).max(0))
            }
            Some(OrdEval::Reloc(reloc)) => {
                let normalized = self.normalize(&reloc);
                match normalized.terms.as_slice() {
                    [(space, 1)] if *space == self.canonical_space(space_id) => {
                        let delta = self.canonical_delta(space_id);
                        Some((normalized.offset - delta).max(0))
                    }
                    _ => None,
                }
            }
            Some(_) => None,
        };
        match new_cur {
            Some(cur) => {
                let space = &mut self.spaces[space_id.0 as usize];
                space.cur = cur;
                space.extent = space.extent.max(cur);
            }
            None => diags.add(
                Diagnostic::invalid_operand(
                    "ORG",
                    &location.file,
                    Range::line(location.pos.line, location.pos.col, location.pos.col + 3),
                ),
                &[],
            ),
        }
    }

    /// Freezes the active space behind an unresolved byte count and opens
    /// a new one. Statements that follow address into the new space.
    pub fn start_gap(
        &mut self,
        size_expr: Expr,
        name: IdIndex,
        name_text: &str,
        loctr_snapshot: Option<RelocValue>,
        file: &str,
        range: Range,
        diags: &mut DiagnosticSink,
    ) {
        let prev_id = self.active_space().expect("gap requires an active section");
        let gap_id = GapId(self.gaps.len() as u32);
        self.gaps.push(Gap { resolved: None });

        let loctr_id = self.spaces[prev_id.0 as usize].loctr;
        let frozen_at = self.spaces[prev_id.0 as usize].cur;
        let space_id = SpaceId(self.spaces.len() as u32);
        self.spaces.push(Space {
            loctr: loctr_id,
            start: None,
            pred: Some((prev_id, frozen_at, gap_id)),
            cur: 0,
            extent: 0,
        });
        self.loctrs[loctr_id.0 as usize].spaces.push(space_id);

        self.add_pending(
            PendingTarget::Gap(gap_id, space_id),
            name,
            name_text,
            size_expr,
            loctr_snapshot,
            file,
            range,
            diags,
        );
    }

    // ----- value normalization -----

    /// Folds a space term as far as current knowledge allows: across
    /// resolved gaps to the head of the location counter, and across
    /// assigned counter bases to the head of the section.
    fn canonical_space(&self, space: SpaceId) -> SpaceId {
        let (folded, _) = self.fold_space(space);
        folded
    }

    fn canonical_delta(&self, space: SpaceId) -> i32 {
        let (_, delta) = self.fold_space(space);
        delta
    }

    fn fold_space(&self, mut space: SpaceId) -> (SpaceId, i32) {
        let mut delta = 0;
        loop {
            let s = &self.spaces[space.0 as usize];
            match (s.pred, s.start) {
                (Some((pred, frozen_at, gap)), _) => {
                    if let Some(len) = self.gaps[gap.0 as usize].resolved {
                        delta += frozen_at + len;
                        space = pred;
                        continue;
                    }
                    return (space, delta);
                }
                (None, _) => {
                    // Head space of its counter; fold across the counter
                    // base once assigned.
                    let loctr = &self.loctrs[s.loctr.0 as usize];
                    if let Some(base) = loctr.base {
                        let section = &self.sections[loctr.section.0 as usize];
                        let head_loctr = section.loctrs[0];
                        let head_space = self.loctrs[head_loctr.0 as usize].spaces[0];
                        if head_space != space {
                            delta += base;
                            space = head_space;
                            continue;
                        }
                    }
                    return (space, delta);
                }
            }
        }
    }

    pub fn normalize(&self, value: &RelocValue) -> RelocValue {
        let mut terms = Vec::with_capacity(value.terms.len());
        let mut offset = value.offset;
        for &(space, coeff) in &value.terms {
            let (folded, delta) = self.fold_space(space);
            terms.push((folded, coeff));
            offset += coeff.wrapping_mul(delta);
        }
        RelocValue::normalized(terms, offset)
    }

    /// Unresolved space terms a relocatable value is blocked on; empty
    /// means only finalization (counter bases) is missing.
    fn space_deps(&self, value: &RelocValue) -> Vec<DepKey> {
        let mut deps = Vec::new();
        for &(space, _) in &value.terms {
            if self.spaces[space.0 as usize].start.is_none() {
                deps.push(DepKey::Space(space));
            }
        }
        deps
    }

    // ----- expression evaluation -----

    pub fn eval(
        &self,
        expr: &Expr,
        loctr: Option<&RelocValue>,
    ) -> (OrdEval, Vec<OrdFault>) {
        let mut faults = Vec::new();
        let outcome = self.eval_node(expr, loctr, &mut faults);
        (outcome, faults)
    }

    fn eval_node(
        &self,
        expr: &Expr,
        loctr: Option<&RelocValue>,
        faults: &mut Vec<OrdFault>,
    ) -> OrdEval {
        match expr {
            Expr::Num(value) => OrdEval::Abs(*value),
            Expr::OrdSym(id) => match self.symbols.get(id) {
                Some(symbol) => match &symbol.value {
                    SymbolState::Resolved(SymbolValue::Abs(value)) => OrdEval::Abs(*value),
                    SymbolState::Resolved(SymbolValue::Reloc(reloc)) => {
                        let normalized = self.normalize(reloc);
                        match normalized.try_abs() {
                            Some(value) => OrdEval::Abs(value),
                            None => OrdEval::Reloc(normalized),
                        }
                    }
                    SymbolState::Pending => OrdEval::Unresolved(vec![DepKey::Value(*id)]),
                },
                None => OrdEval::Unresolved(vec![DepKey::Value(*id)]),
            },
            Expr::LocCtr => match loctr {
                Some(value) => {
                    let normalized = self.normalize(value);
                    match normalized.try_abs() {
                        Some(abs) => OrdEval::Abs(abs),
                        None => OrdEval::Reloc(normalized),
                    }
                }
                None => {
                    faults.push(OrdFault::NotOrdinary);
                    OrdEval::Invalid
                }
            },
            Expr::Attr(kind, AttrTarget::Sym(id)) => self.eval_attr(*kind, *id, faults),
            Expr::Attr(_, AttrTarget::Var(_)) | Expr::Var(_) | Expr::Str(_) => {
                faults.push(OrdFault::NotOrdinary);
                OrdEval::Invalid
            }
            Expr::Unary(op, inner) => {
                let inner = self.eval_node(inner, loctr, faults);
                match (op, inner) {
                    (_, OrdEval::Invalid) => OrdEval::Invalid,
                    (_, OrdEval::Unresolved(deps)) => OrdEval::Unresolved(deps),
                    (UnOp::Plus, value) => value,
                    (UnOp::Minus, OrdEval::Abs(value)) => OrdEval::Abs(value.wrapping_neg()),
                    (UnOp::Minus, OrdEval::Reloc(reloc)) => OrdEval::Reloc(reloc.negate()),
                    (UnOp::Not, OrdEval::Abs(value)) => OrdEval::Abs(!value),
                    (UnOp::Not, OrdEval::Reloc(_)) => {
                        faults.push(OrdFault::InvalidReloc);
                        OrdEval::Invalid
                    }
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval_node(lhs, loctr, faults);
                let rhs = self.eval_node(rhs, loctr, faults);
                self.eval_binary(*op, lhs, rhs, faults)
            }
        }
    }

    fn eval_attr(&self, kind: AttrKind, id: IdIndex, faults: &mut Vec<OrdFault>) -> OrdEval {
        let attrs = self
            .symbols
            .get(&id)
            .map(|s| s.attrs)
            .or_else(|| self.attr_cache.get(&id).copied());
        match kind {
            AttrKind::Length => match attrs {
                Some(attrs) => match attrs.length {
                    Some(length) => OrdEval::Abs(length as i32),
                    None => OrdEval::Unresolved(vec![DepKey::Length(id)]),
                },
                None => OrdEval::Unresolved(vec![DepKey::Length(id)]),
            },
            AttrKind::Scale => match attrs {
                Some(attrs) => OrdEval::Abs(attrs.scale as i32),
                None => OrdEval::Unresolved(vec![DepKey::Value(id)]),
            },
            AttrKind::Integer => match attrs {
                Some(attrs) => OrdEval::Abs(attrs.integer as i32),
                None => OrdEval::Unresolved(vec![DepKey::Value(id)]),
            },
            AttrKind::Defined => OrdEval::Abs(self.symbols.contains_key(&id) as i32),
            _ => {
                faults.push(OrdFault::NotOrdinary);
                OrdEval::Invalid
            }
        }
    }

    fn eval_binary(
        &self,
        op: BinOp,
        lhs: OrdEval,
        rhs: OrdEval,
        faults: &mut Vec<OrdFault>,
    ) -> OrdEval {
        use OrdEval::*;
        if matches!(lhs, Invalid) || matches!(rhs, Invalid) {
            return Invalid;
        }
        if let (Unresolved(mut a), Unresolved(b)) = (lhs.clone(), rhs.clone()) {
            a.extend(b);
            return Unresolved(a);
        }
        if let Unresolved(deps) = lhs {
            return Unresolved(deps);
        }
        if let Unresolved(deps) = rhs {
            return Unresolved(deps);
        }

        match op {
            BinOp::Add | BinOp::Sub => {
                let result = match (reloc_of(&lhs), reloc_of(&rhs)) {
                    (None, None) => {
                        let (a, b) = (abs_of(&lhs), abs_of(&rhs));
                        return Abs(if op == BinOp::Add {
                            a.wrapping_add(b)
                        } else {
                            a.wrapping_sub(b)
                        });
                    }
                    (Some(a), None) => {
                        let b = abs_of(&rhs);
                        a.add_offset(if op == BinOp::Add { b } else { -b })
                    }
                    (None, Some(b)) => {
                        let a = abs_of(&lhs);
                        let b = if op == BinOp::Add { b.clone() } else { b.negate() };
                        b.add_offset(a)
                    }
                    (Some(a), Some(b)) => {
                        if op == BinOp::Add {
                            a.add(b)
                        } else {
                            a.sub(b)
                        }
                    }
                };
                let normalized = self.normalize(&result);
                match normalized.try_abs() {
                    Some(value) => Abs(value),
                    None => Reloc(normalized),
                }
            }
            BinOp::Mul | BinOp::Div => {
                let (a, b) = match (&lhs, &rhs) {
                    (Abs(a), Abs(b)) => (*a, *b),
                    _ => {
                        // A relocatable factor may still cancel once more
                        // structure resolves; afterwards it is an error.
                        if !self.finalized {
                            let mut deps = Vec::new();
                            if let Some(reloc) = reloc_of(&lhs) {
                                deps.extend(self.space_deps(reloc));
                            }
                            if let Some(reloc) = reloc_of(&rhs) {
                                deps.extend(self.space_deps(reloc));
                            }
                            return Unresolved(deps);
                        }
                        faults.push(OrdFault::InvalidReloc);
                        return Invalid;
                    }
                };
                if op == BinOp::Mul {
                    Abs(a.wrapping_mul(b))
                } else if b == 0 {
                    faults.push(OrdFault::DivZero);
                    Abs(0)
                } else {
                    Abs(a.wrapping_div(b))
                }
            }
            _ => {
                faults.push(OrdFault::NotOrdinary);
                Invalid
            }
        }
    }

    // ----- symbol definition -----

    /// Inserts a fully or partially resolved symbol. A second definition
    /// of the same name is diagnosed and ignored.
    pub fn define_symbol(
        &mut self,
        symbol: Symbol,
        name_text: &str,
        diags: &mut DiagnosticSink,
        stack: &[crate::diagnostics::RelatedLocation],
    ) -> bool {
        if self.symbols.contains_key(&symbol.name) {
            diags.add(
                Diagnostic::already_defined(
                    "symbol",
                    name_text,
                    &symbol.location.file,
                    Range::line(
                        symbol.location.pos.line,
                        symbol.location.pos.col,
                        symbol.location.pos.col + name_text.len().max(1) as u32,
                    ),
                ),
                stack,
            );
            return false;
        }
        self.symbols.insert(symbol.name, symbol);
        self.solve(diags);
        true
    }

    /// Resolves the value of a previously inserted pending symbol.
    fn resolve_value(&mut self, name: IdIndex, value: SymbolValue) {
        if let Some(symbol) = self.symbols.get_mut(&name) {
            if symbol.value == SymbolState::Pending {
                symbol.value = SymbolState::Resolved(value);
            }
        }
    }

    fn resolve_length(&mut self, name: IdIndex, length: u16) {
        if let Some(symbol) = self.symbols.get_mut(&name) {
            if symbol.attrs.length.is_none() {
                symbol.attrs.length = Some(length);
            }
        } else {
            self.attr_cache
                .entry(name)
                .or_insert_with(|| SymbolAttributes::new(SymbolOrigin::Equate))
                .length
                .get_or_insert(length);
        }
    }

    // ----- the solver -----

    #[allow(clippy::too_many_arguments)]
    pub fn add_pending(
        &mut self,
        target: PendingTarget,
        name: IdIndex,
        name_text: &str,
        expr: Expr,
        loctr_snapshot: Option<RelocValue>,
        file: &str,
        range: Range,
        diags: &mut DiagnosticSink,
    ) {
        let pending = Pending {
            target,
            name,
            expr,
            loctr_snapshot,
            file: file.to_string(),
            range,
        };

        if let Some(members) = self.find_cycle(&pending) {
            diags.add(
                Diagnostic::cyclic_definition(name_text, &pending.file, pending.range),
                &[],
            );
            self.break_cycle(&pending, &members);
            self.solve(diags);
            return;
        }

        self.pending.push(pending);
        self.solve(diags);
    }

    fn dep_list(&self, pending: &Pending) -> Vec<DepKey> {
        match self.eval(&pending.expr, pending.loctr_snapshot.as_ref()).0 {
            OrdEval::Unresolved(deps) => deps,
            OrdEval::Reloc(reloc) if requires_abs(&pending.target) => self.space_deps(&reloc),
            _ => Vec::new(),
        }
    }

    /// Pending indices that can supply the given dependency.
    fn providers(&self, dep: DepKey) -> Vec<usize> {
        match dep {
            DepKey::Value(id) => self
                .pending
                .iter()
                .enumerate()
                .filter(|(_, p)| p.target == PendingTarget::Value(id))
                .map(|(i, _)| i)
                .collect(),
            DepKey::Length(id) => self
                .pending
                .iter()
                .enumerate()
                .filter(|(_, p)| p.target == PendingTarget::Length(id))
                .map(|(i, _)| i)
                .collect(),
            DepKey::Space(space) => {
                // A space start is supplied by the whole chain of gaps
                // between it and the head of its counter.
                let mut result = Vec::new();
                let mut cursor = space;
                while let Some((pred, _, gap)) = self.spaces[cursor.0 as usize].pred {
                    if self.gaps[gap.0 as usize].resolved.is_none() {
                        for (i, p) in self.pending.iter().enumerate() {
                            if matches!(p.target, PendingTarget::Gap(g, _) if g == gap) {
                                result.push(i);
                            }
                        }
                    }
                    cursor = pred;
                }
                result
            }
        }
    }

    /// Detects whether adding `pending` closes a dependency cycle and
    /// returns the indices of existing pendings on that cycle.
    fn find_cycle(&self, pending: &Pending) -> Option<Vec<usize>> {
        let deps = self.dep_list(pending);

        // A pending may depend on itself outright (`X DC CL(L'X)'X'`).
        let provided_direct = provided_key(&pending.target);
        if deps
            .iter()
            .any(|d| *d == provided_direct || self.space_dep_covers(*d, &pending.target))
        {
            return Some(Vec::new());
        }

        // Forward reachability from the new pending's dependencies.
        let mut reached: HashSet<usize> = HashSet::new();
        let mut frontier: Vec<usize> = deps.iter().flat_map(|&d| self.providers(d)).collect();
        while let Some(index) = frontier.pop() {
            if !reached.insert(index) {
                continue;
            }
            for dep in self.dep_list(&self.pending[index]) {
                frontier.extend(self.providers(dep));
            }
        }

        // The cycle closes if a reached pending depends on what the new
        // pending will provide.
        let provided = provided_key(&pending.target);
        let closing: Vec<usize> = reached
            .iter()
            .copied()
            .filter(|&i| {
                self.dep_list(&self.pending[i])
                    .iter()
                    .any(|d| *d == provided || self.space_dep_covers(*d, &pending.target))
            })
            .collect();
        if closing.is_empty() {
            return None;
        }

        // Members: reached pendings that can get back to the new node.
        let members: Vec<usize> = reached
            .iter()
            .copied()
            .filter(|&i| self.reaches_target(i, &pending.target))
            .collect();
        Some(members)
    }

    fn space_dep_covers(&self, dep: DepKey, target: &PendingTarget) -> bool {
        if let (DepKey::Space(space), PendingTarget::Gap(gap, _)) = (dep, target) {
            let mut cursor = space;
            while let Some((pred, _, g)) = self.spaces[cursor.0 as usize].pred {
                if g == *gap {
                    return true;
                }
                cursor = pred;
            }
        }
        false
    }

    fn reaches_target(&self, from: usize, target: &PendingTarget) -> bool {
        let provided = provided_key(target);
        let mut seen = HashSet::new();
        let mut frontier = vec![from];
        while let Some(index) = frontier.pop() {
            if !seen.insert(index) {
                continue;
            }
            for dep in self.dep_list(&self.pending[index]) {
                if dep == provided || self.space_dep_covers(dep, target) {
                    return true;
                }
                frontier.extend(self.providers(dep));
            }
        }
        false
    }

    /// Defaults every member of a detected cycle: zero for values, one
    /// for lengths and gaps.
    fn break_cycle(&mut self, closing: &Pending, members: &[usize]) {
        let mut targets: Vec<PendingTarget> = vec![closing.target.clone()];
        let mut indices: Vec<usize> = members.to_vec();
        indices.sort_unstable();
        for index in indices.iter().rev() {
            let removed = self.pending.remove(*index);
            targets.push(removed.target);
        }
        for target in targets {
            match target {
                PendingTarget::Value(id) => self.resolve_value(id, SymbolValue::Abs(0)),
                PendingTarget::Length(id) => self.resolve_length(id, 1),
                PendingTarget::Gap(gap, _) => {
                    self.gaps[gap.0 as usize].resolved.get_or_insert(1);
                }
            }
        }
        self.propagate_spaces();
    }

    /// Resolves space starts whose predecessor and gap are now known.
    fn propagate_spaces(&mut self) {
        let mut progress = true;
        while progress {
            progress = false;
            for index in 0..self.spaces.len() {
                if self.spaces[index].start.is_some() {
                    continue;
                }
                if let Some((pred, frozen_at, gap)) = self.spaces[index].pred {
                    let pred_start = self.spaces[pred.0 as usize].start;
                    let gap_len = self.gaps[gap.0 as usize].resolved;
                    if let (Some(start), Some(len)) = (pred_start, gap_len) {
                        self.spaces[index].start = Some(start + frozen_at + len);
                        progress = true;
                    }
                }
            }
        }
    }

    /// Promotes every pending whose dependencies are satisfied, repeating
    /// until a fixed point.
    pub fn solve(&mut self, diags: &mut DiagnosticSink) {
        loop {
            let mut progress = false;
            let mut index = 0;
            while index < self.pending.len() {
                let pending = self.pending[index].clone();
                let (outcome, faults) = self.eval(&pending.expr, pending.loctr_snapshot.as_ref());
                let applied = match outcome {
                    OrdEval::Unresolved(_) => false,
                    // Space terms may still collapse at finalization.
                    OrdEval::Reloc(_) if requires_abs(&pending.target) && !self.finalized => false,
                    outcome => {
                        self.apply_pending(&pending, outcome, &faults, diags);
                        true
                    }
                };
                if applied {
                    self.pending.remove(index);
                    progress = true;
                } else {
                    index += 1;
                }
            }
            if !progress {
                break;
            }
            self.propagate_spaces();
        }
    }

    fn apply_pending(
        &mut self,
        pending: &Pending,
        outcome: OrdEval,
        faults: &[OrdFault],
        diags: &mut DiagnosticSink,
    ) {
        for fault in faults {
            diags.add(fault.diagnostic(&pending.file, pending.range), &[]);
        }
        match (&pending.target, outcome) {
            (PendingTarget::Value(id), OrdEval::Abs(value)) => {
                self.resolve_value(*id, SymbolValue::Abs(value))
            }
            (PendingTarget::Value(id), OrdEval::Reloc(reloc)) => {
                self.resolve_value(*id, SymbolValue::Reloc(reloc))
            }
            (PendingTarget::Value(id), _) => self.resolve_value(*id, SymbolValue::Abs(0)),
            (PendingTarget::Length(id), OrdEval::Abs(value)) => {
                self.resolve_length(*id, value.max(0).min(65535) as u16)
            }
            (PendingTarget::Length(id), outcome) => {
                // An unresolved input was already diagnosed as undefined;
                // only a genuinely relocatable length is its own error.
                if matches!(outcome, OrdEval::Reloc(_)) {
                    diags.add(
                        OrdFault::AbsRequired.diagnostic(&pending.file, pending.range),
                        &[],
                    );
                }
                self.resolve_length(*id, 1)
            }
            (PendingTarget::Gap(gap, _), OrdEval::Abs(value)) => {
                self.gaps[gap.0 as usize].resolved = Some(value.max(0));
                self.propagate_spaces();
            }
            (PendingTarget::Gap(gap, _), outcome) => {
                if !matches!(outcome, OrdEval::Invalid) {
                    diags.add(
                        OrdFault::AbsRequired.diagnostic(&pending.file, pending.range),
                        &[],
                    );
                }
                self.gaps[gap.0 as usize].resolved = Some(1);
                self.propagate_spaces();
            }
        }
    }

    // ----- postponed operand checks -----

    #[allow(clippy::too_many_arguments)]
    pub fn postpone_check(
        &mut self,
        kind: PostponedKind,
        instr: &str,
        expr: Expr,
        loctr_snapshot: Option<RelocValue>,
        file: &str,
        range: Range,
    ) {
        self.postponed.push(PostponedCheck {
            kind,
            instr: instr.to_string(),
            expr,
            loctr_snapshot,
            file: file.to_string(),
            range,
        });
    }

    // ----- finalization -----

    /// Ends the analysis: assigns location counter bases, forces the
    /// remaining pendings, and replays postponed operand checks.
    pub fn finalize(&mut self, ids: &IdStorage, diags: &mut DiagnosticSink) {
        log::debug!(
            "finalizing: {} pending, {} postponed checks",
            self.pending.len(),
            self.postponed.len()
        );
        self.solve(diags);

        // Undefined references: pendings blocked on names that neither
        // the table nor any pending definition will ever supply. Each
        // such name is diagnosed once and given default attributes.
        loop {
            let unresolvable = self.pending.iter().position(|p| {
                self.dep_list(p)
                    .iter()
                    .any(|dep| self.dep_is_unsupplied(*dep))
            });
            let index = match unresolvable {
                Some(index) => index,
                None => break,
            };
            let pending = self.pending.remove(index);
            for dep in self.dep_list(&pending) {
                if !self.dep_is_unsupplied(dep) {
                    continue;
                }
                if let DepKey::Value(id) | DepKey::Length(id) = dep {
                    if !self.attr_cache.contains_key(&id) {
                        diags.add(
                            Diagnostic::error(
                                "E044",
                                format!("undefined symbol {}", ids.resolve(id)),
                                &pending.file,
                                pending.range,
                            ),
                            &[],
                        );
                        self.attr_cache.insert(
                            id,
                            SymbolAttributes::new(SymbolOrigin::Equate).with_length(1),
                        );
                    }
                }
            }
            let (outcome, faults) = self.eval(&pending.expr, pending.loctr_snapshot.as_ref());
            self.apply_pending(&pending, outcome, &faults, diags);
            self.solve(diags);
        }

        // Cycles that formed after their members were added (forward DC
        // lengths closing over later spaces) surface here.
        self.detect_cycles(ids, diags);

        // Any gap still open at this point is unresolvable; force it so
        // counter bases can be assigned.
        for index in 0..self.gaps.len() {
            if self.gaps[index].resolved.is_none()
                && !self
                    .pending
                    .iter()
                    .any(|p| matches!(p.target, PendingTarget::Gap(g, _) if g.0 as usize == index))
            {
                self.gaps[index].resolved = Some(1);
            }
        }
        self.propagate_spaces();

        // Assign location counter bases section by section.
        for section in &self.sections {
            let mut running = 0;
            for &loctr_id in &section.loctrs {
                let extent = self.loctr_extent(loctr_id);
                self.loctrs[loctr_id.0 as usize].base = Some(running);
                running += extent;
            }
        }

        self.finalized = true;
        self.solve(diags);

        // Whatever survived cannot be resolved at all.
        let leftover: Vec<Pending> = std::mem::take(&mut self.pending);
        for pending in leftover {
            let (outcome, faults) = self.eval(&pending.expr, pending.loctr_snapshot.as_ref());
            match outcome {
                OrdEval::Unresolved(_) => {
                    diags.add(
                        Diagnostic::error(
                            "E044",
                            format!("undefined symbol {}", ids.resolve(pending.name)),
                            &pending.file,
                            pending.range,
                        ),
                        &[],
                    );
                    let default = match &pending.target {
                        PendingTarget::Value(_) => OrdEval::Abs(0),
                        _ => OrdEval::Abs(1),
                    };
                    self.apply_pending(&pending, default, &[], diags);
                }
                outcome => self.apply_pending(&pending, outcome, &faults, diags),
            }
        }
        self.solve(diags);

        // Replay operand checks that had to wait for resolution.
        let postponed = std::mem::take(&mut self.postponed);
        for check in postponed {
            let (outcome, faults) = self.eval(&check.expr, check.loctr_snapshot.as_ref());
            for fault in faults {
                diags.add(fault.diagnostic(&check.file, check.range), &[]);
            }
            let value = match outcome {
                OrdEval::Abs(value) => CheckValue::Abs(value),
                OrdEval::Reloc(_) => CheckValue::Reloc,
                _ => CheckValue::Unknown,
            };
            let diag = match check.kind {
                PostponedKind::MachOperand(class) => {
                    check_operand(&check.instr, class, &value, &check.file, check.range)
                }
                PostponedKind::DataDisplacement => {
                    check_displacement(&value, &check.file, check.range)
                }
            };
            if let Some(diag) = diag {
                diags.add(diag, &[]);
            }
        }
    }

    /// True when nothing in the analysis can ever supply this dependency:
    /// the symbol is absent (or, for lengths, known nowhere) and no
    /// pending definition targets it. Attribute-cache entries satisfy
    /// length queries but never value queries.
    fn dep_is_unsupplied(&self, dep: DepKey) -> bool {
        match dep {
            DepKey::Value(id) => {
                !self.symbols.contains_key(&id) && self.providers(dep).is_empty()
            }
            DepKey::Length(id) => {
                let known = self
                    .symbols
                    .get(&id)
                    .map(|symbol| symbol.attrs.length.is_some())
                    .unwrap_or(false)
                    || self
                        .attr_cache
                        .get(&id)
                        .map(|attrs| attrs.length.is_some())
                        .unwrap_or(false);
                !known && self.providers(dep).is_empty()
            }
            DepKey::Space(_) => false,
        }
    }

    /// Finds and breaks dependency cycles among the current pendings.
    /// Exactly one diagnostic is emitted per cycle, at the statement that
    /// entered the solver first.
    fn detect_cycles(&mut self, ids: &IdStorage, diags: &mut DiagnosticSink) {
        loop {
            let closing = (0..self.pending.len())
                .find(|&i| self.reaches_target(i, &self.pending[i].target.clone()));
            let index = match closing {
                Some(index) => index,
                None => break,
            };
            let pending = self.pending.remove(index);
            let members: Vec<usize> = (0..self.pending.len())
                .filter(|&i| self.reaches_target(i, &pending.target))
                .collect();
            diags.add(
                Diagnostic::cyclic_definition(ids.resolve(pending.name), &pending.file, pending.range),
                &[],
            );
            self.break_cycle(&pending, &members);
            self.solve(diags);
        }
    }

    fn loctr_extent(&self, loctr_id: LoctrId) -> i32 {
        let loctr = &self.loctrs[loctr_id.0 as usize];
        loctr
            .spaces
            .iter()
            .map(|&space| {
                let s = &self.spaces[space.0 as usize];
                s.start.unwrap_or(0) + s.extent
            })
            .max()
            .unwrap_or(0)
    }
}

fn requires_abs(target: &PendingTarget) -> bool {
    !matches!(target, PendingTarget::Value(_))
}

fn provided_key(target: &PendingTarget) -> DepKey {
    match target {
        PendingTarget::Value(id) => DepKey::Value(*id),
        PendingTarget::Length(id) => DepKey::Length(*id),
        PendingTarget::Gap(_, space) => DepKey::Space(*space),
    }
}

fn reloc_of(value: &OrdEval) -> Option<&RelocValue> {
    match value {
        OrdEval::Reloc(reloc) => Some(reloc),
        _ => None,
    }
}

fn abs_of(value: &OrdEval) -> i32 {
    match value {
        OrdEval::Abs(value) => *value,
        _ => 0,
    }
}
