//! The processing manager: pulls one statement at a time from the active
//! stream and routes it to the processor on top of the mode stack.
//!
//! Streams nest in a fixed order: the innermost macro invocation's copy
//! stack, then its body, then the open-code copy stack, then the parser.
//! Lookahead shares the same stream machinery and restores a snapshot of
//! it when it finishes, so the scan is invisible to ordinary processing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace};

use crate::context::{HlasmContext, ProcessingKind, StreamSnapshot};
use crate::copy::CopyFrame;
use crate::diagnostics::Diagnostic;
use crate::ids::IdIndex;
use crate::location::{Location, Range};
use crate::statement::Statement;
use crate::symbol::{SymbolAttributes, SymbolOrigin};
use crate::variables::MacroParamData;

use super::{LibraryKind, ParseLibProvider, StatementParser};

/// Macro-definition capture state (awaiting-prototype or capturing-body).
pub(super) struct MacroDefState {
    pub expecting_prototype: bool,
    pub nest: u32,
    pub name: IdIndex,
    pub label_param: Option<IdIndex>,
    pub positional: Vec<Option<IdIndex>>,
    pub keywords: HashMap<IdIndex, MacroParamData>,
    pub body: Vec<Statement>,
    pub labels: HashMap<IdIndex, usize>,
    pub param_names: HashSet<IdIndex>,
    pub location: Location,
    pub documentation: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum LookaheadKind {
    Sequence,
    Ordinary,
}

pub(super) struct LookaheadState {
    pub target: IdIndex,
    pub kind: LookaheadKind,
    /// The attribute whose value the trigger needs, for ordinary targets.
    pub attr: Option<crate::expression::AttrKind>,
    pub return_snapshot: StreamSnapshot,
    pub trigger_file: String,
    pub trigger_range: Range,
    pub macro_nest: u32,
}

pub(super) struct CopyCaptureState {
    pub name: IdIndex,
    pub body: Vec<Statement>,
    pub location: Option<Location>,
}

pub(super) enum ProcState {
    Ordinary,
    MacroDef(MacroDefState),
    Lookahead(LookaheadState),
    CopyCapture(CopyCaptureState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LibraryStart {
    OpenCode,
    Macro(IdIndex),
    Copy(IdIndex),
}

pub struct ProcessingManager<'a> {
    pub(super) ctx: &'a mut HlasmContext,
    pub(super) parser: &'a mut dyn StatementParser,
    pub(super) lib: &'a dyn ParseLibProvider,
    pub(super) state: ProcState,
    pub(super) cancel: Option<&'a AtomicBool>,
    /// Set for a macro library fetch until the leading MACRO statement
    /// arrives.
    pub(super) expect_macro_header: bool,
    /// Set when processing was aborted (ACTR exhaustion in open code,
    /// invalid macro library).
    pub(super) stopped: bool,
    start_kind: LibraryStart,
}

impl<'a> ProcessingManager<'a> {
    /// Manager for the analysis of an open-code file.
    pub fn new(
        ctx: &'a mut HlasmContext,
        parser: &'a mut dyn StatementParser,
        lib: &'a dyn ParseLibProvider,
        cancel: Option<&'a AtomicBool>,
    ) -> ProcessingManager<'a> {
        ProcessingManager {
            ctx,
            parser,
            lib,
            state: ProcState::Ordinary,
            cancel,
            expect_macro_header: false,
            stopped: false,
            start_kind: LibraryStart::OpenCode,
        }
    }

    /// Manager for a library member fetched by the provider. For
    /// [`LibraryKind::Copy`] the whole text is captured as a copy member;
    /// for [`LibraryKind::Macro`] the text must define the named macro.
    pub fn for_library(
        ctx: &'a mut HlasmContext,
        parser: &'a mut dyn StatementParser,
        lib: &'a dyn ParseLibProvider,
        kind: LibraryKind,
        member: IdIndex,
    ) -> ProcessingManager<'a> {
        let (state, start_kind, proc_kind, expect_header) = match kind {
            LibraryKind::Copy => (
                ProcState::CopyCapture(CopyCaptureState {
                    name: member,
                    body: Vec::new(),
                    location: None,
                }),
                LibraryStart::Copy(member),
                ProcessingKind::Copy,
                false,
            ),
            LibraryKind::Macro => (
                ProcState::Ordinary,
                LibraryStart::Macro(member),
                ProcessingKind::MacroDef,
                true,
            ),
        };
        ctx.push_processing(proc_kind, Some(parser.file_name().to_string()));
        ProcessingManager {
            ctx,
            parser,
            lib,
            state,
            cancel: None,
            expect_macro_header: expect_header,
            stopped: false,
            start_kind,
        }
    }

    /// Runs until the stream is exhausted or the analysis is cancelled.
    pub fn run(&mut self) {
        let mut cancelled = false;
        loop {
            if self
                .cancel
                .map(|flag| flag.load(Ordering::Relaxed))
                .unwrap_or(false)
            {
                debug!("analysis cancelled; unwinding");
                self.unwind();
                cancelled = true;
                break;
            }
            if self.stopped {
                break;
            }
            match self.next_statement() {
                Some((stmt, snapshot)) => self.dispatch(stmt, snapshot),
                None => {
                    if !self.handle_end_of_input() {
                        break;
                    }
                }
            }
        }
        self.finish_run(cancelled);
    }

    /// True for a nested manager serving a library fetch; its stream is
    /// its own parser (plus its own source frame's copy stack), never an
    /// enclosing macro expansion.
    pub(super) fn library_mode(&self) -> bool {
        !matches!(self.start_kind, LibraryStart::OpenCode)
    }

    fn active_copy_stack_mut(&mut self) -> &mut Vec<CopyFrame> {
        if self.library_mode() {
            self.ctx.top_source_copy_stack_mut()
        } else {
            self.ctx.current_copy_stack_mut()
        }
    }

    fn dispatch(&mut self, stmt: Statement, snapshot: StreamSnapshot) {
        trace!(
            "statement at {}:{}",
            self.current_stream_file(),
            stmt.range.start.line
        );
        match self.state {
            ProcState::Ordinary => self.process_ordinary(stmt, snapshot),
            ProcState::MacroDef(_) => self.process_macro_def(stmt),
            ProcState::Lookahead(_) => self.process_lookahead(stmt, snapshot),
            ProcState::CopyCapture(_) => self.process_copy_capture(stmt),
        }
    }

    fn process_copy_capture(&mut self, stmt: Statement) {
        let file = self.parser.file_name().to_string();
        if let ProcState::CopyCapture(state) = &mut self.state {
            if state.location.is_none() {
                state.location = Some(Location::new(file, stmt.range.start));
            }
            let mut stmt = stmt;
            stmt.index = state.body.len();
            state.body.push(stmt);
        }
    }

    // ----- the statement stream -----

    /// Pulls the next statement together with the stream snapshot that
    /// addresses it (for sequence symbols and lookahead returns).
    pub(super) fn next_statement(&mut self) -> Option<(Statement, StreamSnapshot)> {
        enum Step {
            PopCopy,
            TakeCopy,
            TakeBody(usize),
            EndBody,
            Parser,
        }
        loop {
            let in_lookahead = matches!(self.state, ProcState::Lookahead(_));
            let library_mode = self.library_mode();
            let in_macro = !library_mode && self.ctx.is_in_macro();

            let step = if in_macro {
                let invocation = self.ctx.this_macro().unwrap();
                match invocation.copy_stack.last() {
                    Some(frame) if frame.exhausted() => Step::PopCopy,
                    Some(_) => Step::TakeCopy,
                    None if invocation.current_statement < invocation.def.body.len() => {
                        Step::TakeBody(invocation.current_statement)
                    }
                    None => Step::EndBody,
                }
            } else {
                let stack = if library_mode {
                    self.ctx.top_source_copy_stack()
                } else {
                    self.ctx.current_copy_stack()
                };
                match stack.last() {
                    Some(frame) if frame.exhausted() => Step::PopCopy,
                    Some(_) => Step::TakeCopy,
                    _ => Step::Parser,
                }
            };


            match step {
                Step::PopCopy => {
                    self.active_copy_stack_mut().pop();
                    continue;
                }
                Step::TakeCopy => {
                    let outer_statement = if in_macro {
                        self.ctx.this_macro().unwrap().current_statement
                    } else {
                        self.parser.position()
                    };
                    let (stmt, snapshot) = {
                        let stack = if library_mode {
                            self.ctx.top_source_copy_stack()
                        } else {
                            self.ctx.current_copy_stack()
                        };
                        let frame = stack.last().unwrap();
                        let stmt = frame.body[frame.current].clone();
                        let snapshot = StreamSnapshot {
                            statement: outer_statement,
                            copy_stack: stack
                                .iter()
                                .map(|frame| (frame.member, frame.current))
                                .collect(),
                        };
                        (stmt, snapshot)
                    };
                    self.active_copy_stack_mut().last_mut().unwrap().current += 1;
                    return Some((stmt, snapshot));
                }
                Step::TakeBody(index) => {
                    let stmt = self.ctx.this_macro().unwrap().def.body[index].clone();
                    self.ctx.this_macro_mut().unwrap().current_statement = index + 1;
                    return Some((
                        stmt,
                        StreamSnapshot {
                            statement: index,
                            copy_stack: Vec::new(),
                        },
                    ));
                }
                Step::EndBody => {
                    if in_lookahead {
                        return None;
                    }
                    debug!(
                        "leaving macro {}",
                        self.ctx
                            .resolve_id(self.ctx.this_macro().unwrap().def.name)
                    );
                    self.ctx.leave_macro();
                    continue;
                }
                Step::Parser => {
                    let stmt = self.parser.next_statement(self.ctx)?;
                    let snapshot = StreamSnapshot {
                        statement: stmt.index,
                        copy_stack: Vec::new(),
                    };
                    return Some((stmt, snapshot));
                }
            }
        }
    }

    /// Rebinds the active stream to a snapshot.
    pub(super) fn restore_stream(&mut self, snapshot: &StreamSnapshot) {
        if self.ctx.is_in_macro() {
            self.ctx.this_macro_mut().unwrap().current_statement = snapshot.statement;
        } else {
            self.parser.rewind(snapshot.statement);
        }
        let frames: Vec<CopyFrame> = snapshot
            .copy_stack
            .iter()
            .filter_map(|&(member, current)| {
                self.ctx.get_copy_member(member).map(|m| {
                    let mut frame = CopyFrame::enter(&m);
                    frame.current = current;
                    frame
                })
            })
            .collect();
        *self.ctx.current_copy_stack_mut() = frames;
    }

    pub(super) fn current_stream_file(&self) -> String {
        if self.library_mode() {
            if let Some(frame) = self.ctx.top_source_copy_stack().last() {
                return frame.file.clone();
            }
            return self.parser.file_name().to_string();
        }
        if let Some(frame) = self.ctx.current_copy_stack().last() {
            return frame.file.clone();
        }
        if let Some(invocation) = self.ctx.this_macro() {
            return invocation.def.location.file.clone();
        }
        self.parser.file_name().to_string()
    }

    // ----- end of input -----

    /// Handles stream exhaustion; returns true when processing resumes
    /// (a failed lookahead rewound the stream).
    fn handle_end_of_input(&mut self) -> bool {
        match std::mem::replace(&mut self.state, ProcState::Ordinary) {
            ProcState::Lookahead(state) => {
                self.ctx.pop_processing();
                self.fail_lookahead(state);
                true
            }
            ProcState::MacroDef(state) => {
                self.ctx.pop_processing();
                let stack = self.ctx.processing_frames();
                self.ctx.diags.add(
                    Diagnostic::missing_mend(
                        &state.location.file,
                        Range::line(state.location.pos.line, 0, 1),
                    ),
                    &stack,
                );
                false
            }
            ProcState::CopyCapture(state) => {
                self.register_copy_member(state);
                false
            }
            ProcState::Ordinary => false,
        }
    }

    pub(super) fn register_copy_member(&mut self, state: CopyCaptureState) {
        let location = state
            .location
            .unwrap_or_else(|| Location::new(self.parser.file_name(), Default::default()));
        self.ctx.add_copy_member(crate::copy::CopyMember {
            name: state.name,
            body: std::rc::Rc::new(state.body),
            location,
        });
    }

    /// A lookahead that ran out of statements: rewind, remember the miss
    /// and report it once.
    pub(super) fn fail_lookahead(&mut self, state: LookaheadState) {
        debug!("lookahead for {} failed", self.ctx.resolve_id(state.target));
        self.restore_stream(&state.return_snapshot);
        let name = self.ctx.resolve_id(state.target).to_string();
        match state.kind {
            LookaheadKind::Ordinary => {
                // Default attributes let the triggering statement proceed.
                self.ctx
                    .ord
                    .attr_cache
                    .entry(state.target)
                    .or_insert_with(|| SymbolAttributes::new(SymbolOrigin::Equate).with_length(1));
                let stack = self.ctx.processing_frames();
                self.ctx.diags.add_once(
                    Diagnostic::lookahead_failed(&name, &state.trigger_file, state.trigger_range),
                    &stack,
                );
            }
            LookaheadKind::Sequence => {
                let stack = self.ctx.processing_frames();
                self.ctx.diags.add_once(
                    Diagnostic::undefined_sequence_symbol(
                        &name,
                        &state.trigger_file,
                        state.trigger_range,
                    ),
                    &stack,
                );
                // Fall through past the branch statement.
                let _ = self.next_statement();
            }
        }
    }

    fn unwind(&mut self) {
        while self.ctx.is_in_macro() {
            self.ctx.leave_macro();
        }
        self.ctx.current_copy_stack_mut().clear();
        self.state = ProcState::Ordinary;
    }

    fn finish_run(&mut self, cancelled: bool) {
        match self.start_kind {
            LibraryStart::OpenCode => {
                // A cancelled run keeps whatever was collected without
                // forcing the remaining forward references.
                if !cancelled {
                    self.ctx.finalize_ordinary();
                }
            }
            LibraryStart::Macro(member) => {
                if self.ctx.get_macro(member).is_none() && !self.stopped {
                    let name = self.ctx.resolve_id(member).to_string();
                    let stack = self.ctx.processing_frames();
                    self.ctx.diags.add(
                        Diagnostic::invalid_macro_library(
                            &name,
                            "the member does not define the requested macro",
                            self.parser.file_name(),
                            Range::default(),
                        ),
                        &stack,
                    );
                }
                self.ctx.pop_processing();
            }
            LibraryStart::Copy(_) => {
                self.ctx.pop_processing();
            }
        }
    }
}
