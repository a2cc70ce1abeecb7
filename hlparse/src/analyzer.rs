//! The analyzer driver and the library providers.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use log::debug;

use hlasm::context::{ContextOptions, HlasmContext};
use hlasm::diagnostics::Diagnostic;
use hlasm::processing::{EmptyLibProvider, LibraryKind, ParseLibProvider, ProcessingManager};

use crate::text_parser::TextParser;

static NO_LIBRARIES: EmptyLibProvider = EmptyLibProvider;

/// Analyzes one source unit and owns the resulting context.
pub struct Analyzer<'a> {
    ctx: HlasmContext,
    parser: TextParser,
    lib: &'a dyn ParseLibProvider,
}

impl Analyzer<'static> {
    pub fn new(text: &str, file: &str) -> Analyzer<'static> {
        Analyzer::with_options(text, file, ContextOptions::default())
    }

    pub fn with_options(text: &str, file: &str, options: ContextOptions) -> Analyzer<'static> {
        Analyzer {
            ctx: HlasmContext::new(file, options),
            parser: TextParser::new(text, file),
            lib: &NO_LIBRARIES,
        }
    }
}

impl<'a> Analyzer<'a> {
    pub fn with_provider(
        text: &str,
        file: &str,
        options: ContextOptions,
        lib: &'a dyn ParseLibProvider,
    ) -> Analyzer<'a> {
        Analyzer {
            ctx: HlasmContext::new(file, options),
            parser: TextParser::new(text, file),
            lib,
        }
    }

    pub fn analyze(&mut self) {
        self.analyze_cancellable(None);
    }

    /// Runs the analysis; a set cancellation flag unwinds cleanly between
    /// statements, keeping the diagnostics collected so far.
    pub fn analyze_cancellable(&mut self, cancel: Option<&AtomicBool>) {
        debug!("analyzing {}", self.ctx.current_file());
        let mut manager =
            ProcessingManager::new(&mut self.ctx, &mut self.parser, self.lib, cancel);
        manager.run();
    }

    pub fn context(&self) -> &HlasmContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut HlasmContext {
        &mut self.ctx
    }

    pub fn diags(&self) -> &[Diagnostic] {
        self.ctx.diags.diags()
    }

    pub fn into_context(self) -> HlasmContext {
        self.ctx
    }
}

/// In-memory library provider: (member name, content) pairs. Fetched
/// members drive a nested analysis against the caller's context.
pub struct VecLibProvider {
    members: Vec<(String, String)>,
}

impl VecLibProvider {
    pub fn new(members: &[(&str, &str)]) -> VecLibProvider {
        VecLibProvider {
            members: members
                .iter()
                .map(|(name, content)| (name.to_string(), content.to_string()))
                .collect(),
        }
    }

    fn find(&self, name: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|(member, _)| member.eq_ignore_ascii_case(name))
            .map(|(_, content)| content.as_str())
    }
}

impl ParseLibProvider for VecLibProvider {
    fn parse_library(&self, name: &str, ctx: &mut HlasmContext, kind: LibraryKind) -> bool {
        let content = match self.find(name) {
            Some(content) => content.to_string(),
            None => return false,
        };
        let member = ctx.add_id(name);
        let mut parser = TextParser::new(&content, name);
        ProcessingManager::for_library(ctx, &mut parser, self, kind, member).run();
        true
    }

    fn has_library(&self, name: &str) -> bool {
        self.find(name).is_some()
    }
}

/// Filesystem provider used by the command line front end: members are
/// files named after the member (upper case, optional .hlasm suffix) in
/// the library directory.
pub struct DirLibProvider {
    dir: PathBuf,
}

impl DirLibProvider {
    pub fn new(dir: impl Into<PathBuf>) -> DirLibProvider {
        DirLibProvider { dir: dir.into() }
    }

    fn read(&self, name: &str) -> Option<String> {
        let upper = name.to_ascii_uppercase();
        for candidate in [upper.clone(), format!("{}.hlasm", upper)] {
            if let Ok(content) = fs::read_to_string(self.dir.join(&candidate)) {
                return Some(content);
            }
        }
        None
    }
}

impl ParseLibProvider for DirLibProvider {
    fn parse_library(&self, name: &str, ctx: &mut HlasmContext, kind: LibraryKind) -> bool {
        let content = match self.read(name) {
            Some(content) => content,
            None => return false,
        };
        let member = ctx.add_id(name);
        let mut parser = TextParser::new(&content, name);
        ProcessingManager::for_library(ctx, &mut parser, self, kind, member).run();
        true
    }

    fn has_library(&self, name: &str) -> bool {
        self.read(name).is_some()
    }
}
