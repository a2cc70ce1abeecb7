//! Symbol occurrences collected during processing, backing the editor
//! queries: go-to-definition, references, hover and completion.
//!
//! Occurrences are recorded at field granularity: label fields, opcode
//! fields and operand fields get one entry per referenced name.

use crate::ids::IdIndex;
use crate::location::{Position, Range};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymKind {
    Ordinary,
    Variable,
    Sequence,
    Macro,
    CopyMember,
}

#[derive(Clone, Debug)]
pub struct Occurrence {
    pub kind: SymKind,
    pub name: IdIndex,
    pub file: String,
    pub range: Range,
    pub is_definition: bool,
}

#[derive(Debug, Default)]
pub struct OccurrenceStore {
    occurrences: Vec<Occurrence>,
}

impl OccurrenceStore {
    pub fn new() -> OccurrenceStore {
        OccurrenceStore::default()
    }

    pub fn add(&mut self, kind: SymKind, name: IdIndex, file: &str, range: Range, def: bool) {
        if name.is_empty() {
            return;
        }
        self.occurrences.push(Occurrence {
            kind,
            name,
            file: file.to_string(),
            range,
            is_definition: def,
        });
    }

    pub fn at(&self, file: &str, pos: Position) -> Option<&Occurrence> {
        self.occurrences
            .iter()
            .find(|occ| occ.file == file && occ.range.contains(pos))
    }

    pub fn definition(&self, kind: SymKind, name: IdIndex) -> Option<&Occurrence> {
        self.occurrences
            .iter()
            .find(|occ| occ.kind == kind && occ.name == name && occ.is_definition)
    }

    pub fn references(&self, kind: SymKind, name: IdIndex) -> Vec<&Occurrence> {
        self.occurrences
            .iter()
            .filter(|occ| occ.kind == kind && occ.name == name)
            .collect()
    }

    pub fn all(&self) -> &[Occurrence] {
        &self.occurrences
    }
}

/// Lexical context of a completion request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionTrigger {
    /// After `&`.
    Variable,
    /// After `.` in the label or operand field.
    Sequence,
    /// Instruction field.
    Opcode,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_by_position_and_name() {
        let mut store = OccurrenceStore::new();
        let name = IdIndex::EMPTY;
        store.add(SymKind::Variable, name, "f", Range::line(1, 0, 2), true);
        assert!(store.at("f", Position::new(1, 1)).is_none(), "empty ids are dropped");

        let mut ids = crate::ids::IdStorage::new();
        let x = ids.add("X");
        store.add(SymKind::Ordinary, x, "f", Range::line(2, 0, 1), true);
        store.add(SymKind::Ordinary, x, "f", Range::line(5, 3, 4), false);
        assert!(store.at("f", Position::new(2, 0)).is_some());
        assert_eq!(store.references(SymKind::Ordinary, x).len(), 2);
        assert!(store.definition(SymKind::Ordinary, x).unwrap().is_definition);
    }
}
