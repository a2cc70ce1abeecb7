//! The statement model shared between the parser and the processors.
//!
//! The parser splits a logical line into label, instruction and a raw
//! operand tail. Operands are deliberately kept as text until the opcode
//! is known: HLASM operand syntax depends on the instruction, and macro
//! bodies are cached verbatim and re-parsed at each invocation after
//! variable substitution.

use crate::expression::{ConcatChain, Expr, VarRef};
use crate::ids::IdIndex;
use crate::location::Range;
use crate::variables::MacroParamData;

#[derive(Clone, Debug, PartialEq)]
pub enum LabelField {
    Empty,
    /// Plain name in the label field.
    Ordinary(IdIndex),
    /// Sequence symbol `.NAME`.
    Sequence(IdIndex),
    /// Variable symbol, the assignment target of SETx.
    Var(VarRef),
    /// Mixed text requiring substitution, e.g. `A&SUFFIX`.
    Concat(ConcatChain),
}

#[derive(Clone, Debug, PartialEq)]
pub enum InstrField {
    Empty,
    Ordinary(IdIndex),
    /// Instruction containing a variable symbol, e.g. `&OP`.
    Concat(ConcatChain),
}

#[derive(Clone, Debug)]
pub struct Statement {
    /// Index of this statement within its stream (open-code sequence or
    /// macro/copy body), used for jumps and lookahead rewinds.
    pub index: usize,
    pub label: LabelField,
    pub label_range: Range,
    pub instruction: InstrField,
    pub instr_range: Range,
    /// Raw operand field with remarks stripped.
    pub operands: String,
    pub ops_range: Range,
    pub range: Range,
}

impl Statement {
    pub fn is_empty(&self) -> bool {
        self.label == LabelField::Empty && self.instruction == InstrField::Empty
    }
}

/// How the raw operand field should be parsed once the opcode is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandFormat {
    /// Conditional assembly: expressions and `(cond).TARGET` branches.
    Ca,
    /// LCLx/GBLx: variable names with optional dimensions.
    VarDecl,
    /// Macro call arguments: leaves, sublists, keyword assignments.
    MacroArgs,
    /// Assembler expressions (EQU, ORG, END, ...).
    Asm,
    /// DC/DS data definitions.
    DataDef,
    /// Machine instruction operands.
    Mach,
    /// Operands are not interpreted (remarks only).
    Ignored,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Empty(Range),
    CaExpr(Expr, Range),
    CaBranch {
        condition: Option<Expr>,
        target: IdIndex,
        range: Range,
    },
    VarDecl {
        name: IdIndex,
        array: bool,
        range: Range,
    },
    Expr(Expr, Range),
    DataDef(DataDef, Range),
    MacroArg {
        keyword: Option<IdIndex>,
        data: MacroParamData,
        range: Range,
    },
    /// Contains variable symbols; substitute and re-parse before use.
    Model(ConcatChain, Range),
    /// Syntactically valid but not interpreted further (e.g. `D(X,B)`
    /// addresses, USING operands).
    Complex(String, Range),
    Invalid(Range),
}

impl Operand {
    pub fn range(&self) -> Range {
        match self {
            Operand::Empty(range)
            | Operand::CaExpr(_, range)
            | Operand::CaBranch { range, .. }
            | Operand::VarDecl { range, .. }
            | Operand::Expr(_, range)
            | Operand::DataDef(_, range)
            | Operand::MacroArg { range, .. }
            | Operand::Model(_, range)
            | Operand::Complex(_, range)
            | Operand::Invalid(range) => *range,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Operand::Empty(_))
    }
}

/// One DC/DS operand: `dup type L(length) S(scale) 'nominal'`.
#[derive(Clone, Debug, PartialEq)]
pub struct DataDef {
    pub dup: Option<Expr>,
    pub type_char: char,
    pub length: Option<Expr>,
    pub scale: Option<Expr>,
    pub nominal: Option<Nominal>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Nominal {
    Str(String),
    Exprs(Vec<Expr>),
}

impl DataDef {
    /// Byte alignment required when no explicit length is given.
    pub fn alignment(&self) -> i32 {
        if self.length.is_some() {
            return 1;
        }
        match self.type_char {
            'H' | 'Y' | 'S' => 2,
            'F' | 'E' | 'A' => 4,
            'D' => 8,
            _ => 1,
        }
    }

    /// Implied length in bytes of a single nominal value, used when no
    /// explicit length modifier is present.
    pub fn implied_length(&self) -> i32 {
        match self.type_char {
            'C' => match &self.nominal {
                Some(Nominal::Str(text)) => text.chars().count().max(1) as i32,
                _ => 1,
            },
            'X' => match &self.nominal {
                Some(Nominal::Str(text)) => (text.chars().count() as i32 + 1) / 2,
                _ => 1,
            },
            'B' => match &self.nominal {
                Some(Nominal::Str(text)) => (text.chars().count() as i32 + 7) / 8,
                _ => 1,
            },
            'P' => match &self.nominal {
                Some(Nominal::Str(text)) => {
                    let digits = text.chars().filter(|c| c.is_ascii_digit()).count() as i32;
                    digits / 2 + 1
                }
                _ => 1,
            },
            'Z' => match &self.nominal {
                Some(Nominal::Str(text)) => {
                    text.chars().filter(|c| c.is_ascii_digit()).count().max(1) as i32
                }
                _ => 1,
            },
            'H' | 'Y' | 'S' => 2,
            'F' | 'E' | 'A' => 4,
            'D' => 8,
            _ => 1,
        }
    }

    /// Number of nominal values; each occupies one implied-length unit.
    pub fn nominal_count(&self) -> i32 {
        match &self.nominal {
            None => 1,
            Some(Nominal::Str(_)) => 1,
            Some(Nominal::Exprs(items)) => items.len().max(1) as i32,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn plain(type_char: char, nominal: Option<Nominal>) -> DataDef {
        DataDef {
            dup: None,
            type_char,
            length: None,
            scale: None,
            nominal,
        }
    }

    #[test]
    fn character_implied_length_tracks_nominal() {
        let def = plain('C', Some(Nominal::Str("ABCD".to_string())));
        assert_eq!(def.implied_length(), 4);
        assert_eq!(def.alignment(), 1);
    }

    #[test]
    fn fullword_is_aligned_and_four_bytes() {
        let def = plain('F', Some(Nominal::Str("6".to_string())));
        assert_eq!(def.implied_length(), 4);
        assert_eq!(def.alignment(), 4);
    }

    #[test]
    fn address_list_counts_values() {
        let def = plain(
            'S',
            Some(Nominal::Exprs(vec![Expr::Num(1), Expr::Num(1)])),
        );
        assert_eq!(def.implied_length() * def.nominal_count(), 4);
    }

    #[test]
    fn explicit_length_suppresses_alignment() {
        let mut def = plain('F', None);
        def.length = Some(Expr::Num(3));
        assert_eq!(def.alignment(), 1);
    }
}
