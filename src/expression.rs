//! Conditional-assembly expression trees and SET values.
//!
//! One tree type serves both evaluation contexts: the CA evaluator (SETx,
//! AIF, AGO, variable subscripts) and the ordinary-symbol evaluator (EQU,
//! DC modifiers, machine operands). Leaves the parser cannot classify
//! without context, like `X` being a register or a forward-referenced
//! equate, stay symbolic until one of the evaluators resolves them.

use crate::ids::IdIndex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetType {
    A,
    B,
    C,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetValue {
    A(i32),
    B(bool),
    C(String),
}

impl SetValue {
    pub fn default_of(set_type: SetType) -> SetValue {
        match set_type {
            SetType::A => SetValue::A(0),
            SetType::B => SetValue::B(false),
            SetType::C => SetValue::C(String::new()),
        }
    }

    pub fn type_of(&self) -> SetType {
        match self {
            SetValue::A(_) => SetType::A,
            SetValue::B(_) => SetType::B,
            SetValue::C(_) => SetType::C,
        }
    }

    /// Arithmetic view. Booleans widen to 0/1; character values that spell
    /// a (possibly signed) decimal number convert, the empty string counts
    /// as zero, anything else is `None`.
    pub fn to_a(&self) -> Option<i32> {
        match self {
            SetValue::A(value) => Some(*value),
            SetValue::B(value) => Some(*value as i32),
            SetValue::C(value) => {
                let text = value.trim();
                if text.is_empty() {
                    Some(0)
                } else {
                    text.parse::<i32>().ok()
                }
            }
        }
    }

    pub fn to_b(&self) -> Option<bool> {
        self.to_a().map(|value| value != 0)
    }

    pub fn to_c(&self) -> String {
        match self {
            SetValue::A(value) => value.to_string(),
            SetValue::B(value) => if *value { "1" } else { "0" }.to_string(),
            SetValue::C(value) => value.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttrKind {
    Length,
    Type,
    Scale,
    Integer,
    Count,
    Number,
    Opcode,
    Defined,
}

impl AttrKind {
    pub fn from_char(c: char) -> Option<AttrKind> {
        match c.to_ascii_uppercase() {
            'L' => Some(AttrKind::Length),
            'T' => Some(AttrKind::Type),
            'S' => Some(AttrKind::Scale),
            'I' => Some(AttrKind::Integer),
            'K' => Some(AttrKind::Count),
            'N' => Some(AttrKind::Number),
            'O' => Some(AttrKind::Opcode),
            'D' => Some(AttrKind::Defined),
            _ => None,
        }
    }

    /// Attributes that may require a forward scan when the referenced
    /// ordinary symbol is not yet in the table.
    pub fn needs_ordinary_symbol(self) -> bool {
        matches!(
            self,
            AttrKind::Length | AttrKind::Type | AttrKind::Scale | AttrKind::Integer
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum VarName {
    Plain(IdIndex),
    /// Created SET symbol `&(a&b.c)`; the name is assembled at evaluation.
    Created(ConcatChain),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarRef {
    pub name: VarName,
    pub subscripts: Vec<Expr>,
}

impl VarRef {
    pub fn plain(name: IdIndex) -> VarRef {
        VarRef {
            name: VarName::Plain(name),
            subscripts: Vec::new(),
        }
    }
}

pub type ConcatChain = Vec<ConcatPart>;

#[derive(Clone, Debug, PartialEq)]
pub enum ConcatPart {
    Str(String),
    Var(VarRef),
    /// Consumed separator dot: `&A.B` concatenates to `<&A>B`.
    Dot,
    Equals,
}

/// Character expression: a concatenation chain with optional duplication
/// `(n)'…'` and substring `'…'(start,length)` decorations.
#[derive(Clone, Debug, PartialEq)]
pub struct CharExpr {
    pub chain: ConcatChain,
    pub dup: Option<Box<Expr>>,
    pub substr: Option<(Box<Expr>, Box<Expr>)>,
}

impl CharExpr {
    pub fn plain(chain: ConcatChain) -> CharExpr {
        CharExpr {
            chain,
            dup: None,
            substr: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttrTarget {
    Sym(IdIndex),
    Var(VarRef),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Minus,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Num(i32),
    Str(CharExpr),
    Var(VarRef),
    OrdSym(IdIndex),
    /// `*`, the active location counter.
    LocCtr,
    Attr(AttrKind, AttrTarget),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// The leftmost primary term, used for implicit EQU length attributes.
    pub fn leftmost_term(&self) -> &Expr {
        match self {
            Expr::Unary(_, inner) => inner.leftmost_term(),
            Expr::Binary(_, lhs, _) => lhs.leftmost_term(),
            other => other,
        }
    }

    /// All ordinary symbols referenced by value anywhere in the tree.
    pub fn ordinary_refs(&self, out: &mut Vec<IdIndex>) {
        match self {
            Expr::OrdSym(id) => out.push(*id),
            Expr::Unary(_, inner) => inner.ordinary_refs(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.ordinary_refs(out);
                rhs.ordinary_refs(out);
            }
            Expr::Attr(_, AttrTarget::Sym(_)) => {}
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn character_values_convert_when_numeric() {
        assert_eq!(SetValue::C("12".to_string()).to_a(), Some(12));
        assert_eq!(SetValue::C("-3".to_string()).to_a(), Some(-3));
        assert_eq!(SetValue::C("12X".to_string()).to_a(), None);
        assert_eq!(SetValue::C(String::new()).to_a(), Some(0));
        assert_eq!(SetValue::B(true).to_a(), Some(1));
    }

    #[test]
    fn leftmost_term_skips_operators() {
        let expr = Expr::Binary(
            BinOp::Add,
            Box::new(Expr::Unary(
                UnOp::Minus,
                Box::new(Expr::OrdSym(IdIndex::EMPTY)),
            )),
            Box::new(Expr::Num(1)),
        );
        assert_eq!(expr.leftmost_term(), &Expr::OrdSym(IdIndex::EMPTY));
    }

    #[test]
    fn attribute_kinds_parse_case_insensitively() {
        assert_eq!(AttrKind::from_char('l'), Some(AttrKind::Length));
        assert_eq!(AttrKind::from_char('T'), Some(AttrKind::Type));
        assert_eq!(AttrKind::from_char('x'), None);
    }
}
