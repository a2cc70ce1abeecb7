//! The conditional-assembly evaluator.
//!
//! Evaluation never fails: type mismatches and undefined references yield
//! the type default plus a diagnostic, so a broken expression cannot stop
//! the statement stream. Attribute references against ordinary symbols
//! that are not in the table yet are the one exception; they are not
//! evaluated here at all. The processor first drains
//! [`collect_lookahead_refs`] and runs lookahead until the list is empty.

use crate::context::{HlasmContext, VarSlot};
use crate::diagnostics::Diagnostic;
use crate::ebcdic::ebcdic_to_ascii;
use crate::expression::{
    AttrKind, AttrTarget, BinOp, CharExpr, ConcatChain, ConcatPart, Expr, SetValue, UnOp, VarName,
    VarRef,
};
use crate::ids::IdIndex;
use crate::location::Range;

pub struct CaEval<'a> {
    pub ctx: &'a mut HlasmContext,
    pub file: &'a str,
    pub range: Range,
    quiet: bool,
}

impl<'a> CaEval<'a> {
    pub fn new(ctx: &'a mut HlasmContext, file: &'a str, range: Range) -> CaEval<'a> {
        CaEval {
            ctx,
            file,
            range,
            quiet: false,
        }
    }

    fn diag(&mut self, diag: Diagnostic) {
        if !self.quiet {
            let stack = self.ctx.processing_frames();
            self.ctx.diags.add(diag, &stack);
        }
    }

    fn mismatch(&mut self, what: &str) {
        self.diag(Diagnostic::invalid_operand(what, self.file, self.range));
    }

    pub fn eval(&mut self, expr: &Expr) -> SetValue {
        match expr {
            Expr::Num(value) => SetValue::A(*value),
            Expr::Str(char_expr) => SetValue::C(self.eval_char(char_expr)),
            Expr::Var(var) => self.eval_var(var),
            Expr::OrdSym(id) => self.eval_ord_sym(*id),
            Expr::LocCtr => {
                self.mismatch("location counter");
                SetValue::A(0)
            }
            Expr::Attr(kind, target) => self.eval_attr(*kind, target),
            Expr::Unary(op, inner) => {
                let inner = self.eval(inner);
                match op {
                    UnOp::Plus => SetValue::A(self.to_a(&inner)),
                    UnOp::Minus => SetValue::A(self.to_a(&inner).wrapping_neg()),
                    UnOp::Not => SetValue::B(self.to_a(&inner) == 0),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs);
                let rhs = self.eval(rhs);
                self.eval_binary(*op, lhs, rhs)
            }
        }
    }

    fn eval_binary(&mut self, op: BinOp, lhs: SetValue, rhs: SetValue) -> SetValue {
        match op {
            BinOp::Add => SetValue::A(self.to_a(&lhs).wrapping_add(self.to_a(&rhs))),
            BinOp::Sub => SetValue::A(self.to_a(&lhs).wrapping_sub(self.to_a(&rhs))),
            BinOp::Mul => SetValue::A(self.to_a(&lhs).wrapping_mul(self.to_a(&rhs))),
            BinOp::Div => {
                let divisor = self.to_a(&rhs);
                if divisor == 0 {
                    self.diag(Diagnostic::division_by_zero(self.file, self.range));
                    SetValue::A(0)
                } else {
                    SetValue::A(self.to_a(&lhs).wrapping_div(divisor))
                }
            }
            BinOp::Concat => SetValue::C(format!("{}{}", lhs.to_c(), rhs.to_c())),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                let ordering = match (&lhs, &rhs) {
                    (SetValue::C(left), SetValue::C(right)) => left.cmp(right),
                    _ => self.to_a(&lhs).cmp(&self.to_a(&rhs)),
                };
                SetValue::B(match op {
                    BinOp::Eq => ordering.is_eq(),
                    BinOp::Ne => ordering.is_ne(),
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Gt => ordering.is_gt(),
                    BinOp::Le => ordering.is_le(),
                    BinOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                })
            }
            BinOp::And => SetValue::B(self.to_b(&lhs) && self.to_b(&rhs)),
            BinOp::Or => SetValue::B(self.to_b(&lhs) || self.to_b(&rhs)),
            BinOp::Xor => SetValue::B(self.to_b(&lhs) != self.to_b(&rhs)),
        }
    }

    fn to_a(&mut self, value: &SetValue) -> i32 {
        match value.to_a() {
            Some(result) => result,
            None => {
                self.mismatch("arithmetic");
                0
            }
        }
    }

    /// Arithmetic coercion with a diagnostic on mismatch.
    pub fn eval_to_a(&mut self, value: &SetValue) -> i32 {
        self.to_a(value)
    }

    /// Resolves a variable reference's (possibly created) name.
    pub fn var_ref_name(&mut self, var: &VarRef) -> IdIndex {
        self.var_name(&var.name)
    }

    fn to_b(&mut self, value: &SetValue) -> bool {
        self.to_a(value) != 0
    }

    fn eval_char(&mut self, char_expr: &CharExpr) -> String {
        let mut text = self.concatenate(&char_expr.chain);
        if let Some((start, length)) = &char_expr.substr {
            let start = self.eval(start);
            let length = self.eval(length);
            let start = self.to_a(&start).max(1) as usize;
            let length = self.to_a(&length).max(0) as usize;
            text = text
                .chars()
                .skip(start - 1)
                .take(length)
                .collect();
        }
        if let Some(dup) = &char_expr.dup {
            let dup = self.eval(dup);
            let count = self.to_a(&dup).max(0) as usize;
            text = text.repeat(count);
        }
        text
    }

    /// Substitutes variables in a concatenation chain.
    pub fn concatenate(&mut self, chain: &ConcatChain) -> String {
        let mut result = String::new();
        for part in chain {
            match part {
                ConcatPart::Str(text) => result.push_str(text),
                ConcatPart::Dot => {}
                ConcatPart::Equals => result.push('='),
                ConcatPart::Var(var) => result.push_str(&self.eval_var(var).to_c()),
            }
        }
        result
    }

    fn var_name(&mut self, name: &VarName) -> IdIndex {
        match name {
            VarName::Plain(id) => *id,
            VarName::Created(chain) => {
                let text = self.concatenate(chain);
                self.ctx.add_id(&text)
            }
        }
    }

    fn eval_subscripts(&mut self, subscripts: &[Expr]) -> Vec<usize> {
        subscripts
            .iter()
            .map(|sub| {
                let value = self.eval(sub);
                self.to_a(&value).max(0) as usize
            })
            .collect()
    }

    pub fn eval_var(&mut self, var: &VarRef) -> SetValue {
        let name = self.var_name(&var.name);
        let subscripts = self.eval_subscripts(&var.subscripts);

        let resolved = match self.ctx.lookup_var(name) {
            None => None,
            Some(VarSlot::Set(symbol)) => Some(symbol.get(subscripts.first().copied())),
            Some(VarSlot::Const(value)) => Some(value.clone()),
            Some(VarSlot::Data(data)) => Some(SetValue::C(
                data.get_nested(&subscripts)
                    .map(|d| d.value())
                    .unwrap_or_default(),
            )),
            Some(VarSlot::SysList(invocation)) => {
                Some(SetValue::C(invocation.syslist_get(&subscripts)))
            }
        };
        // An undefined variable substitutes as empty; implicit creation
        // happens only on assignment.
        resolved.unwrap_or_else(|| SetValue::C(String::new()))
    }

    fn eval_ord_sym(&mut self, id: IdIndex) -> SetValue {
        match self.ctx.ord.get_symbol(id) {
            Some(symbol) => match symbol.resolved_value() {
                Some(crate::symbol::SymbolValue::Abs(value)) => SetValue::A(*value),
                Some(crate::symbol::SymbolValue::Reloc(reloc)) => {
                    let normalized = self.ctx.ord.normalize(reloc);
                    match normalized.try_abs() {
                        Some(value) => SetValue::A(value),
                        None => {
                            self.diag(Diagnostic::absolute_value_required(self.file, self.range));
                            SetValue::A(0)
                        }
                    }
                }
                None => {
                    self.diag(Diagnostic::absolute_value_required(self.file, self.range));
                    SetValue::A(0)
                }
            },
            None => {
                let name = self.ctx.resolve_id(id).to_string();
                self.diag(Diagnostic::error(
                    "E044",
                    format!("undefined symbol {}", name),
                    self.file,
                    self.range,
                ));
                SetValue::A(0)
            }
        }
    }

    fn eval_attr(&mut self, kind: AttrKind, target: &AttrTarget) -> SetValue {
        match target {
            AttrTarget::Var(var) => self.eval_var_attr(kind, var),
            AttrTarget::Sym(id) => self.eval_sym_attr(kind, *id),
        }
    }

    fn eval_var_attr(&mut self, kind: AttrKind, var: &VarRef) -> SetValue {
        match kind {
            AttrKind::Count => {
                let value = self.eval_var(var);
                SetValue::A(value.to_c().chars().count() as i32)
            }
            AttrKind::Number => {
                let name = self.var_name(&var.name);
                let number = match self.ctx.lookup_var(name) {
                    Some(VarSlot::Set(symbol)) => symbol.number(),
                    Some(VarSlot::Data(data)) => data.number(),
                    Some(VarSlot::SysList(invocation)) => invocation.syslist.len() as i32 - 1,
                    Some(VarSlot::Const(_)) => 0,
                    None => 0,
                };
                SetValue::A(number)
            }
            AttrKind::Type => SetValue::C(self.var_type_attr(var).to_string()),
            AttrKind::Defined => {
                let name = self.var_name(&var.name);
                SetValue::A(self.ctx.var_exists(name) as i32)
            }
            AttrKind::Opcode => {
                let value = self.eval_var(var).to_c();
                let id = self.ctx.add_id(&value);
                SetValue::C(self.ctx.opcode_attr(id).to_string())
            }
            // L', S', I' look through the variable at the named symbol.
            AttrKind::Length | AttrKind::Scale | AttrKind::Integer => {
                match self.var_names_symbol(var) {
                    Some(id) => self.eval_sym_attr(kind, id),
                    None => SetValue::A(if kind == AttrKind::Length { 1 } else { 0 }),
                }
            }
        }
    }

    /// `T'` of a variable: `O` for omitted, `N` for numeric values and
    /// self-defining terms, the named symbol's type when the value spells
    /// a defined ordinary symbol, `U` otherwise.
    fn var_type_attr(&mut self, var: &VarRef) -> char {
        let name = self.var_name(&var.name);
        let subscripts = self.eval_subscripts(&var.subscripts);
        let value = match self.ctx.lookup_var(name) {
            None => return 'U',
            Some(VarSlot::Set(symbol)) => {
                if symbol.set_type != crate::expression::SetType::C {
                    return 'N';
                }
                symbol.get(subscripts.first().copied()).to_c()
            }
            Some(VarSlot::Const(value)) => value.to_c(),
            Some(VarSlot::Data(data)) => data
                .get_nested(&subscripts)
                .map(|d| d.value())
                .unwrap_or_default(),
            Some(VarSlot::SysList(invocation)) => invocation.syslist_get(&subscripts),
        };
        if value.is_empty() {
            return 'O';
        }
        if value.trim().parse::<i32>().is_ok() || is_self_defining(&value) {
            return 'N';
        }
        match leading_symbol(&value) {
            Some(text) => {
                let id = self.ctx.add_id(&text);
                match self
                    .ctx
                    .ord
                    .get_symbol(id)
                    .map(|symbol| symbol.attrs.type_attr)
                {
                    Some(type_attr) => ebcdic_to_ascii_type(type_attr),
                    None => 'U',
                }
            }
            None => 'U',
        }
    }

    fn var_names_symbol(&mut self, var: &VarRef) -> Option<IdIndex> {
        let value = self.eval_var(var).to_c();
        leading_symbol(&value).map(|text| self.ctx.add_id(&text))
    }

    fn eval_sym_attr(&mut self, kind: AttrKind, id: IdIndex) -> SetValue {
        let attrs = self
            .ctx
            .ord
            .get_symbol(id)
            .map(|symbol| symbol.attrs)
            .or_else(|| self.ctx.ord.attr_cache.get(&id).copied());
        match kind {
            AttrKind::Defined => SetValue::A(self.ctx.ord.symbol_defined(id) as i32),
            AttrKind::Opcode => SetValue::C(self.ctx.opcode_attr(id).to_string()),
            AttrKind::Type => SetValue::C(
                attrs
                    .map(|attrs| ebcdic_to_ascii_type(attrs.type_attr))
                    .unwrap_or('U')
                    .to_string(),
            ),
            AttrKind::Length => SetValue::A(
                attrs
                    .map(|attrs| attrs.length_or_default() as i32)
                    .unwrap_or(1),
            ),
            AttrKind::Scale => {
                let scale = attrs.map(|attrs| attrs.scale).unwrap_or(0);
                if attrs.map(|attrs| attrs.type_attr) == Some(b'U') || !scalable(attrs) {
                    self.diag(Diagnostic::invalid_operand(
                        "scale attribute",
                        self.file,
                        self.range,
                    ));
                    return SetValue::A(0);
                }
                SetValue::A(scale as i32)
            }
            AttrKind::Integer => SetValue::A(attrs.map(|attrs| attrs.integer as i32).unwrap_or(0)),
            AttrKind::Count | AttrKind::Number => {
                self.mismatch("attribute");
                SetValue::A(0)
            }
        }
    }
}

fn scalable(attrs: Option<crate::symbol::SymbolAttributes>) -> bool {
    matches!(
        attrs.map(|attrs| attrs.type_attr as char),
        Some('F') | Some('H') | Some('D') | Some('E') | Some('P') | Some('Z') | Some('K')
    )
}

fn ebcdic_to_ascii_type(type_attr: u8) -> char {
    if type_attr.is_ascii_uppercase() || type_attr.is_ascii_digit() {
        type_attr as char
    } else {
        ebcdic_to_ascii(type_attr)
    }
}

/// `B'…'`, `X'…'`, `C'…'` or a quoted decimal.
fn is_self_defining(text: &str) -> bool {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(prefix), Some('\'')) => {
            matches!(prefix.to_ascii_uppercase(), 'B' | 'X' | 'C') && text.ends_with('\'')
        }
        _ => false,
    }
}

/// Leading ordinary-symbol name of a substituted value, e.g. `B` out of
/// `B+1`.
fn leading_symbol(text: &str) -> Option<String> {
    let mut result = String::new();
    for (index, c) in text.chars().enumerate() {
        let valid = if index == 0 {
            c.is_ascii_alphabetic() || matches!(c, '@' | '#' | '$' | '_')
        } else {
            c.is_ascii_alphanumeric() || matches!(c, '@' | '#' | '$' | '_')
        };
        if valid {
            result.push(c);
        } else {
            break;
        }
    }
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

/// Ordinary symbols whose attributes are referenced but unknown, in
/// evaluation order. The processor runs one lookahead per entry and
/// re-collects until the list is empty.
pub fn collect_lookahead_refs(expr: &Expr, ctx: &mut HlasmContext) -> Vec<(IdIndex, AttrKind)> {
    let mut out = Vec::new();
    collect_refs(expr, ctx, &mut out);
    out
}

fn symbol_known(ctx: &HlasmContext, id: IdIndex) -> bool {
    ctx.ord.symbol_defined(id) || ctx.ord.attr_cache.contains_key(&id)
}

fn collect_refs(expr: &Expr, ctx: &mut HlasmContext, out: &mut Vec<(IdIndex, AttrKind)>) {
    match expr {
        Expr::Attr(kind, AttrTarget::Sym(id)) if kind.needs_ordinary_symbol() => {
            if !symbol_known(ctx, *id) {
                out.push((*id, *kind));
            }
        }
        Expr::Attr(kind, AttrTarget::Var(var))
            if matches!(
                kind,
                AttrKind::Length | AttrKind::Scale | AttrKind::Integer
            ) =>
        {
            let before = out.len();
            for sub in &var.subscripts {
                collect_refs(sub, ctx, out);
            }
            if out.len() == before {
                // Subscripts are resolvable; the looked-through symbol
                // itself may need a scan.
                let mut quiet = CaEval::new(ctx, "", Range::default());
                quiet.quiet = true;
                if let Some(id) = quiet.var_names_symbol(var) {
                    if !symbol_known(ctx, id) {
                        out.push((id, *kind));
                    }
                }
            }
        }
        Expr::Unary(_, inner) => collect_refs(inner, ctx, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_refs(lhs, ctx, out);
            collect_refs(rhs, ctx, out);
        }
        Expr::Str(char_expr) => {
            if let Some((start, length)) = &char_expr.substr {
                collect_refs(start, ctx, out);
                collect_refs(length, ctx, out);
            }
            if let Some(dup) = &char_expr.dup {
                collect_refs(dup, ctx, out);
            }
        }
        Expr::Var(var) => {
            for sub in &var.subscripts {
                collect_refs(sub, ctx, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::ContextOptions;

    fn eval_str(ctx: &mut HlasmContext, expr: &Expr) -> SetValue {
        let mut eval = CaEval::new(ctx, "test", Range::default());
        eval.eval(expr)
    }

    #[test]
    fn arithmetic_with_coercions() {
        let mut ctx = HlasmContext::new("test", ContextOptions::default());
        let expr = Expr::Binary(
            BinOp::Add,
            Box::new(Expr::Num(2)),
            Box::new(Expr::Str(CharExpr::plain(vec![ConcatPart::Str(
                "40".to_string(),
            )]))),
        );
        assert_eq!(eval_str(&mut ctx, &expr), SetValue::A(42));
    }

    #[test]
    fn division_by_zero_diagnoses_and_defaults() {
        let mut ctx = HlasmContext::new("test", ContextOptions::default());
        let expr = Expr::Binary(
            BinOp::Div,
            Box::new(Expr::Num(7)),
            Box::new(Expr::Num(0)),
        );
        assert_eq!(eval_str(&mut ctx, &expr), SetValue::A(0));
        assert_eq!(ctx.diags.diags().len(), 1);
        assert_eq!(ctx.diags.diags()[0].code, "E070");
    }

    #[test]
    fn string_comparison_is_lexicographic() {
        let mut ctx = HlasmContext::new("test", ContextOptions::default());
        let lhs = Expr::Str(CharExpr::plain(vec![ConcatPart::Str("ABC".to_string())]));
        let rhs = Expr::Str(CharExpr::plain(vec![ConcatPart::Str("ABD".to_string())]));
        let expr = Expr::Binary(BinOp::Lt, Box::new(lhs), Box::new(rhs));
        assert_eq!(eval_str(&mut ctx, &expr), SetValue::B(true));
    }

    #[test]
    fn substring_and_duplication() {
        let mut ctx = HlasmContext::new("test", ContextOptions::default());
        let expr = Expr::Str(CharExpr {
            chain: vec![ConcatPart::Str("ABCDE".to_string())],
            dup: Some(Box::new(Expr::Num(2))),
            substr: Some((Box::new(Expr::Num(2)), Box::new(Expr::Num(3)))),
        });
        assert_eq!(
            eval_str(&mut ctx, &expr),
            SetValue::C("BCDBCD".to_string())
        );
    }

    #[test]
    fn undefined_variable_substitutes_empty() {
        let mut ctx = HlasmContext::new("test", ContextOptions::default());
        let id = ctx.add_id("NOPE");
        let expr = Expr::Binary(
            BinOp::Add,
            Box::new(Expr::Var(VarRef::plain(id))),
            Box::new(Expr::Num(1)),
        );
        assert_eq!(eval_str(&mut ctx, &expr), SetValue::A(1));
        assert!(ctx.diags.diags().is_empty());
    }

    #[test]
    fn lookahead_refs_only_for_unknown_symbols() {
        let mut ctx = HlasmContext::new("test", ContextOptions::default());
        let x = ctx.add_id("X");
        let y = ctx.add_id("Y");
        let expr = Expr::Binary(
            BinOp::Add,
            Box::new(Expr::Attr(AttrKind::Length, AttrTarget::Sym(x))),
            Box::new(Expr::Attr(AttrKind::Length, AttrTarget::Sym(y))),
        );
        assert_eq!(
            collect_lookahead_refs(&expr, &mut ctx),
            vec![(x, AttrKind::Length), (y, AttrKind::Length)]
        );

        ctx.ord.attr_cache.insert(
            x,
            crate::symbol::SymbolAttributes::new(crate::symbol::SymbolOrigin::Equate),
        );
        assert_eq!(
            collect_lookahead_refs(&expr, &mut ctx),
            vec![(y, AttrKind::Length)]
        );
    }
}
