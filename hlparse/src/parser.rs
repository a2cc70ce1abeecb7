//! Pest-backed operand parsing: one entry point per operand format,
//! producing the core statement model.

use pest::iterators::{Pair, Pairs};
use pest::prec_climber::{Assoc, Operator, PrecClimber};
use pest::Parser;

use hlasm::context::HlasmContext;
use hlasm::expression::{
    AttrKind, AttrTarget, BinOp, CharExpr, ConcatPart, Expr, UnOp, VarName, VarRef,
};
use hlasm::statement::{DataDef, Nominal, Operand};
use hlasm::location::Range;

use crate::int_util::{char_term_value, parse_dec, parse_radix_trunc};
use crate::scan::{build_chain, has_variable};
use hlasm::macros::split_keyword;

#[derive(pest_derive::Parser)]
#[grammar = "hlasm.pest"]
pub struct HlasmParser;

fn climber() -> PrecClimber<Rule> {
    PrecClimber::new(vec![
        Operator::new(Rule::or_op, Assoc::Left) | Operator::new(Rule::xor_op, Assoc::Left),
        Operator::new(Rule::and_op, Assoc::Left),
        Operator::new(Rule::eq_op, Assoc::Left)
            | Operator::new(Rule::ne_op, Assoc::Left)
            | Operator::new(Rule::lt_op, Assoc::Left)
            | Operator::new(Rule::gt_op, Assoc::Left)
            | Operator::new(Rule::le_op, Assoc::Left)
            | Operator::new(Rule::ge_op, Assoc::Left),
        Operator::new(Rule::dot_op, Assoc::Left),
        Operator::new(Rule::add_op, Assoc::Left) | Operator::new(Rule::sub_op, Assoc::Left),
        Operator::new(Rule::mul_op, Assoc::Left) | Operator::new(Rule::div_op, Assoc::Left),
    ])
}

fn bin_op(rule: Rule) -> BinOp {
    match rule {
        Rule::add_op => BinOp::Add,
        Rule::sub_op => BinOp::Sub,
        Rule::mul_op => BinOp::Mul,
        Rule::div_op => BinOp::Div,
        Rule::dot_op => BinOp::Concat,
        Rule::eq_op => BinOp::Eq,
        Rule::ne_op => BinOp::Ne,
        Rule::lt_op => BinOp::Lt,
        Rule::gt_op => BinOp::Gt,
        Rule::le_op => BinOp::Le,
        Rule::ge_op => BinOp::Ge,
        Rule::and_op => BinOp::And,
        Rule::or_op => BinOp::Or,
        Rule::xor_op => BinOp::Xor,
        _ => unreachable!("not an infix rule"),
    }
}

fn build_expr(pair: Pair<Rule>, ctx: &mut HlasmContext) -> Expr {
    climb(pair.into_inner(), ctx)
}

fn climb(pairs: Pairs<Rule>, ctx: &mut HlasmContext) -> Expr {
    climber().climb(
        pairs,
        |pair| build_term(pair, ctx),
        |lhs, op, rhs| Expr::Binary(bin_op(op.as_rule()), Box::new(lhs), Box::new(rhs)),
    )
}

fn build_term(pair: Pair<Rule>, ctx: &mut HlasmContext) -> Expr {
    let mut prefixes = Vec::new();
    let mut result = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::prefix => {
                let op = inner.into_inner().next().unwrap();
                prefixes.push(match op.as_rule() {
                    Rule::plus_op => UnOp::Plus,
                    Rule::minus_op => UnOp::Minus,
                    Rule::not_op => UnOp::Not,
                    _ => unreachable!(),
                });
            }
            Rule::primary => result = Some(build_primary(inner, ctx)),
            _ => unreachable!(),
        }
    }
    let mut expr = result.expect("term without primary");
    for op in prefixes.into_iter().rev() {
        expr = Expr::Unary(op, Box::new(expr));
    }
    expr
}

fn build_primary(pair: Pair<Rule>, ctx: &mut HlasmContext) -> Expr {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::number => Expr::Num(parse_dec(inner.as_str())),
        Rule::bin_term => Expr::Num(parse_radix_trunc(
            inner.into_inner().next().unwrap().as_str(),
            2,
        )),
        Rule::hex_term => Expr::Num(parse_radix_trunc(
            inner.into_inner().next().unwrap().as_str(),
            16,
        )),
        Rule::char_term => {
            let quoted = inner.into_inner().next().unwrap();
            let chain = build_quoted(quoted, ctx);
            match chain.as_slice() {
                [] => Expr::Num(0),
                [ConcatPart::Str(text)] => Expr::Num(char_term_value(text)),
                _ => Expr::Str(CharExpr::plain(chain)),
            }
        }
        Rule::string_expr => {
            let mut chain = Vec::new();
            let mut substr = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::quoted => chain = build_quoted(part, ctx),
                    Rule::substr_suffix => {
                        let mut exprs = part.into_inner();
                        let start = build_expr(exprs.next().unwrap(), ctx);
                        let length = build_expr(exprs.next().unwrap(), ctx);
                        substr = Some((Box::new(start), Box::new(length)));
                    }
                    _ => unreachable!(),
                }
            }
            Expr::Str(CharExpr {
                chain,
                dup: None,
                substr,
            })
        }
        Rule::dup_string => {
            let mut parts = inner.into_inner();
            let count = parse_dec(parts.next().unwrap().as_str());
            let chain = build_quoted(parts.next().unwrap(), ctx);
            Expr::Str(CharExpr {
                chain,
                dup: Some(Box::new(Expr::Num(count))),
                substr: None,
            })
        }
        Rule::dup_paren_string => {
            let mut parts = inner.into_inner();
            let count = build_expr(parts.next().unwrap(), ctx);
            let chain = build_quoted(parts.next().unwrap(), ctx);
            Expr::Str(CharExpr {
                chain,
                dup: Some(Box::new(count)),
                substr: None,
            })
        }
        Rule::attr_ref => {
            let mut parts = inner.into_inner();
            let letter = parts.next().unwrap().as_str().chars().next().unwrap();
            let kind = AttrKind::from_char(letter).expect("grammar guarantees an attribute");
            let target = parts.next().unwrap().into_inner().next().unwrap();
            let target = match target.as_rule() {
                Rule::var_ref => AttrTarget::Var(build_var_ref(target, ctx)),
                Rule::name => AttrTarget::Sym(ctx.add_id(target.as_str())),
                _ => unreachable!(),
            };
            Expr::Attr(kind, target)
        }
        Rule::var_ref => Expr::Var(build_var_ref(inner, ctx)),
        Rule::paren_expr => build_expr(inner.into_inner().next().unwrap(), ctx),
        Rule::loc_ctr => Expr::LocCtr,
        Rule::name => Expr::OrdSym(ctx.add_id(inner.as_str())),
        rule => unreachable!("unexpected primary {:?}", rule),
    }
}

fn build_var_ref(pair: Pair<Rule>, ctx: &mut HlasmContext) -> VarRef {
    let mut name = VarName::Plain(hlasm::IdIndex::EMPTY);
    let mut subscripts = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::name => name = VarName::Plain(ctx.add_id(inner.as_str())),
            Rule::created_name => {
                let text = inner.as_str();
                let trimmed = text
                    .strip_prefix('(')
                    .and_then(|t| t.strip_suffix(')'))
                    .unwrap_or(text);
                name = VarName::Created(build_chain(trimmed, ctx));
            }
            Rule::var_subscript => {
                for sub in inner.into_inner() {
                    subscripts.push(build_expr(sub, ctx));
                }
            }
            _ => unreachable!(),
        }
    }
    VarRef { name, subscripts }
}

/// Quoted string into a chain; `''` and `&&` unescape here, and the dot
/// after a substituted variable is consumed just like outside strings.
fn build_quoted(pair: Pair<Rule>, ctx: &mut HlasmContext) -> Vec<ConcatPart> {
    let mut chain = Vec::new();
    let mut after_var = false;
    for part in pair.into_inner() {
        let part = part.into_inner().next().unwrap();
        match part.as_rule() {
            Rule::var_ref => {
                chain.push(ConcatPart::Var(build_var_ref(part, ctx)));
                after_var = true;
            }
            Rule::str_chunk => {
                let mut text = part.as_str().replace("''", "'").replace("&&", "&");
                if after_var && text.starts_with('.') {
                    chain.push(ConcatPart::Dot);
                    text.remove(0);
                }
                if !text.is_empty() {
                    chain.push(ConcatPart::Str(text));
                }
                after_var = false;
            }
            _ => unreachable!(),
        }
    }
    chain
}

// ----- per-format entry points -----

pub fn parse_expr_text(text: &str, ctx: &mut HlasmContext) -> Option<Expr> {
    let mut pairs = HlasmParser::parse(Rule::asm_operand, text).ok()?;
    let operand = pairs.next()?;
    operand
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .map(|p| build_expr(p, ctx))
}

/// Subscript lists inside `&VAR(...)` references found by the scanner.
pub fn parse_subscripts(text: &str, ctx: &mut HlasmContext) -> Vec<Expr> {
    crate::scan::split_operands(text)
        .into_iter()
        .filter_map(|(piece, _)| parse_expr_text(piece.trim(), ctx))
        .collect()
}

pub fn parse_ca_operand(text: &str, ctx: &mut HlasmContext, range: Range) -> Operand {
    match HlasmParser::parse(Rule::ca_operand, text) {
        Ok(mut pairs) => {
            let inner = pairs.next().unwrap().into_inner().next().unwrap();
            match inner.as_rule() {
                Rule::ca_branch => {
                    let mut condition = None;
                    let mut target = hlasm::IdIndex::EMPTY;
                    for part in inner.into_inner() {
                        match part.as_rule() {
                            Rule::branch_condition => {
                                let expr = part.into_inner().next().unwrap();
                                condition = Some(build_expr(expr, ctx));
                            }
                            Rule::seq_symbol => {
                                target = ctx.add_id(&part.as_str()[1..]);
                            }
                            _ => unreachable!(),
                        }
                    }
                    Operand::CaBranch {
                        condition,
                        target,
                        range,
                    }
                }
                Rule::expr => Operand::CaExpr(build_expr(inner, ctx), range),
                _ => unreachable!(),
            }
        }
        Err(_) => Operand::Invalid(range),
    }
}

pub fn parse_var_decl(text: &str, ctx: &mut HlasmContext, range: Range) -> Operand {
    match HlasmParser::parse(Rule::var_decl, text) {
        Ok(mut pairs) => {
            let mut name = hlasm::IdIndex::EMPTY;
            let mut array = false;
            for part in pairs.next().unwrap().into_inner() {
                match part.as_rule() {
                    Rule::name => name = ctx.add_id(part.as_str()),
                    Rule::var_dimension => array = true,
                    _ => {}
                }
            }
            if name.is_empty() {
                Operand::Invalid(range)
            } else {
                Operand::VarDecl { name, array, range }
            }
        }
        Err(_) => Operand::Invalid(range),
    }
}

pub fn parse_asm_operand(text: &str, ctx: &mut HlasmContext, range: Range) -> Operand {
    if has_variable(text) {
        return Operand::Model(build_chain(text, ctx), range);
    }
    match parse_expr_text(text, ctx) {
        Some(expr) => Operand::Expr(expr, range),
        None => Operand::Invalid(range),
    }
}

pub fn parse_mach_operand(text: &str, ctx: &mut HlasmContext, range: Range) -> Operand {
    if has_variable(text) {
        return Operand::Model(build_chain(text, ctx), range);
    }
    match HlasmParser::parse(Rule::mach_operand, text) {
        Ok(mut pairs) => {
            let mut expr = None;
            let mut complex = false;
            for part in pairs.next().unwrap().into_inner() {
                match part.as_rule() {
                    Rule::expr => expr = Some(build_expr(part, ctx)),
                    Rule::mach_suffix => complex = true,
                    _ => {}
                }
            }
            match (expr, complex) {
                (Some(expr), false) => Operand::Expr(expr, range),
                (Some(_), true) => Operand::Complex(text.to_string(), range),
                (None, _) => Operand::Invalid(range),
            }
        }
        Err(_) => Operand::Invalid(range),
    }
}

pub fn parse_data_def(text: &str, ctx: &mut HlasmContext, range: Range) -> Operand {
    if has_variable(text) {
        return Operand::Model(build_chain(text, ctx), range);
    }
    match HlasmParser::parse(Rule::data_def, text) {
        Ok(mut pairs) => {
            let mut def = DataDef {
                dup: None,
                type_char: 'U',
                length: None,
                scale: None,
                nominal: None,
            };
            for part in pairs.next().unwrap().into_inner() {
                match part.as_rule() {
                    Rule::dup_factor => {
                        let inner = part.into_inner().next();
                        def.dup = Some(match inner {
                            Some(expr) if expr.as_rule() == Rule::expr => build_expr(expr, ctx),
                            Some(num) => Expr::Num(parse_dec(num.as_str())),
                            None => Expr::Num(1),
                        });
                    }
                    Rule::dd_type => {
                        def.type_char = part.as_str().chars().next().unwrap().to_ascii_uppercase()
                    }
                    Rule::dd_length => def.length = Some(build_modifier(part, ctx)),
                    Rule::dd_scale => def.scale = Some(build_modifier(part, ctx)),
                    Rule::dd_nominal => {
                        let inner = part.into_inner().next().unwrap();
                        match inner.as_rule() {
                            Rule::nominal_string => {
                                let chunk = inner.into_inner().next().unwrap();
                                def.nominal =
                                    Some(Nominal::Str(chunk.as_str().replace("''", "'")));
                            }
                            Rule::nominal_exprs => {
                                let exprs = inner
                                    .into_inner()
                                    .map(|e| build_expr(e, ctx))
                                    .collect();
                                def.nominal = Some(Nominal::Exprs(exprs));
                            }
                            _ => unreachable!(),
                        }
                    }
                    _ => {}
                }
            }
            Operand::DataDef(def, range)
        }
        Err(_) => Operand::Invalid(range),
    }
}

fn build_modifier(pair: Pair<Rule>, ctx: &mut HlasmContext) -> Expr {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::paren_expr => build_expr(inner.into_inner().next().unwrap(), ctx),
        Rule::number | Rule::signed_number => Expr::Num(parse_dec(inner.as_str())),
        _ => unreachable!(),
    }
}

pub fn parse_macro_arg(text: &str, ctx: &mut HlasmContext, range: Range) -> Operand {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Operand::Empty(range);
    }
    if let Some((name, value)) = split_keyword(trimmed) {
        if !has_variable(value) {
            let keyword = ctx.add_id(name);
            return Operand::MacroArg {
                keyword: Some(keyword),
                data: hlasm::macros::string_to_macrodata(value),
                range,
            };
        }
    }
    if has_variable(trimmed) {
        return Operand::Model(build_chain(trimmed, ctx), range);
    }
    Operand::MacroArg {
        keyword: None,
        data: hlasm::macros::string_to_macrodata(trimmed),
        range,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hlasm::ContextOptions;

    fn ctx() -> HlasmContext {
        HlasmContext::new("t", ContextOptions::default())
    }

    #[test]
    fn arithmetic_precedence() {
        let mut ctx = ctx();
        let expr = parse_expr_text("1+2*3", &mut ctx).unwrap();
        match expr {
            Expr::Binary(BinOp::Add, lhs, rhs) => {
                assert_eq!(*lhs, Expr::Num(1));
                assert!(matches!(*rhs, Expr::Binary(BinOp::Mul, _, _)));
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn self_defining_terms() {
        let mut ctx = ctx();
        assert_eq!(parse_expr_text("X'FF'", &mut ctx), Some(Expr::Num(255)));
        assert_eq!(parse_expr_text("B'1010'", &mut ctx), Some(Expr::Num(10)));
        assert_eq!(parse_expr_text("C'T'", &mut ctx), Some(Expr::Num(0xE3)));
    }

    #[test]
    fn attribute_references() {
        let mut ctx = ctx();
        let expr = parse_expr_text("L'X+L'Y", &mut ctx).unwrap();
        assert!(matches!(expr, Expr::Binary(BinOp::Add, _, _)));
        let expr = parse_expr_text("T'&P", &mut ctx).unwrap();
        assert!(matches!(
            expr,
            Expr::Attr(AttrKind::Type, AttrTarget::Var(_))
        ));
    }

    #[test]
    fn comparison_keywords_need_blanks() {
        let mut ctx = ctx();
        let expr = parse_expr_text("&V GE 10", &mut ctx).unwrap();
        assert!(matches!(expr, Expr::Binary(BinOp::Ge, _, _)));
        // GEORGE is a symbol, not a GE operator.
        assert!(parse_expr_text("GEORGE", &mut ctx).is_some());
    }

    #[test]
    fn ca_branches() {
        let mut ctx = ctx();
        let op = parse_ca_operand(".TGT", &mut ctx, Range::default());
        assert!(matches!(
            op,
            Operand::CaBranch {
                condition: None,
                ..
            }
        ));
        let op = parse_ca_operand("(2).A", &mut ctx, Range::default());
        assert!(matches!(
            op,
            Operand::CaBranch {
                condition: Some(_),
                ..
            }
        ));
        let op = parse_ca_operand("(&V GE 1)", &mut ctx, Range::default());
        assert!(matches!(op, Operand::CaExpr(_, _)));
    }

    #[test]
    fn data_definitions() {
        let mut ctx = ctx();
        let op = parse_data_def("FS24'6'", &mut ctx, Range::default());
        match op {
            Operand::DataDef(def, _) => {
                assert_eq!(def.type_char, 'F');
                assert_eq!(def.scale, Some(Expr::Num(24)));
                assert_eq!(def.nominal, Some(Nominal::Str("6".to_string())));
            }
            other => panic!("unexpected {:?}", other),
        }
        let op = parse_data_def("CL(D-C)'1'", &mut ctx, Range::default());
        match op {
            Operand::DataDef(def, _) => {
                assert_eq!(def.type_char, 'C');
                assert!(matches!(def.length, Some(Expr::Binary(BinOp::Sub, _, _))));
            }
            other => panic!("unexpected {:?}", other),
        }
        let op = parse_data_def("S(1,1)", &mut ctx, Range::default());
        match op {
            Operand::DataDef(def, _) => {
                assert_eq!(def.type_char, 'S');
                assert!(matches!(def.nominal, Some(Nominal::Exprs(ref v)) if v.len() == 2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn machine_address_operands_are_complex() {
        let mut ctx = ctx();
        let op = parse_mach_operand("0(1)", &mut ctx, Range::default());
        assert!(matches!(op, Operand::Complex(_, _)));
        let op = parse_mach_operand("15", &mut ctx, Range::default());
        assert!(matches!(op, Operand::Expr(Expr::Num(15), _)));
    }

    #[test]
    fn macro_arguments() {
        let mut ctx = ctx();
        let op = parse_macro_arg("KEY=5", &mut ctx, Range::default());
        assert!(matches!(
            op,
            Operand::MacroArg {
                keyword: Some(_),
                ..
            }
        ));
        let op = parse_macro_arg("(a,b,c)", &mut ctx, Range::default());
        match op {
            Operand::MacroArg { data, .. } => assert_eq!(data.number(), 3),
            other => panic!("unexpected {:?}", other),
        }
        let op = parse_macro_arg("&X", &mut ctx, Range::default());
        assert!(matches!(op, Operand::Model(_, _)));
    }
}
