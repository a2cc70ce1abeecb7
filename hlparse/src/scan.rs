//! Lexical scanners that sit below the grammar: top-level operand
//! splitting and concatenation-chain building for fields that need
//! variable substitution.

use hlasm::context::HlasmContext;
use hlasm::expression::{ConcatChain, ConcatPart, VarName, VarRef};

use crate::parser::parse_subscripts;
use crate::source::is_attribute_quote;

/// Splits an operand field at top-level commas, respecting parentheses
/// and quoted strings. Returns each piece with its column offset.
pub fn split_operands(text: &str) -> Vec<(String, u32)> {
    let chars: Vec<char> = text.chars().collect();
    let mut result = Vec::new();
    let mut piece = String::new();
    let mut piece_start = 0u32;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut index = 0usize;

    if chars.is_empty() {
        return result;
    }

    while index < chars.len() {
        let c = chars[index];
        if in_string {
            piece.push(c);
            if c == '\'' {
                if chars.get(index + 1) == Some(&'\'') {
                    piece.push('\'');
                    index += 2;
                    continue;
                }
                in_string = false;
            }
            index += 1;
            continue;
        }
        match c {
            '\'' if !is_attribute_quote(&chars, index) => {
                in_string = true;
                piece.push(c);
            }
            '(' => {
                depth += 1;
                piece.push(c);
            }
            ')' => {
                depth -= 1;
                piece.push(c);
            }
            ',' if depth <= 0 => {
                result.push((std::mem::take(&mut piece), piece_start));
                piece_start = index as u32 + 1;
            }
            c => piece.push(c),
        }
        index += 1;
    }
    result.push((piece, piece_start));
    result
}

/// True when the text contains a substitutable variable reference (a
/// single `&`; `&&` is the escaped ampersand).
pub fn has_variable(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let mut index = 0;
    while index < chars.len() {
        if chars[index] == '&' {
            if chars.get(index + 1) == Some(&'&') {
                index += 2;
                continue;
            }
            return true;
        }
        index += 1;
    }
    false
}

/// Builds a concatenation chain out of raw field text: literal runs,
/// variable references with subscripts, consumed dots and equals signs.
pub fn build_chain(text: &str, ctx: &mut HlasmContext) -> ConcatChain {
    let chars: Vec<char> = text.chars().collect();
    let mut chain = ConcatChain::new();
    let mut literal = String::new();
    let mut index = 0usize;

    while index < chars.len() {
        match chars[index] {
            '&' if chars.get(index + 1) == Some(&'&') => {
                // Kept verbatim; only quoted-string evaluation unescapes.
                literal.push('&');
                literal.push('&');
                index += 2;
            }
            '&' => {
                if !literal.is_empty() {
                    chain.push(ConcatPart::Str(std::mem::take(&mut literal)));
                }
                let (var, next) = scan_var_ref(&chars, index, ctx);
                chain.push(ConcatPart::Var(var));
                index = next;
                // A dot right after a variable is the consumed separator.
                if chars.get(index) == Some(&'.') {
                    chain.push(ConcatPart::Dot);
                    index += 1;
                }
            }
            '=' => {
                if !literal.is_empty() {
                    chain.push(ConcatPart::Str(std::mem::take(&mut literal)));
                }
                chain.push(ConcatPart::Equals);
                index += 1;
            }
            c => {
                literal.push(c);
                index += 1;
            }
        }
    }
    if !literal.is_empty() {
        chain.push(ConcatPart::Str(literal));
    }
    chain
}

/// Scans `&NAME`, `&NAME(subscripts)` or `&(created)` starting at the
/// ampersand; returns the reference and the index past it.
pub fn scan_var_ref(chars: &[char], start: usize, ctx: &mut HlasmContext) -> (VarRef, usize) {
    debug_assert!(chars[start] == '&');
    let mut index = start + 1;

    let name = if chars.get(index) == Some(&'(') {
        let end = matching_paren(chars, index).unwrap_or(chars.len());
        let inner: String = chars[index + 1..end.saturating_sub(1)].iter().collect();
        index = end;
        VarName::Created(build_chain(&inner, ctx))
    } else {
        let name_start = index;
        while index < chars.len() && is_name_char(chars[index], index == name_start) {
            index += 1;
        }
        let name: String = chars[name_start..index].iter().collect();
        VarName::Plain(ctx.add_id(&name))
    };

    let mut subscripts = Vec::new();
    if chars.get(index) == Some(&'(') {
        if let Some(end) = matching_paren(chars, index) {
            let inner: String = chars[index + 1..end - 1].iter().collect();
            subscripts = parse_subscripts(&inner, ctx);
            index = end;
        }
    }

    (VarRef { name, subscripts }, index)
}

fn is_name_char(c: char, first: bool) -> bool {
    if first {
        c.is_ascii_alphabetic() || matches!(c, '@' | '#' | '$' | '_')
    } else {
        c.is_ascii_alphanumeric() || matches!(c, '@' | '#' | '$' | '_')
    }
}

/// Index just past the parenthesis matching the one at `start`.
fn matching_paren(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut index = start;
    while index < chars.len() {
        let c = chars[index];
        if in_string {
            if c == '\'' {
                if chars.get(index + 1) == Some(&'\'') {
                    index += 2;
                    continue;
                }
                in_string = false;
            }
            index += 1;
            continue;
        }
        match c {
            '\'' if !is_attribute_quote(chars, index) => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index + 1);
                }
            }
            _ => {}
        }
        index += 1;
    }
    None
}
