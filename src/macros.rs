//! Macro definitions, invocation frames and parameter binding.

use std::collections::HashMap;
use std::rc::Rc;

use crate::diagnostics::{Diagnostic, DiagnosticSink, RelatedLocation};
use crate::ids::IdIndex;
use crate::location::{Location, Range};
use crate::statement::Statement;
use crate::variables::MacroParamData;

#[derive(Clone, Debug)]
pub struct MacroDefinition {
    pub name: IdIndex,
    pub label_param: Option<IdIndex>,
    /// Positional parameters in prototype order; `None` for an unnamed
    /// placeholder (`MAC &A,,&B`).
    pub positional: Vec<Option<IdIndex>>,
    /// Keyword parameters with their default values.
    pub keywords: HashMap<IdIndex, MacroParamData>,
    /// Cached body statements, MEND excluded.
    pub body: Vec<Statement>,
    /// Sequence symbols of the body, pre-indexed for O(1) jumps.
    pub labels: HashMap<IdIndex, usize>,
    pub location: Location,
    /// Comment lines directly above the definition, kept for hover.
    pub documentation: String,
}

/// One argument of a macro call; `keyword` is set for `NAME=value`.
#[derive(Clone, Debug)]
pub struct MacroArg {
    pub keyword: Option<IdIndex>,
    pub keyword_text: String,
    pub data: MacroParamData,
    pub range: Range,
}

#[derive(Debug)]
pub struct MacroInvocation {
    pub def: Rc<MacroDefinition>,
    pub current_statement: usize,
    pub named: HashMap<IdIndex, MacroParamData>,
    /// `&SYSLIST`; element zero is the label argument.
    pub syslist: Vec<MacroParamData>,
    pub sysndx: u32,
    pub copy_stack: Vec<crate::copy::CopyFrame>,
}

impl MacroDefinition {
    /// Binds call arguments to parameters, reporting unknown and
    /// duplicate keywords. The first occurrence of a duplicated keyword
    /// wins; unknown keywords degrade to positional leaves.
    pub fn call(
        self: &Rc<Self>,
        label: Option<MacroParamData>,
        args: Vec<MacroArg>,
        sysndx: u32,
        file: &str,
        stack: &[RelatedLocation],
        diags: &mut DiagnosticSink,
    ) -> MacroInvocation {
        let mut named: HashMap<IdIndex, MacroParamData> = HashMap::new();
        let mut syslist = vec![label.clone().unwrap_or_else(MacroParamData::empty)];
        let mut positional_index = 0usize;

        let mut bind_positional = |data: MacroParamData,
                                   named: &mut HashMap<IdIndex, MacroParamData>,
                                   syslist: &mut Vec<MacroParamData>| {
            syslist.push(data.clone());
            if let Some(Some(param)) = self.positional.get(positional_index) {
                named.insert(*param, data);
            }
            positional_index += 1;
        };

        for arg in args {
            match arg.keyword {
                Some(keyword) if self.keywords.contains_key(&keyword) => {
                    if named.contains_key(&keyword) {
                        diags.add(
                            Diagnostic::duplicate_keyword(&arg.keyword_text, file, arg.range),
                            stack,
                        );
                    } else {
                        named.insert(keyword, arg.data);
                    }
                }
                Some(_) => {
                    diags.add(
                        Diagnostic::unknown_keyword(&arg.keyword_text, file, arg.range),
                        stack,
                    );
                    let rendered = format!("{}={}", arg.keyword_text, arg.data.value());
                    bind_positional(MacroParamData::Single(rendered), &mut named, &mut syslist);
                }
                None => bind_positional(arg.data, &mut named, &mut syslist),
            }
        }

        for (keyword, default) in &self.keywords {
            named.entry(*keyword).or_insert_with(|| default.clone());
        }
        for param in self.positional.iter().flatten() {
            named.entry(*param).or_insert_with(MacroParamData::empty);
        }
        if let Some(label_param) = self.label_param {
            named.insert(
                label_param,
                label.unwrap_or_else(MacroParamData::empty),
            );
        }

        MacroInvocation {
            def: Rc::clone(self),
            current_statement: 0,
            named,
            syslist,
            sysndx,
            copy_stack: Vec::new(),
        }
    }
}

impl MacroInvocation {
    /// `&SYSLIST(i)` and deeper subscripts. The first subscript indexes
    /// the argument list directly (zero is the label), the rest walk the
    /// sublist tree one-based.
    pub fn syslist_get(&self, subscripts: &[usize]) -> String {
        match subscripts.split_first() {
            None => self
                .syslist
                .get(1)
                .map(MacroParamData::value)
                .unwrap_or_default(),
            Some((&first, rest)) => self
                .syslist
                .get(first)
                .and_then(|data| data.get_nested(rest))
                .map(MacroParamData::value)
                .unwrap_or_default(),
        }
    }
}

/// Splits `NAME=value` (or `&NAME=value` in prototypes) keyword syntax
/// off a macro argument; `None` when the text is not keyword shaped.
pub fn split_keyword(text: &str) -> Option<(&str, &str)> {
    let stripped = text.strip_prefix('&').unwrap_or(text);
    let eq = stripped.find('=')?;
    let (name, value) = stripped.split_at(eq);
    let mut chars = name.chars();
    let first = chars.next()?;
    let first_ok = first.is_ascii_alphabetic() || matches!(first, '@' | '#' | '$' | '_');
    if !first_ok
        || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '#' | '$' | '_'))
    {
        return None;
    }
    Some((name, &value[1..]))
}

/// Parses a composite argument `(a,b,(c,d))` into a sublist tree. Inputs
/// that are not a single balanced parenthesized list stay as one leaf.
pub fn string_to_macrodata(text: &str) -> MacroParamData {
    let bytes: Vec<char> = text.chars().collect();
    if bytes.first() != Some(&'(') || bytes.last() != Some(&')') {
        return MacroParamData::Single(text.to_string());
    }
    match parse_sublist(&bytes, 0) {
        Some((data, consumed)) if consumed == bytes.len() => data,
        _ => MacroParamData::Single(text.to_string()),
    }
}

/// Parses one parenthesized sublist starting at `start`; returns the data
/// and the index just past the closing parenthesis.
fn parse_sublist(chars: &[char], start: usize) -> Option<(MacroParamData, usize)> {
    debug_assert!(chars[start] == '(');
    let mut items = Vec::new();
    let mut item = String::new();
    let mut item_start = true;
    let mut index = start + 1;

    while index < chars.len() {
        match chars[index] {
            ')' => {
                items.push(MacroParamData::Single(item));
                return Some((MacroParamData::Composite(items), index + 1));
            }
            ',' => {
                items.push(MacroParamData::Single(std::mem::take(&mut item)));
                item_start = true;
                index += 1;
                continue;
            }
            '(' if item_start => {
                // A nested sublist is composite only when it spans the
                // whole item; otherwise the item is a leaf like `(1,2)b`.
                let (nested, after) = parse_sublist(chars, index)?;
                match chars.get(after) {
                    Some(',') => {
                        items.push(nested);
                        index = after + 1;
                        item_start = true;
                        continue;
                    }
                    Some(')') => {
                        items.push(nested);
                        return Some((MacroParamData::Composite(items), after + 1));
                    }
                    _ => {
                        item.extend(chars[index..after].iter());
                        index = after;
                        item_start = false;
                        continue;
                    }
                }
            }
            '(' => {
                let after = skip_balanced(chars, index)?;
                item.extend(chars[index..after].iter());
                index = after;
                item_start = false;
                continue;
            }
            '\'' => {
                let after = skip_quoted(chars, index)?;
                item.extend(chars[index..after].iter());
                index = after;
                item_start = false;
                continue;
            }
            c => {
                item.push(c);
                item_start = false;
                index += 1;
            }
        }
    }
    None
}

fn skip_balanced(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0;
    let mut index = start;
    while index < chars.len() {
        match chars[index] {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index + 1);
                }
            }
            '\'' => {
                index = skip_quoted(chars, index)? - 1;
            }
            _ => {}
        }
        index += 1;
    }
    None
}

fn skip_quoted(chars: &[char], start: usize) -> Option<usize> {
    debug_assert!(chars[start] == '\'');
    let mut index = start + 1;
    while index < chars.len() {
        if chars[index] == '\'' {
            if chars.get(index + 1) == Some(&'\'') {
                index += 2;
                continue;
            }
            return Some(index + 1);
        }
        index += 1;
    }
    None
}
