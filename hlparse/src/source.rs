//! Physical-line handling: continuation splicing, comment detection and
//! the column-driven split into label, instruction and operand fields.
//!
//! HLASM is column oriented: a label starts in column 1, a non-blank in
//! column 72 continues the statement on the next line starting at column
//! 16, and `*` or `.*` in column 1 marks a comment line. Everything past
//! the operand field is a remark, separated by the first blank outside
//! quotes and parentheses.

const CONTINUE_COLUMN: usize = 71;
const CONTINUATION_INDENT: usize = 15;

/// One logical statement: spliced text plus the physical line it starts
/// on. Comment and blank lines become empty statements so statement
/// indices stay stable for rewinds.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalLine {
    pub text: String,
    pub line: u32,
    pub is_comment: bool,
    /// Comment text of the directly preceding `*` lines, kept for macro
    /// documentation hovers.
    pub leading_comments: Vec<String>,
}

pub fn split_logical_lines(input: &str) -> Vec<LogicalLine> {
    let mut result = Vec::new();
    let mut lines = input.lines().enumerate().peekable();
    let mut comment_run: Vec<String> = Vec::new();

    while let Some((index, line)) = lines.next() {
        let trimmed_end = line.trim_end();
        if trimmed_end.starts_with('*') || trimmed_end.starts_with(".*") {
            comment_run.push(trimmed_end.trim_start_matches('*').trim().to_string());
            // A continued comment swallows its continuation lines.
            let mut continued = is_continued(line);
            while continued {
                match lines.next() {
                    Some((_, next)) => continued = is_continued(next),
                    None => break,
                }
            }
            result.push(LogicalLine {
                text: String::new(),
                line: index as u32,
                is_comment: true,
                leading_comments: Vec::new(),
            });
            continue;
        }

        let mut text = clip_continuation(line).to_string();
        let mut continued = is_continued(line);
        while continued {
            match lines.next() {
                Some((_, next)) => {
                    let chars: Vec<char> = clip_continuation(next).chars().collect();
                    let tail: String = chars
                        .get(CONTINUATION_INDENT..)
                        .map(|slice| slice.iter().collect())
                        .unwrap_or_default();
                    text.push_str(tail.trim_end());
                    continued = is_continued(next);
                }
                None => break,
            }
        }

        result.push(LogicalLine {
            text: text.trim_end().to_string(),
            line: index as u32,
            is_comment: false,
            leading_comments: std::mem::take(&mut comment_run),
        });
    }
    result
}

fn is_continued(line: &str) -> bool {
    line.chars()
        .nth(CONTINUE_COLUMN)
        .map(|c| c != ' ')
        .unwrap_or(false)
}

fn clip_continuation(line: &str) -> &str {
    match line.char_indices().nth(CONTINUE_COLUMN) {
        Some((byte, _)) => &line[..byte],
        None => line,
    }
}

/// The three raw fields of a statement line with their column offsets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawFields {
    pub label: String,
    pub label_col: u32,
    pub instruction: String,
    pub instr_col: u32,
    pub operands: String,
    pub ops_col: u32,
    pub len: u32,
}

pub fn split_fields(text: &str) -> RawFields {
    let chars: Vec<char> = text.chars().collect();
    let mut fields = RawFields {
        len: chars.len() as u32,
        ..RawFields::default()
    };
    let mut cursor = 0usize;

    if chars.first().map(|&c| c != ' ').unwrap_or(false) {
        let end = chars
            .iter()
            .position(|&c| c == ' ')
            .unwrap_or(chars.len());
        fields.label = chars[..end].iter().collect();
        fields.label_col = 0;
        cursor = end;
    }

    while cursor < chars.len() && chars[cursor] == ' ' {
        cursor += 1;
    }
    let instr_start = cursor;
    while cursor < chars.len() && chars[cursor] != ' ' {
        cursor += 1;
    }
    fields.instruction = chars[instr_start..cursor].iter().collect();
    fields.instr_col = instr_start as u32;

    while cursor < chars.len() && chars[cursor] == ' ' {
        cursor += 1;
    }
    let ops_start = cursor;
    let ops_end = operand_field_end(&chars, ops_start);
    fields.operands = chars[ops_start..ops_end].iter().collect();
    fields.ops_col = ops_start as u32;

    fields
}

/// End of the operand field: the first blank at paren depth zero outside
/// quoted strings. Attribute quotes (`L'X`) do not open strings.
fn operand_field_end(chars: &[char], start: usize) -> usize {
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
            '\'' => {
                if !is_attribute_quote(chars, index) {
                    in_string = true;
                }
            }
            '(' => depth += 1,
            ')' => depth -= 1,
            ' ' if depth <= 0 => return index,
            _ => {}
        }
        index += 1;
    }
    chars.len()
}

/// `X'…'` is a term only when the letter before the quote starts a token;
/// in `L'SYM` the quote belongs to the attribute reference.
pub fn is_attribute_quote(chars: &[char], quote: usize) -> bool {
    let letter = match quote.checked_sub(1).and_then(|i| chars.get(i)) {
        Some(c) => *c,
        None => return false,
    };
    if !matches!(
        letter.to_ascii_uppercase(),
        'L' | 'T' | 'S' | 'I' | 'K' | 'N' | 'O' | 'D'
    ) {
        return false;
    }
    let before = quote.checked_sub(2).and_then(|i| chars.get(i));
    let token_start = match before {
        None => true,
        Some(c) => !c.is_ascii_alphanumeric() && !matches!(c, '@' | '#' | '$' | '_' | '\''),
    };
    // The quote must not terminate a string instead.
    token_start && chars.get(quote + 1).map(|&c| c != ' ').unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fields_by_columns() {
        let fields = split_fields("LBL   LR   1,1    a remark");
        assert_eq!(fields.label, "LBL");
        assert_eq!(fields.instruction, "LR");
        assert_eq!(fields.operands, "1,1");
        assert_eq!(fields.ops_col, 11);
    }

    #[test]
    fn no_label_when_column_one_is_blank() {
        let fields = split_fields("  LR 1,1");
        assert_eq!(fields.label, "");
        assert_eq!(fields.instruction, "LR");
    }

    #[test]
    fn remark_after_quoted_operand() {
        let fields = split_fields("X DC C'A B'   remark");
        assert_eq!(fields.operands, "C'A B'");
    }

    #[test]
    fn attribute_quote_does_not_open_string() {
        let fields = split_fields("&A SETA L'X remark");
        assert_eq!(fields.operands, "L'X");
    }

    #[test]
    fn continuation_splices_at_column_16() {
        let mut first = "      AGO".to_string();
        while first.chars().count() < CONTINUE_COLUMN {
            first.push(' ');
        }
        first.push('x');
        let second = "               .HERE";
        let input = format!("{}\n{}", first, second);
        let lines = split_logical_lines(&input);
        assert_eq!(lines.len(), 1);
        let fields = split_fields(&lines[0].text);
        assert_eq!(fields.instruction, "AGO");
        assert_eq!(fields.operands, ".HERE");
    }

    #[test]
    fn comments_stay_empty_but_indexed() {
        let lines = split_logical_lines("*COMMENT\n LR 1,1");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].is_comment);
        assert_eq!(lines[1].leading_comments, vec!["COMMENT".to_string()]);
    }
}
