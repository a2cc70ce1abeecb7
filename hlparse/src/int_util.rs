//! Integer parsing for self-defining terms.
//!
//! Hexadecimal and binary terms are unsigned bit patterns that truncate
//! into the 32-bit value space (`X'FFFFFFFF'` is -1), while decimal terms
//! are signed and saturate on overflow.

use num::Num;

pub fn parse_dec(text: &str) -> i32 {
    match <i64 as Num>::from_str_radix(text, 10) {
        Ok(value) => value
            .max(i64::from(i32::min_value()))
            .min(i64::from(i32::max_value())) as i32,
        Err(_) => 0,
    }
}

pub fn parse_radix_trunc(text: &str, radix: u32) -> i32 {
    // Wide parse first so long bit patterns keep their low 32 bits.
    match <u64 as Num>::from_str_radix(text, radix) {
        Ok(value) => value as u32 as i32,
        Err(_) => 0,
    }
}

/// `C'…'` terms pack up to four EBCDIC bytes, last character lowest.
pub fn char_term_value(text: &str) -> i32 {
    let mut value: u32 = 0;
    for c in text.chars() {
        value = (value << 8) | u32::from(hlasm::ebcdic::ascii_to_ebcdic(c));
    }
    value as i32
}
