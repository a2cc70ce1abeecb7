//! Operand value checks for machine and assembler instructions.
//!
//! Checks run in two waves: immediately when a statement's operands are
//! already resolvable, and again at finalization for operands that still
//! depended on forward-referenced symbols (the postponed list kept by the
//! ordinary context).

use crate::diagnostics::Diagnostic;
use crate::location::Range;

/// What a machine operand slot accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckClass {
    Register,
    Mask,
    ImmediateSigned(u8),
    ImmediateUnsigned(u8),
    /// Base-displacement or relocatable address.
    Address,
    RelAddr,
}

/// Evaluated operand as far as checking is concerned.
#[derive(Clone, Debug, PartialEq)]
pub enum CheckValue {
    Abs(i32),
    Reloc,
    /// Structured operand such as `D(X,B)`.
    Complex,
    Empty,
    /// Could not be resolved even at finalization.
    Unknown,
}

pub fn check_operand(
    instr: &str,
    class: CheckClass,
    value: &CheckValue,
    file: &str,
    range: Range,
) -> Option<Diagnostic> {
    match class {
        CheckClass::Register | CheckClass::Mask => match value {
            CheckValue::Abs(v) if (0..=15).contains(v) => None,
            CheckValue::Abs(_) => Some(Diagnostic::error(
                "M010",
                format!("operand of {} must be in range 0 to 15", instr),
                file,
                range,
            )),
            CheckValue::Reloc | CheckValue::Complex => Some(Diagnostic::error(
                "M011",
                format!("operand of {} must be an absolute value", instr),
                file,
                range,
            )),
            CheckValue::Empty | CheckValue::Unknown => None,
        },
        CheckClass::ImmediateSigned(bits) => {
            let bound = 1i64 << (bits - 1);
            check_abs_range(instr, value, -bound, bound - 1, file, range)
        }
        CheckClass::ImmediateUnsigned(bits) => {
            let bound = 1i64 << bits;
            check_abs_range(instr, value, 0, bound - 1, file, range)
        }
        CheckClass::Address | CheckClass::RelAddr => None,
    }
}

fn check_abs_range(
    instr: &str,
    value: &CheckValue,
    min: i64,
    max: i64,
    file: &str,
    range: Range,
) -> Option<Diagnostic> {
    match value {
        CheckValue::Abs(v) if (min..=max).contains(&(*v as i64)) => None,
        CheckValue::Abs(_) => Some(Diagnostic::error(
            "M010",
            format!(
                "immediate operand of {} must be in range {} to {}",
                instr, min, max
            ),
            file,
            range,
        )),
        CheckValue::Reloc | CheckValue::Complex => Some(Diagnostic::error(
            "M011",
            format!("operand of {} must be an absolute value", instr),
            file,
            range,
        )),
        CheckValue::Empty | CheckValue::Unknown => None,
    }
}

/// S-type address constants store an unsigned 12-bit displacement.
pub fn check_displacement(value: &CheckValue, file: &str, range: Range) -> Option<Diagnostic> {
    match value {
        CheckValue::Abs(v) if !(0..=4095).contains(v) => Some(Diagnostic::error(
            "D022",
            "displacement out of range 0 to 4095".to_string(),
            file,
            range,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_bounds() {
        let r = Range::line(0, 0, 2);
        assert!(check_operand("LR", CheckClass::Register, &CheckValue::Abs(15), "f", r).is_none());
        assert!(check_operand("LR", CheckClass::Register, &CheckValue::Abs(16), "f", r).is_some());
        assert!(check_operand("LR", CheckClass::Register, &CheckValue::Abs(-8), "f", r).is_some());
        assert!(check_operand("LR", CheckClass::Register, &CheckValue::Reloc, "f", r).is_some());
    }

    #[test]
    fn addresses_accept_relocatables() {
        let r = Range::line(0, 0, 2);
        assert!(check_operand("L", CheckClass::Address, &CheckValue::Reloc, "f", r).is_none());
        assert!(check_operand("L", CheckClass::Address, &CheckValue::Complex, "f", r).is_none());
    }

    #[test]
    fn negative_displacement_is_diagnosed() {
        let r = Range::line(0, 0, 2);
        let diag = check_displacement(&CheckValue::Abs(-1), "f", r).unwrap();
        assert_eq!(diag.code, "D022");
        assert!(check_displacement(&CheckValue::Abs(4095), "f", r).is_none());
    }
}
