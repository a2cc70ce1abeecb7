//! Ordinary symbols: EQU chains, sections, location counters, deferred
//! DC lengths and the cycle policy.

use super::*;
use hlasm::ordinary::SectionKind;

fn section_defined(ctx: &HlasmContext, name: &str, kind: SectionKind) -> bool {
    ctx.ids()
        .find(name)
        .map(|id| ctx.ord.section_defined(id, kind))
        .unwrap_or(false)
}

#[test]
fn machine_instruction_duplication() {
    let ctx = analyze(
        "
lbl lr 1,1
lcl lr 1,1
lbl lr 1,1
",
    );
    assert!(defined(&ctx, "lbl"));
    assert!(defined(&ctx, "lcl"));
    assert_eq!(diag_codes(&ctx), vec!["E011"]);
}

#[test]
fn section_continuation() {
    let ctx = analyze(
        "
A CSECT
B DSECT
A CSECT
B DSECT
",
    );
    assert!(section_defined(&ctx, "A", SectionKind::Executable));
    assert!(section_defined(&ctx, "B", SectionKind::Dummy));
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn section_duplication() {
    let ctx = analyze(
        "
A CSECT
A DSECT
",
    );
    assert!(section_defined(&ctx, "A", SectionKind::Executable));
    assert_eq!(diag_codes(&ctx), vec!["E011"]);
}

#[test]
fn simple_equ() {
    let ctx = analyze(
        "
A EQU 1
 LR A,A
",
    );
    assert_eq!(abs(&ctx, "A"), 1);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn complex_equ_value_out_of_register_range() {
    let ctx = analyze(
        "
A EQU 1
B EQU A+A-10
 LR A,B
",
    );
    assert_eq!(abs(&ctx, "B"), -8);
    assert_eq!(diag_codes(&ctx), vec!["M010"]);
}

#[test]
fn forward_equ_chain() {
    let ctx = analyze(
        "
A EQU B+1
B EQU C+1
C EQU 10
 LR A,B
",
    );
    assert_eq!(abs(&ctx, "A"), 12);
    assert_eq!(abs(&ctx, "B"), 11);
    assert_eq!(abs(&ctx, "C"), 10);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn reloc_difference_resolves_forward() {
    let ctx = analyze(
        "
D EQU Y-X

X LR 1,1
Y LR 1,1
 LR D,D
",
    );
    assert_eq!(abs(&ctx, "D"), 2);
    assert_eq!(value_kind(&ctx, "X"), SymbolValueKind::Reloc);
    assert_eq!(value_kind(&ctx, "Y"), SymbolValueKind::Reloc);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn cyclic_dependency_defaults_every_member() {
    let ctx = analyze(
        "
A EQU B+1
B EQU C+1
C EQU A
",
    );
    for name in ["A", "B", "C"] {
        assert_eq!(value_kind(&ctx, name), SymbolValueKind::Abs);
        assert_eq!(abs(&ctx, name), 0);
    }
    assert_eq!(diag_codes(&ctx), vec!["E049"]);
}

#[test]
fn postponed_check_fires_after_resolution() {
    let ctx = analyze(
        "
 LR A,1
A EQU B+1
B EQU 100
",
    );
    assert_eq!(abs(&ctx, "A"), 101);
    assert_eq!(diag_codes(&ctx), vec!["M010"]);
}

#[test]
fn relocatable_register_operand() {
    let ctx = analyze(
        "
 LR A,1
A LR 1,1
",
    );
    assert_eq!(value_kind(&ctx, "A"), SymbolValueKind::Reloc);
    assert_eq!(diag_codes(&ctx), vec!["M011"]);
}

#[test]
fn relocatable_multiplication_is_invalid() {
    let ctx = analyze(
        "
A LR 1,1
B LR A*2,1
",
    );
    assert_eq!(value_kind(&ctx, "A"), SymbolValueKind::Reloc);
    assert_eq!(diag_codes(&ctx), vec!["E060"]);
}

#[test]
fn relocatable_difference_cancels_in_operand() {
    let ctx = analyze(
        "
X LR 1,1
Y LR 1,1
  LR -X+Y,1
",
    );
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn complex_relocatable_combinations() {
    let ctx = analyze(
        "
A CSECT
X1 LR 1,1
Y1 LR 1,1

B CSECT
X2 LR 1,1
Y2 LR 1,1

C CSECT
U EQU X1+X2
V EQU Y1+Y2
F EQU V-U

 LR F,F
",
    );
    assert_eq!(value_kind(&ctx, "U"), SymbolValueKind::Reloc);
    assert_eq!(value_kind(&ctx, "V"), SymbolValueKind::Reloc);
    assert_eq!(value_kind(&ctx, "F"), SymbolValueKind::Abs);
    assert_eq!(abs(&ctx, "F"), 4);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn loctr_bases_assigned_at_end() {
    let ctx = analyze(
        "
A CSECT
X LR 1,1
B LOCTR
Y LR 1,1
A LOCTR
  LR 1,1
  LR 1,1
  LR 1,1
  LR 1,1
  LR 1,1
  LR 1,1

Z EQU Y-X
 LR Z,Z
",
    );
    assert_eq!(value_kind(&ctx, "Z"), SymbolValueKind::Abs);
    assert_eq!(abs(&ctx, "Z"), 16);
    assert_eq!(diag_codes(&ctx), vec!["M010", "M010"]);
}

#[test]
fn loctr_names_resume_across_sections() {
    let ctx = analyze(
        "
A CSECT
  LR 1,1
L LOCTR
X LR 1,1
B CSECT
  LR 1,1
L LOCTR
Y LR 1,1

Z EQU Y-X
",
    );
    assert_eq!(abs(&ctx, "Z"), 2);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn location_counter_reference() {
    let ctx = analyze(
        "
A LR 1,1
B EQU *-A
C EQU *-*
D EQU *
E EQU *
 LR 1,1
F EQU *
G EQU *+1

X1 EQU G-F
X2 EQU E-D
X3 EQU F-E

 LR B,1
",
    );
    assert_eq!(value_kind(&ctx, "A"), SymbolValueKind::Reloc);
    assert_eq!(abs(&ctx, "B"), 2);
    assert_eq!(abs(&ctx, "C"), 0);
    assert_eq!(abs(&ctx, "X1"), 1);
    assert_eq!(abs(&ctx, "X2"), 0);
    assert_eq!(abs(&ctx, "X3"), 2);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn equ_length_explicit() {
    let ctx = analyze(
        "
Y EQU X,12
X EQU 5,2
",
    );
    assert_eq!(abs(&ctx, "X"), 5);
    assert_eq!(length(&ctx, "X"), 2);
    assert_eq!(abs(&ctx, "Y"), 5);
    assert_eq!(length(&ctx, "Y"), 12);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn equ_length_implicit() {
    let ctx = analyze(
        "
X EQU 5,2
Y EQU X
Z EQU 1+X
ZZ EQU *+X
",
    );
    assert_eq!(length(&ctx, "Y"), 2);
    assert_eq!(length(&ctx, "Z"), 1);
    assert_eq!(length(&ctx, "ZZ"), 1);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn equ_length_through_attribute() {
    let ctx = analyze(
        "
LEN EQU 11
X EQU UNKNOWN,LEN
UNKNOWN EQU L'X
",
    );
    assert_eq!(abs(&ctx, "X"), 11);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn equ_length_bounds() {
    let ctx = analyze(
        "
A EQU 1,12
LEN EQU 1+A,-100
LEM EQU A+1,100000
",
    );
    assert_eq!(length(&ctx, "LEN"), 1);
    assert_eq!(length(&ctx, "LEM"), 12);
    assert_eq!(diag_codes(&ctx), vec!["E062", "E062"]);
}

#[test]
fn equ_type_attribute() {
    let ctx = analyze("\nLEN EQU 11,3,4\n");
    assert_eq!(type_attr(&ctx, "LEN"), 4);
    assert_eq!(length(&ctx, "LEN"), 3);
    assert_eq!(diag_count(&ctx), 0);

    let ctx = analyze("\nLEN EQU 11,3\n");
    assert_eq!(type_attr(&ctx, "LEN"), b'U');
    assert_eq!(diag_count(&ctx), 0);

    let ctx = analyze(
        "
LEN EQU 11,1,-1
LEM EQU 11,1,300
",
    );
    assert_eq!(type_attr(&ctx, "LEN"), b'U');
    assert_eq!(type_attr(&ctx, "LEM"), b'U');
    assert_eq!(diag_codes(&ctx), vec!["E062", "E062"]);
}

#[test]
fn dc_undefined_symbol_in_length() {
    let ctx = analyze(
        "
A DC CL(D-C)'1'
B LR 1,1
C LR 1,1

R EQU B-A
",
    );
    assert_eq!(diag_count(&ctx), 2);
    assert!(diag_codes(&ctx).contains(&"E044"));
}

#[test]
fn dc_forward_length_resolves() {
    let ctx = analyze(
        "
A DC CL(C-B)'1'
B LR 1,1
C LR 1,1

R EQU B-A
",
    );
    assert_eq!(abs(&ctx, "R"), 2);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn dc_backward_length_is_immediate() {
    let ctx = analyze(
        "
A LR 1,1
  LR 1,1
B DC CL(B-A)'ABCD'
C LR 1,1

R EQU C-B
",
    );
    assert_eq!(abs(&ctx, "R"), 4);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn dc_implied_length_with_alignment() {
    let ctx = analyze(
        "
A LR 1,1
B DC S(1,1)
C LR 1,1

R EQU C-B
",
    );
    assert_eq!(abs(&ctx, "R"), 4);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn dc_displacement_out_of_range() {
    let ctx = analyze(
        "
B DC S(C,-1)
C LR 1,1

R EQU C-B
",
    );
    assert_eq!(diag_codes(&ctx), vec!["D022"]);
}

#[test]
fn dc_length_cycle_through_space() {
    let ctx = analyze(
        "
A DC BL(B-A)'101'
B LR 1,1
",
    );
    assert_eq!(diag_codes(&ctx), vec!["E049"]);
}

#[test]
fn dc_cycle_across_two_gaps() {
    let ctx = analyze(
        "
A DC AL(D-C)(1,1,1)
B LR 1,1
C DC CL(B-A)'1'
D LR 1,1
",
    );
    assert_eq!(diag_codes(&ctx), vec!["E049"]);
}

#[test]
fn dc_length_attribute_from_expression() {
    let ctx = analyze(
        "
X EQU -12
A DC CL(X+14)'A'
",
    );
    assert_eq!(length(&ctx, "A"), 2);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn dc_scale_attribute_from_expression() {
    let ctx = analyze(
        "
X EQU 22
A DC FS(X+14)'1'
",
    );
    assert_eq!(scale(&ctx, "A"), 36);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn dc_length_cycle_backward_reference() {
    let ctx = analyze(
        "
X DC CL(A+1)'X'
A EQU L'X
",
    );
    assert_eq!(abs(&ctx, "A"), 0);
    assert_eq!(length(&ctx, "X"), 1);
    assert_eq!(diag_codes(&ctx), vec!["E049"]);
}

#[test]
fn dc_length_cycle_forward_reference() {
    let ctx = analyze(
        "
A EQU L'X
X DC CL(A+1)'X'
",
    );
    assert_eq!(abs(&ctx, "A"), 0);
    assert_eq!(length(&ctx, "X"), 1);
    assert_eq!(diag_codes(&ctx), vec!["E049"]);
}

#[test]
fn dc_length_references_without_cycle() {
    let ctx = analyze(
        "
A EQU L'X
X DC CL(Y)'X'
Y EQU L'A
",
    );
    assert_eq!(abs(&ctx, "A"), 1);
    assert_eq!(length(&ctx, "X"), 1);
    assert_eq!(abs(&ctx, "Y"), 1);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn dc_self_referential_length() {
    let ctx = analyze("\nX DC CL(L'X)'X'\n");
    assert_eq!(length(&ctx, "X"), 1);
    assert_eq!(diag_codes(&ctx), vec!["E049"]);
}

#[test]
fn symbol_locations_track_their_streams() {
    let lib = crate::VecLibProvider::new(&[("COPYF", "XXX EQU 1")]);
    let ctx = analyze_with(
        "
 MACRO
 M
XX EQU 1
 MEND

X EQU 1
 M
 COPY COPYF
",
        &lib,
    );
    assert_eq!(diag_count(&ctx), 0);

    let x = ctx.ids().find("X").unwrap();
    let xx = ctx.ids().find("XX").unwrap();
    let xxx = ctx.ids().find("XXX").unwrap();
    let loc = |id| ctx.ord.get_symbol(id).unwrap().location.clone();
    assert_eq!(loc(x).file, "test");
    assert_eq!(loc(x).pos.line, 6);
    assert_eq!(loc(xx).file, "test");
    assert_eq!(loc(xx).pos.line, 3);
    assert_eq!(loc(xxx).file, "COPYF");
    assert_eq!(loc(xxx).pos.line, 0);
}

#[test]
fn org_rebinds_and_rewinds() {
    let ctx = analyze(
        "
A CSECT
  DS XL8
B EQU *
  ORG A+2
C EQU *
X EQU B-C
  ORG ,
D EQU *
Y EQU D-C
",
    );
    assert_eq!(abs(&ctx, "X"), 6);
    assert_eq!(abs(&ctx, "Y"), 6);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn end_stops_the_analysis() {
    let ctx = analyze(
        "
 LR 1,1
 END
X EQU 1
",
    );
    assert!(!defined(&ctx, "X"));
    assert_eq!(diag_count(&ctx), 0);
}
