//! Sequence-symbol and attribute lookahead.

use super::*;
use crate::VecLibProvider;

#[test]
fn forward_jump_success() {
    let ctx = analyze(
        r"
   AGO .A
&new seta 1
.A ANOP
",
    );
    assert!(!var_defined(&ctx, "new"));
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn forward_jump_to_continued_statement() {
    let mut target = ".HERE LR".to_string();
    while target.chars().count() < 71 {
        target.push(' ');
    }
    target.push('x');
    let input = format!(
        "
      AGO      .HERE
&bad seta 1
{}
               1,1
&good seta 1
      LR 1,1
",
        target
    );
    let ctx = analyze(&input);
    assert!(!var_defined(&ctx, "bad"));
    assert!(var_defined(&ctx, "good"));
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn forward_jump_over_unparsable_lines() {
    let ctx = analyze(
        r"
   AGO .A
&new seta 1
das cvx
tr9023-22
=f2 **
.A ANOP",
    );
    assert!(!var_defined(&ctx, "new"));
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn forward_jump_fail_falls_through() {
    let ctx = analyze(
        r"
   AGO .A
&new seta 1
.B ANOP
",
    );
    assert!(var_defined(&ctx, "new"));
    assert_eq!(diag_codes(&ctx), vec!["E032"]);
}

#[test]
fn backward_jumps_exhaust_actr() {
    let ctx = analyze(
        r"
 ACTR 2
.A ANOP
 AGO .A",
    );
    assert_eq!(diag_codes(&ctx), vec!["E033"]);

    let ctx = analyze(
        r"
 ACTR 2
.A ANOP
 AGO .A
",
    );
    assert_eq!(diag_codes(&ctx), vec!["E033"]);
}

#[test]
fn forward_jump_over_comments() {
    let ctx = analyze(
        r"
 AGO .A
 BAD_INSTR
*COMMENT
.A ANOP
",
    );
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn forward_jump_over_continued_comment() {
    let mut comment = "*COMMENT".to_string();
    while comment.chars().count() < 71 {
        comment.push(' ');
    }
    comment.push('X');
    let input = format!(
        "
 AGO .A
 BAD_INSTR
{}
 IGNORED         COMMENT
.A ANOP
",
        comment
    );
    let ctx = analyze(&input);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn equ_attributes_resolve_forward() {
    let ctx = analyze(
        r"
&A SETC T'X
&B SETA L'X
X EQU 1,10,C'T'
&C SETA L'Y
Y EQU X+1
",
    );
    assert_eq!(setc(&ctx, "A"), "T");
    assert_eq!(seta(&ctx, "B"), 10);
    assert_eq!(seta(&ctx, "C"), 10);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn scale_attribute_of_an_equate_is_invalid() {
    let ctx = analyze(
        r"
&A SETA S'X
X EQU 1,10,C'T'
",
    );
    assert_eq!(seta(&ctx, "A"), 0);
    assert_eq!(diag_count(&ctx), 1);
}

#[test]
fn unresolvable_length_defaults_after_lookahead() {
    let ctx = analyze(
        r"
&A SETA L'X
X EQU 1,Y+11,C'T'
",
    );
    assert_eq!(seta(&ctx, "A"), 1);
    assert_eq!(diag_count(&ctx), 2);
    assert!(diag_codes(&ctx).contains(&"E052"));
    assert!(diag_codes(&ctx).contains(&"E044"));
}

#[test]
fn skipped_statement_with_bad_type_operand_still_answers() {
    let ctx = analyze(
        r"
&A SETA L'X
 AGO .A
X EQU 1,2,**&
.A ANOP
",
    );
    assert_eq!(seta(&ctx, "A"), 2);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn skipped_statement_with_model_type_operand_still_answers() {
    let ctx = analyze(
        r"
&A SETA L'X
 AGO .A
X EQU 1,2,&a
.A ANOP
",
    );
    assert_eq!(seta(&ctx, "A"), 2);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn model_value_operand_blocks_extraction() {
    let ctx = analyze(
        r"
&A SETA L'X
 AGO .A
X EQU &a,2
.A ANOP
",
    );
    assert_eq!(seta(&ctx, "A"), 1);
    assert_eq!(diag_codes(&ctx), vec!["E052"]);
}

#[test]
fn invalid_value_operand_blocks_extraction() {
    let ctx = analyze(
        r"
&A SETA L'X
 AGO .A
X EQU =**)-,2
.A ANOP
",
    );
    assert_eq!(seta(&ctx, "A"), 1);
    assert_eq!(diag_codes(&ctx), vec!["E052"]);
}

#[test]
fn lookahead_enters_copy_members() {
    let lib = VecLibProvider::new(&[(
        "LIB",
        r"
X EQU 1,2,C'X'
&WAS_IN SETB 1
",
    )]);
    let ctx = analyze_with(
        r"
&A SETA L'X
&WAS_BEFORE SETB 1
 COPY LIB
&WAS_AFTER SETB 1
",
        &lib,
    );
    assert_eq!(seta(&ctx, "A"), 2);
    for name in ["WAS_BEFORE", "WAS_IN", "WAS_AFTER"] {
        assert_eq!(
            var_value(&ctx, name, None),
            hlasm::expression::SetValue::B(true),
            "{}",
            name
        );
    }
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn lookahead_escapes_copy_members() {
    let lib = VecLibProvider::new(&[(
        "LIB2",
        r"
&A SETA L'X
&WAS_IN SETB 1
",
    )]);
    let ctx = analyze_with(
        r"
&WAS_BEFORE SETB 1
 COPY LIB2
X EQU 1,2
&WAS_AFTER SETB 1
",
        &lib,
    );
    assert_eq!(seta(&ctx, "A"), 2);
    for name in ["WAS_BEFORE", "WAS_IN", "WAS_AFTER"] {
        assert_eq!(
            var_value(&ctx, name, None),
            hlasm::expression::SetValue::B(true),
            "{}",
            name
        );
    }
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn lookahead_within_macro_bodies() {
    let lib = VecLibProvider::new(&[(
        "LIB3",
        r"
 MAC
&AFTER_MAC SETB 1
",
    )]);
    let ctx = analyze_with(
        r"
 MACRO
 MAC
 GBLA A
&A SETA L'X
X EQU 2,3
 MEND
*
 COPY LIB3
X EQU 1,2
",
        &lib,
    );
    assert_eq!(seta(&ctx, "A"), 3);
    assert_eq!(
        var_value(&ctx, "AFTER_MAC", None),
        hlasm::expression::SetValue::B(true)
    );
    assert_eq!(diag_codes(&ctx), vec!["E011"]);
}

#[test]
fn keyword_type_attributes_need_no_lookahead() {
    let ctx = analyze(
        r" macro
 GETMAIN &b=,&l=
 AIF   (T'&l NE 'O' AND T'&b NE 'O').ERR14      @L1A
 mend
         GETMAIN   b=svc",
    );
    assert_eq!(diag_count(&ctx), 0);

    let ctx = analyze(
        r" macro
 GETMAIN &b=,&l=
 AIF   (T'&l NE 'O' AND T'&b NE 'O').ERR14      @L1A
 mend
         GETMAIN   b=svc
",
    );
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn two_references_need_two_scans() {
    let ctx = analyze(
        r"
&A SETA L'X+L'Y
X EQU 1,10
Y EQU 2,11
",
    );
    assert_eq!(seta(&ctx, "A"), 21);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn machine_labels_answer_attributes() {
    let ctx = analyze(
        r"
&A SETA L'X
&B SETC T'X
X LR 1,1
",
    );
    assert_eq!(seta(&ctx, "A"), 2);
    assert_eq!(setc(&ctx, "B"), "I");
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn section_labels_answer_attributes() {
    let ctx = analyze(
        r"
&A SETA L'X
&B SETC T'X
X CSECT
",
    );
    assert_eq!(seta(&ctx, "A"), 1);
    assert_eq!(setc(&ctx, "B"), "J");
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn data_definitions_answer_attributes() {
    let ctx = analyze(
        r"
&A SETA L'X
&B SETC T'X
&C SETA S'X
X DC FS24'6'       remark
",
    );
    assert_eq!(seta(&ctx, "A"), 4);
    assert_eq!(setc(&ctx, "B"), "F");
    assert_eq!(seta(&ctx, "C"), 24);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn scale_of_character_data_is_invalid() {
    let ctx = analyze(
        r"
&A SETA S'X
X DC C'A'
",
    );
    assert_eq!(seta(&ctx, "A"), 0);
    assert_eq!(diag_count(&ctx), 1);
}

#[test]
fn missing_symbol_defaults_once() {
    let ctx = analyze(
        r"
&A SETA L'X+L'Y
X EQU 1,10
",
    );
    assert_eq!(seta(&ctx, "A"), 11);
    assert_eq!(diag_codes(&ctx), vec!["E052"]);
}

#[test]
fn nested_attribute_lookups() {
    let ctx = analyze(
        r"
&V(1) SETC 'A','B','C'
&A SETA L'&V(L'X)
X EQU 1,2
B EQU 2,22
",
    );
    assert_eq!(seta(&ctx, "A"), 22);
    assert_eq!(diag_count(&ctx), 0);
}
