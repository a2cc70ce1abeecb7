//! Conditional assembly: SET symbols, declarations, branching.

use super::*;
use hlasm::expression::SetValue;

#[test]
fn global_declaration_alone() {
    let ctx = analyze("   gbla var");
    assert!(var_defined(&ctx, "var"));
    assert!(ctx.globals.contains_key(&ctx.ids().find("var").unwrap()));
}

#[test]
fn local_declaration_alone() {
    let ctx = analyze("   lcla var");
    assert!(var_defined(&ctx, "var"));
    assert!(!ctx.globals.contains_key(&ctx.ids().find("var").unwrap()));
}

#[test]
fn multiple_declarations() {
    let ctx = analyze("   gbla var,var2,var3");
    for name in ["var", "var2", "var3"] {
        assert!(var_defined(&ctx, name), "{}", name);
    }
    let ctx = analyze("   lcla var,var2,var3");
    for name in ["var", "var2", "var3"] {
        assert!(var_defined(&ctx, name), "{}", name);
    }
}

#[test]
fn set_scalar() {
    let ctx = analyze("&var seta 3");
    assert_eq!(seta(&ctx, "var"), 3);
}

#[test]
fn set_with_subscript() {
    let ctx = analyze("&var(2) seta 3");
    assert_eq!(var_value(&ctx, "var", Some(2)), SetValue::A(3));
    assert_eq!(var_value(&ctx, "var", Some(1)), SetValue::A(0));
}

#[test]
fn set_fills_consecutive_elements() {
    let ctx = analyze("&var(2) seta 3,4,5");
    assert_eq!(var_value(&ctx, "var", Some(2)), SetValue::A(3));
    assert_eq!(var_value(&ctx, "var", Some(3)), SetValue::A(4));
    assert_eq!(var_value(&ctx, "var", Some(4)), SetValue::A(5));
}

#[test]
fn set_overwrites() {
    let ctx = analyze("&var setc 'avc'   \n&var setc 'XXX'");
    assert_eq!(setc(&ctx, "var"), "XXX");
}

#[test]
fn set_idempotence() {
    let ctx = analyze("&V SETC 'x'   \n&V SETC '&V'");
    assert_eq!(setc(&ctx, "V"), "x");
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn created_set_symbol_names() {
    let ctx = analyze("&var setc 'avc'   \n&var2 setb 0  \n&(ab&var.cd&var2) seta 11");
    assert_eq!(seta(&ctx, "abavccd0"), 11);
}

#[test]
fn shape_mismatch_is_diagnosed() {
    let ctx = analyze("&var seta 3\n&var(2) seta 4");
    assert_eq!(diag_codes(&ctx), vec!["W011"]);

    let ctx = analyze("&var setc 'x'\n&var seta 4");
    assert_eq!(diag_codes(&ctx), vec!["W011"]);
}

#[test]
fn system_variables_are_read_only() {
    let ctx = analyze("&SYSNDX SETA 1");
    assert_eq!(diag_codes(&ctx), vec!["W011"]);
}

#[test]
fn ago_extended_picks_by_index() {
    let ctx = analyze(
        r"
 AGO (2).a,.b,.c
.a anop
&var1 setb 0
.b anop
&var2 setb 0
.c anop
&var3 setb 0
",
    );
    assert!(!var_defined(&ctx, "var1"));
    assert!(var_defined(&ctx, "var2"));
    assert!(var_defined(&ctx, "var3"));
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn ago_extended_out_of_range_falls_through() {
    let ctx = analyze(
        r"
 AGO (8).a,.b,.c
.a anop
&var1 setb 0
.b anop
&var2 setb 0
.c anop
&var3 setb 0
",
    );
    assert!(var_defined(&ctx, "var1"));
    assert!(var_defined(&ctx, "var2"));
    assert!(var_defined(&ctx, "var3"));
    assert_eq!(diag_count(&ctx), 0);

    let ctx = analyze(
        r"
 AGO (0).a,.b,.c
.a anop
&var1 setb 0
.b anop
&var2 setb 0
.c anop
&var3 setb 0
",
    );
    assert!(var_defined(&ctx, "var1"));
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn aif_extended_takes_first_true_condition() {
    let ctx = analyze(
        r"
 AIF (0).a,(1).b,(1).c
.a anop
&var1 setb 0
.b anop
&var2 setb 0
.c anop
&var3 setb 0
",
    );
    assert!(!var_defined(&ctx, "var1"));
    assert!(var_defined(&ctx, "var2"));
    assert!(var_defined(&ctx, "var3"));
}

#[test]
fn aif_extended_all_false_falls_through() {
    let ctx = analyze(
        r"
 AIF (0).a,(0).b,(0).c
.a anop
&var1 setb 0
.b anop
&var2 setb 0
.c anop
&var3 setb 0
",
    );
    assert!(var_defined(&ctx, "var1"));
    assert!(var_defined(&ctx, "var2"));
    assert!(var_defined(&ctx, "var3"));
}

#[test]
fn actr_decrements_only_on_taken_branches() {
    let ctx = analyze(
        r"
 ACTR 2
 AIF (0).X
 AIF (0).X
 AIF (0).X
 AIF (0).X
.X ANOP
",
    );
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn string_operations() {
    let ctx = analyze(
        r"
&A SETC 'abcde'(2,3)
&B SETC 2'xy'
&C SETC 'left'.'right'
&K SETA K'&A
",
    );
    assert_eq!(setc(&ctx, "A"), "bcd");
    assert_eq!(setc(&ctx, "B"), "xyxy");
    assert_eq!(setc(&ctx, "C"), "leftright");
    assert_eq!(seta(&ctx, "K"), 3);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn arithmetic_and_logic() {
    let ctx = analyze(
        r"
&A SETA 7/2
&B SETA 7/0
&C SETB (1 AND 0)
&D SETB (NOT 0)
&E SETB ('abc' LT 'abd')
&F SETA X'FF'-B'1'
",
    );
    assert_eq!(seta(&ctx, "A"), 3);
    assert_eq!(seta(&ctx, "B"), 0);
    assert_eq!(var_value(&ctx, "C", None), SetValue::B(false));
    assert_eq!(var_value(&ctx, "D", None), SetValue::B(true));
    assert_eq!(var_value(&ctx, "E", None), SetValue::B(true));
    assert_eq!(seta(&ctx, "F"), 254);
    assert_eq!(diag_codes(&ctx), vec!["E070"]);
}

#[test]
fn count_and_number_attributes() {
    let ctx = analyze(
        r"
&V(1) SETC 'A','BC','DEF'
&N SETA N'&V
&K SETA K'&V(3)
&S SETC 'words'
&KS SETA K'&S
",
    );
    assert_eq!(seta(&ctx, "N"), 3);
    assert_eq!(seta(&ctx, "K"), 3);
    assert_eq!(seta(&ctx, "KS"), 5);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn opcode_attribute() {
    let ctx = analyze(
        r" MACRO
 MYMAC
 MEND
&A SETC O'LR
&B SETC O'EQU
&C SETC O'B
&D SETC O'MYMAC
&E SETC O'NOSUCH
",
    );
    assert_eq!(setc(&ctx, "A"), "O");
    assert_eq!(setc(&ctx, "B"), "A");
    assert_eq!(setc(&ctx, "C"), "E");
    assert_eq!(setc(&ctx, "D"), "M");
    assert_eq!(setc(&ctx, "E"), "U");
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn defined_attribute() {
    let ctx = analyze(
        r"
X EQU 1
&A SETB (D'X)
&B SETB (D'Y)
",
    );
    assert_eq!(var_value(&ctx, "A", None), SetValue::B(true));
    assert_eq!(var_value(&ctx, "B", None), SetValue::B(false));
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn mnote_passes_severity_through() {
    let ctx = analyze(
        r"
 MNOTE 8,'something broke'
 MNOTE *,'just a note'
",
    );
    let diags = ctx.diags.diags();
    assert_eq!(diags.len(), 2);
    assert_eq!(diags[0].severity, hlasm::Severity::Error);
    assert_eq!(diags[0].message, "something broke");
    assert_eq!(diags[1].severity, hlasm::Severity::Info);
}

#[test]
fn mend_outside_macro_definition() {
    let ctx = analyze("\n MEND\n");
    assert_eq!(diag_codes(&ctx), vec!["E048"]);
}

#[test]
fn unterminated_macro_definition() {
    let ctx = analyze(
        r"
 MACRO
 M1
 ANOP
",
    );
    assert_eq!(diag_codes(&ctx), vec!["E047"]);
    assert_eq!(ctx.macros().len(), 0);
}
