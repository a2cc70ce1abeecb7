//! Macro definition, parameter binding and expansion.

use super::*;
use hlasm::variables::MacroParamData;
use matches::assert_matches;

#[test]
fn prototype_parameters() {
    let ctx = analyze(
        r" MACRO
&l M1 &op,&k=5,&op2,&k2=(1,2,3)
 ago .a
 lr 1,1
 anop
.a mend
",
    );
    let id = ctx.ids().find("M1").unwrap();
    let def = ctx.get_macro(id).expect("macro registered");

    let op = ctx.ids().find("OP").unwrap();
    let op2 = ctx.ids().find("OP2").unwrap();
    let l = ctx.ids().find("L").unwrap();
    let k = ctx.ids().find("K").unwrap();
    let k2 = ctx.ids().find("K2").unwrap();

    assert_eq!(def.positional, vec![Some(op), Some(op2)]);
    assert_eq!(def.label_param, Some(l));
    assert_eq!(def.keywords[&k].value(), "5");
    assert_eq!(def.keywords[&k2].value(), "(1,2,3)");
    // ago, lr, anop and the labeled mend.
    assert_eq!(def.body.len(), 4);
    let a = ctx.ids().find("A").unwrap();
    assert_eq!(def.labels[&a], 3);
}

#[test]
fn inner_macros_register_at_invocation() {
    let ctx = analyze(
        r" MACRO
 M1
 ANOP
 MEND

 MACRO
 M2
 ANOP

 MACRO
 INNER_M
 ANOP
 MEND

 MEND
",
    );
    assert_eq!(ctx.macros().len(), 2);
    assert!(ctx.ids().find("M1").map(|id| ctx.get_macro(id)).flatten().is_some());
    assert!(ctx.ids().find("M2").map(|id| ctx.get_macro(id)).flatten().is_some());

    let ctx = analyze(
        r" MACRO
 M1
 ANOP
 MEND

 MACRO
 M2
 ANOP

 MACRO
 INNER_M
 LR 1,1
 ANOP
 MEND

 MEND

 M2
",
    );
    assert_eq!(ctx.macros().len(), 3);
    assert!(ctx.ids().find("INNER_M").map(|id| ctx.get_macro(id)).flatten().is_some());
}

#[test]
fn expansion_jump_skips_inner_definition() {
    let ctx = analyze(
        r" MACRO
 M1
 AGO .A

 MACRO
 INNER_M
 ANOP
 MEND

.A ANOP

 MEND

 M1
",
    );
    assert_eq!(ctx.macros().len(), 1);
}

#[test]
fn failed_expansion_jump_still_defines_inner_macro() {
    let ctx = analyze(
        r" MACRO
 M1
 AGO .A

 MACRO
 INNER_M
 ANOP
 MEND

.B ANOP

 MEND

 M1
",
    );
    assert_eq!(ctx.macros().len(), 2);
    assert!(diag_codes(&ctx).contains(&"E032"));
}

#[test]
fn positional_argument_substitution() {
    let ctx = analyze(
        r" MACRO
 M1 &p
 lr &p,1
 mend

 M1 20
",
    );
    assert_eq!(diag_codes(&ctx), vec!["M010"]);
}

#[test]
fn keyword_defaults_and_overrides() {
    let ctx = analyze(
        r" MACRO
 M1 &p=50
 lr &p,1
 mend

 M1
 M1 p=1
",
    );
    // Only the defaulted call uses register 50.
    assert_eq!(diag_codes(&ctx), vec!["M010"]);
}

#[test]
fn parameters_feed_expressions() {
    let ctx = analyze(
        r" MACRO
 M1 &a,&b
&c seta &a
&d seta &b
&e seta &c+&d
 lr &e,&e
 mend

 M1 1,1
 M1 10,6
",
    );
    assert_eq!(diag_codes(&ctx), vec!["M010", "M010"]);
}

#[test]
fn composite_argument_indexing() {
    let ctx = analyze(
        r" MACRO
 M1 &a,&b
 lr &a(2,3),&a(1)
 mend

 M1 (1,(1,2,3))
",
    );
    assert_eq!(diag_count(&ctx), 0);

    let ctx = analyze(
        r" MACRO
 M1 &a,&b
 lr &a(2,3),&a(1)
 mend

 M1 (100,(1,2,3))
",
    );
    assert_eq!(diag_codes(&ctx), vec!["M010"]);
}

#[test]
fn label_argument_binds_the_name_parameter() {
    let ctx = analyze(
        r" MACRO
&n M1 &a,&b
 lr &n,&n
 mend

1 M1
",
    );
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn direct_binding_of_arguments() {
    let ctx = analyze(
        r" MACRO
&lbl MAC &key=,&op1,,&op3
 mend
",
    );
    let mac = ctx.ids().find("MAC").unwrap();
    let def = ctx.get_macro(mac).unwrap();
    let key = ctx.ids().find("KEY").unwrap();
    let op1 = ctx.ids().find("OP1").unwrap();
    let op3 = ctx.ids().find("OP3").unwrap();
    let lbl = ctx.ids().find("LBL").unwrap();

    let args = vec![
        hlasm::macros::MacroArg {
            keyword: None,
            keyword_text: String::new(),
            data: MacroParamData::Single("ada".to_string()),
            range: Default::default(),
        },
        hlasm::macros::MacroArg {
            keyword: None,
            keyword_text: String::new(),
            data: MacroParamData::Single("mko".to_string()),
            range: Default::default(),
        },
        hlasm::macros::MacroArg {
            keyword: None,
            keyword_text: String::new(),
            data: MacroParamData::Single(String::new()),
            range: Default::default(),
        },
    ];
    let mut diags = hlasm::diagnostics::DiagnosticSink::new();
    let invocation = def.call(
        Some(MacroParamData::Single("lbl".to_string())),
        args,
        1,
        "test",
        &[],
        &mut diags,
    );

    assert_eq!(invocation.syslist_get(&[0]), "lbl");
    assert_eq!(invocation.syslist_get(&[1]), "ada");
    assert_eq!(invocation.syslist_get(&[2]), "mko");
    assert_eq!(invocation.syslist_get(&[3]), "");
    assert_eq!(invocation.named[&op1].value(), "ada");
    assert_eq!(invocation.named[&op3].value(), "");
    assert_eq!(invocation.named[&key].value(), "");
    assert_eq!(invocation.named[&lbl].value(), "lbl");
    assert_eq!(diags.diags().len(), 0);
}

#[test]
fn composite_syslist_walk() {
    let ctx = analyze(
        r" MACRO
 MAC &key=,&op1,,&op3
 mend
",
    );
    let mac = ctx.ids().find("MAC").unwrap();
    let def = ctx.get_macro(mac).unwrap();
    let key = ctx.ids().find("KEY").unwrap();

    let composite = MacroParamData::Composite(vec![
        MacroParamData::Single("first".to_string()),
        MacroParamData::Single("second".to_string()),
        MacroParamData::Single("third".to_string()),
    ]);
    let args = vec![
        hlasm::macros::MacroArg {
            keyword: None,
            keyword_text: String::new(),
            data: MacroParamData::empty(),
            range: Default::default(),
        },
        hlasm::macros::MacroArg {
            keyword: Some(key),
            keyword_text: "KEY".to_string(),
            data: MacroParamData::Single("cas".to_string()),
            range: Default::default(),
        },
        hlasm::macros::MacroArg {
            keyword: None,
            keyword_text: String::new(),
            data: MacroParamData::empty(),
            range: Default::default(),
        },
        hlasm::macros::MacroArg {
            keyword: None,
            keyword_text: String::new(),
            data: composite,
            range: Default::default(),
        },
    ];
    let mut diags = hlasm::diagnostics::DiagnosticSink::new();
    let invocation = def.call(None, args, 1, "test", &[], &mut diags);

    assert_eq!(invocation.named[&key].value(), "cas");
    let op3 = ctx.ids().find("OP3").unwrap();
    assert_eq!(
        invocation.named[&op3].value(),
        "(first,second,third)"
    );
    assert_eq!(invocation.syslist_get(&[2, 2]), "");
    assert_eq!(invocation.syslist_get(&[3]), "(first,second,third)");
    assert_eq!(invocation.syslist_get(&[3, 2]), "second");
    assert_eq!(invocation.syslist_get(&[3, 2, 1, 1]), "second");
    assert_eq!(invocation.syslist_get(&[3, 2, 1, 1, 2]), "");
}

#[test]
fn duplicate_prototype_parameters() {
    let ctx = analyze(
        r" MACRO
&n M1 &n,&b
 mend
1 m1 2,3
 MACRO
 M2 &a,&a=6,&b
 mend

 m2 1,2

 MACRO
 M3 &a=5,&a,&b
 mend

 m3 1,2,3

",
    );
    assert_eq!(
        diag_codes(&ctx)
            .iter()
            .filter(|code| **code == "E011")
            .count(),
        3
    );
}

#[test]
fn mexit_leaves_the_expansion() {
    let ctx = analyze(
        r"
 MACRO
 M1
 LR 1
 MEXIT
 LR 1
 MEND

 M1
",
    );
    assert_eq!(diag_codes(&ctx), vec!["M012"]);
}

#[test]
fn unbounded_recursion_is_cut_off() {
    let ctx = analyze(
        r"
 MACRO
 M1
 LR 1,1
 M1
 MEND

 M1
",
    );
    assert_eq!(diag_codes(&ctx), vec!["E053"]);
}

#[test]
fn bounded_recursion_runs_to_depth() {
    let ctx = analyze(
        r"
 MACRO
 M1
 LR 1
 GBLA V
&V SETA &V+1
 AIF (&V GE 10).A
 M1
.A MEND

 M1
",
    );
    assert_eq!(seta(&ctx, "V"), 10);
    assert_eq!(
        diag_codes(&ctx)
            .iter()
            .filter(|code| **code == "M012")
            .count(),
        10
    );
}

#[test]
fn external_macro_with_wrong_name() {
    let lib = crate::VecLibProvider::new(&[(
        "MAC",
        r"   MACRO
       MACC   &VAR
       LR    &VAR,&VAR
       MEND
",
    )]);
    let ctx = analyze_with(
        r"
 MAC
 MAC
",
        &lib,
    );
    assert_eq!(diag_codes(&ctx), vec!["E054"]);
}

#[test]
fn external_macro_with_invalid_begin() {
    let lib = crate::VecLibProvider::new(&[(
        "MAC",
        r"  aMACRO
       MAC   &VAR
       LR    &VAR,&VAR
       MEND
",
    )]);
    let ctx = analyze_with(
        r"
 MAC
 MAC
",
        &lib,
    );
    assert_eq!(diag_codes(&ctx), vec!["E054"]);
}

#[test]
fn external_macro_success() {
    let lib = crate::VecLibProvider::new(&[(
        "DOIT",
        r" MACRO
 DOIT &R
 LR &R,&R
 MEND
",
    )]);
    let ctx = analyze_with(
        r"
 DOIT 3
",
        &lib,
    );
    assert_eq!(diag_count(&ctx), 0);
    assert!(ctx.ids().find("DOIT").map(|id| ctx.get_macro(id)).flatten().is_some());
}

#[test]
fn empty_expansion_leaves_context_clean() {
    let ctx = analyze(
        r" MACRO
 NOP2
 MEND
 NOP2
",
    );
    assert!(!ctx.is_in_macro());
    assert_eq!(ctx.sysndx(), 1);
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn sysndx_counts_invocations() {
    let ctx = analyze(
        r" MACRO
 M1
 GBLC &NDX
&NDX SETC '&SYSNDX'
 MEND
 M1
 M1
",
    );
    assert_eq!(setc(&ctx, "NDX"), "0002");
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn system_variables_reflect_the_call_site() {
    let ctx = analyze(
        r"SECT1 CSECT
 MACRO
 M1
 GBLC &S,&T,&M
&S SETC '&SYSECT'
&T SETC '&SYSSTYP'
&M SETC '&SYSMAC(1)'
 MEND
 M1
",
    );
    assert_eq!(setc(&ctx, "S"), "SECT1");
    assert_eq!(setc(&ctx, "T"), "CSECT");
    assert_eq!(setc(&ctx, "M"), "M1");
    assert_eq!(diag_count(&ctx), 0);
}

#[test]
fn syslist_indexes_positional_arguments() {
    let ctx = analyze(
        r" MACRO
 M1 &p
 GBLC &FIRST,&SECOND,&LBL
&LBL SETC '&SYSLIST(0)'
&FIRST SETC '&SYSLIST(1)'
&SECOND SETC '&SYSLIST(2)'
 MEND
HEAD M1 one,two
",
    );
    assert_eq!(setc(&ctx, "LBL"), "HEAD");
    assert_eq!(setc(&ctx, "FIRST"), "one");
    assert_eq!(setc(&ctx, "SECOND"), "two");
}

#[test]
fn unknown_keyword_degrades_to_positional() {
    let ctx = analyze(
        r" MACRO
 M1 &a
 GBLC &GOT
&GOT SETC '&a'
 MEND
 M1 NO=1
",
    );
    assert_eq!(diag_codes(&ctx), vec!["E045"]);
    assert_eq!(setc(&ctx, "GOT"), "NO=1");
}

#[test]
fn duplicate_keyword_keeps_the_first() {
    let ctx = analyze(
        r" MACRO
 M1 &k=
 GBLC &GOT
&GOT SETC '&k'
 MEND
 M1 K=1,K=2
",
    );
    assert_eq!(diag_codes(&ctx), vec!["E046"]);
    assert_eq!(setc(&ctx, "GOT"), "1");
}

#[test]
fn macro_call_with_substituted_arguments() {
    let ctx = analyze(
        r" MACRO
 M1 &a
 GBLC &GOT
&GOT SETC '&a(2)'
 MEND
&X SETC 'two'
 M1 (one,&X.,three)
",
    );
    assert_matches!(
        var_value(&ctx, "GOT", None),
        hlasm::expression::SetValue::C(ref text) if text == "two"
    );
    assert_eq!(diag_count(&ctx), 0);
}
