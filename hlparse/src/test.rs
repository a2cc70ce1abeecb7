use hlasm::context::{HlasmContext, VarSlot};
use hlasm::expression::SetValue;
use hlasm::processing::ParseLibProvider;
use hlasm::symbol::SymbolValueKind;

use crate::Analyzer;

mod ca;
mod lookahead;
mod macros;
mod ord_sym;

pub fn analyze(input: &str) -> HlasmContext {
    let mut analyzer = Analyzer::new(input, "test");
    analyzer.analyze();
    analyzer.into_context()
}

pub fn analyze_with(input: &str, lib: &dyn ParseLibProvider) -> HlasmContext {
    let mut analyzer = Analyzer::with_provider(input, "test", Default::default(), lib);
    analyzer.analyze();
    analyzer.into_context()
}

pub fn diag_count(ctx: &HlasmContext) -> usize {
    ctx.diags.diags().len()
}

pub fn diag_codes(ctx: &HlasmContext) -> Vec<&str> {
    ctx.diags.diags().iter().map(|d| d.code.as_str()).collect()
}

pub fn defined(ctx: &HlasmContext, name: &str) -> bool {
    ctx.ids()
        .find(name)
        .map(|id| ctx.ord.symbol_defined(id))
        .unwrap_or(false)
}

pub fn abs(ctx: &HlasmContext, name: &str) -> i32 {
    let id = ctx.ids().find(name).expect("symbol not interned");
    let symbol = ctx.ord.get_symbol(id).expect("symbol not defined");
    match symbol.resolved_value() {
        Some(hlasm::symbol::SymbolValue::Abs(value)) => *value,
        other => panic!("{} is not absolute: {:?}", name, other),
    }
}

pub fn value_kind(ctx: &HlasmContext, name: &str) -> SymbolValueKind {
    let id = ctx.ids().find(name).expect("symbol not interned");
    ctx.ord
        .get_symbol(id)
        .and_then(|symbol| symbol.kind())
        .expect("symbol not resolved")
}

pub fn length(ctx: &HlasmContext, name: &str) -> u16 {
    let id = ctx.ids().find(name).expect("symbol not interned");
    ctx.ord
        .get_symbol(id)
        .expect("symbol not defined")
        .attrs
        .length_or_default()
}

pub fn type_attr(ctx: &HlasmContext, name: &str) -> u8 {
    let id = ctx.ids().find(name).expect("symbol not interned");
    ctx.ord.get_symbol(id).expect("symbol not defined").attrs.type_attr
}

pub fn scale(ctx: &HlasmContext, name: &str) -> i16 {
    let id = ctx.ids().find(name).expect("symbol not interned");
    ctx.ord.get_symbol(id).expect("symbol not defined").attrs.scale
}

pub fn var_defined(ctx: &HlasmContext, name: &str) -> bool {
    ctx.ids()
        .find(name)
        .map(|id| ctx.var_exists(id))
        .unwrap_or(false)
}

pub fn var_value(ctx: &HlasmContext, name: &str, index: Option<usize>) -> SetValue {
    let id = ctx.ids().find(name).expect("variable not interned");
    match ctx.lookup_var(id) {
        Some(VarSlot::Set(symbol)) => symbol.get(index),
        Some(VarSlot::Const(value)) => value.clone(),
        other => panic!(
            "{} is not a SET symbol: {}",
            name,
            if other.is_some() { "system" } else { "undefined" }
        ),
    }
}

pub fn seta(ctx: &HlasmContext, name: &str) -> i32 {
    var_value(ctx, name, None).to_a().expect("not arithmetic")
}

pub fn setc(ctx: &HlasmContext, name: &str) -> String {
    var_value(ctx, name, None).to_c()
}
