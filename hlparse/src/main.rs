#[macro_use]
extern crate clap;

use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

use clap::Arg;
use hlasm::context::ContextOptions;
use hlasm::symbol::{SymbolState, SymbolValue};
use hlasm::Severity;
use hlparse::{Analyzer, DirLibProvider};

#[derive(Debug)]
enum Error {
    Io(std::io::Error, String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, path) => writeln!(f, "Reading \"{}\" failed: {}", path, err),
        }
    }
}

fn main() {
    env_logger::init();

    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the input file to analyze")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("libs")
                .short("L")
                .long("libs")
                .takes_value(true)
                .value_name("DIR")
                .help("Directory served as the COPY/macro library"),
        )
        .arg(
            Arg::with_name("sysparm")
                .long("sysparm")
                .takes_value(true)
                .value_name("VALUE")
                .help("Sets the &SYSPARM system variable"),
        )
        .arg(
            Arg::with_name("symbols")
                .short("s")
                .long("symbols")
                .help("Prints the resolved ordinary symbol table"),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    let libs = matches.value_of("libs");
    let options = ContextOptions {
        sysparm: matches.value_of("sysparm").map(str::to_string),
    };
    let symbols = matches.is_present("symbols");

    match run(input, libs, options, symbols) {
        Ok(errors) if errors > 0 => std::process::exit(1),
        Ok(_) => {}
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(2);
        }
    }
}

fn run(
    input: &str,
    libs: Option<&str>,
    options: ContextOptions,
    symbols: bool,
) -> Result<usize, Error> {
    let path = Path::new(input);
    let file = File::open(path).map_err(|err| Error::Io(err, input.to_string()))?;
    let mut text = String::new();
    BufReader::new(file)
        .read_to_string(&mut text)
        .map_err(|err| Error::Io(err, input.to_string()))?;

    let provider = libs.map(DirLibProvider::new);
    let mut analyzer = match &provider {
        Some(provider) => Analyzer::with_provider(&text, input, options, provider),
        None => Analyzer::with_options(&text, input, options),
    };
    analyzer.analyze();

    for diag in analyzer.diags() {
        let severity = match diag.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "note",
        };
        println!(
            "{}:{}:{}: {} [{}] {}",
            diag.file,
            diag.range.start.line + 1,
            diag.range.start.col + 1,
            severity,
            diag.code,
            diag.message
        );
        for related in &diag.related {
            println!(
                "    {} ({}:{})",
                related.message,
                related.location.file,
                related.location.pos.line + 1
            );
        }
    }

    if symbols {
        print_symbols(analyzer.context());
    }

    Ok(analyzer.context().diags.error_count())
}

fn print_symbols(ctx: &hlasm::HlasmContext) {
    let mut names: Vec<_> = ctx.ord.symbols.keys().copied().collect();
    names.sort_by_key(|&id| ctx.resolve_id(id).to_string());
    for name in names {
        let symbol = &ctx.ord.symbols[&name];
        let value = match &symbol.value {
            SymbolState::Resolved(SymbolValue::Abs(value)) => format!("{}", value),
            SymbolState::Resolved(SymbolValue::Reloc(_)) => "reloc".to_string(),
            SymbolState::Pending => "?".to_string(),
        };
        println!(
            "{:<10} {:>10}  L:{:<5} T:{}",
            ctx.resolve_id(name),
            value,
            symbol.attrs.length_or_default(),
            symbol.attrs.type_attr as char,
        );
    }
}
