//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI.

use anyhow::{self, Context};
use clap::{self, crate_version, Arg, Command};
use pascalc::{error::Diagnostics, lex, source::Source};

use std::{
    fs::File,
    io::{self, Write},
    process,
    rc::Rc,
};

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("Pascal compiler")
        .version(crate_version!())
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("FILE")
                .help("Source file ('-' for stdin)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .default_value("-")
                .help("Output assembly file ('-' for stdout)"),
        )
        .arg(
            Arg::new("tokens")
                .long("tokens")
                .help("Dump the token stream to stderr"),
        )
        .arg(Arg::new("ast").long("ast").help("Dump the AST to stderr"))
        .arg(
            Arg::new("check")
                .long("check")
                .help("Stop after semantic validation"),
        )
        .get_matches();

    let input = args.value_of("input").context("No input file")?;
    let output = args.value_of("output").unwrap_or("-");

    let source = match input {
        "-" => Source::read(io::stdin().lock(), "<stdin>").context("Failed to read stdin")?,
        path => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open for reading: {}", path))?;

            Source::read(file, path).with_context(|| format!("Failed to read: {}", path))?
        }
    };

    let source = Rc::new(source);

    let tokens = lex::scan(source.text());
    if args.is_present("tokens") {
        for token in &tokens {
            eprintln!("{}", token);
        }
    }

    let ast = pascalc::syntax(&source, &tokens).unwrap_or_else(|diagnostics| fail(diagnostics));
    if args.is_present("ast") {
        eprintln!("{:#?}", ast);
    }

    if let Err(diagnostics) = pascalc::check(&source, &ast) {
        fail(diagnostics);
    }

    if args.is_present("check") {
        return Ok(());
    }

    let asm = pascalc::emit(&source, &ast).unwrap_or_else(|diagnostics| fail(diagnostics));

    match output {
        "-" => io::stdout()
            .write_all(asm.as_bytes())
            .context("Failed to emit to stdout")?,

        path => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to open for writing: {}", path))?;

            file.write_all(asm.as_bytes())
                .with_context(|| format!("Failed to emit to file: {}", path))?;
        }
    }

    Ok(())
}

fn fail(diagnostics: Diagnostics) -> ! {
    eprint!("{}", diagnostics);
    process::exit(1)
}
