//! Punto de entrada de línea de comandos.

use std::{fs, path::PathBuf, process};

use anyhow::{Context, Result};
use clap::{Arg, Command};

use oberon0c::{
    codegen,
    parse::{self, ListingOptions},
};

fn main() -> Result<()> {
    // Parsing de CLI
    let matches = Command::new("oberon0c")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Compilador de Oberon-0 a ensamblador 8086")
        .arg(
            Arg::new("FILE")
                .help("Archivo fuente (.obr)")
                .required(true),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .help("Imprime un listado de diagnóstico durante la compilación")
                .takes_value(true)
                .multiple_occurrences(true)
                .possible_values(["tokens", "table", "tac"]),
        )
        .get_matches();

    let path = matches
        .get_one::<String>("FILE")
        .map(PathBuf::from)
        .expect("FILE is a required argument");

    let mut listing = ListingOptions::empty();
    if let Some(values) = matches.get_many::<String>("dump") {
        for value in values {
            listing |= match value.as_str() {
                "tokens" => ListingOptions::TOKENS,
                "table" => ListingOptions::TABLE,
                "tac" => ListingOptions::TAC,
                other => unreachable!("clap rejects the value {:?}", other),
            };
        }
    }

    let source = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    // El primer error de compilación es fatal
    let program = match parse::compile(&source, listing) {
        Ok(program) => program,
        Err(error) => {
            eprintln!("{}", error);
            process::exit(1);
        }
    };

    if listing.contains(ListingOptions::TAC) {
        print!("{}", program.listing());
    }

    let tac_path = path.with_extension("tac");
    fs::write(&tac_path, program.listing())
        .with_context(|| format!("failed to write {}", tac_path.display()))?;

    let asm_path = path.with_extension("asm");
    fs::write(&asm_path, codegen::generate(&program))
        .with_context(|| format!("failed to write {}", asm_path.display()))?;

    Ok(())
}
