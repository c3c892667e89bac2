//! Pruebas de extremo a extremo sobre texto fuente completo.

use oberon0c::{
    codegen,
    error::CompileError,
    parse::{self, ListingOptions},
    tac::Program,
};

fn compile(source: &str) -> Result<Program, CompileError> {
    parse::compile(source, ListingOptions::empty())
}

fn compile_ok(source: &str) -> Program {
    compile(source).expect("compilation failed")
}

#[test]
fn full_program_reaches_assembly() {
    let source = "\
MODULE Demo;
CONST limit = 10;
VAR total, seed : INTEGER;

PROCEDURE Accumulate(amount : INTEGER; VAR into : INTEGER);
BEGIN
  into := into + amount;
END Accumulate;

BEGIN
  total := 0;
  READ(seed);
  Accumulate(seed, total);
  Accumulate(limit, total);
  WRITE(\"total: \", total);
  WRITELN;
END Demo.
";

    let program = compile_ok(source);
    let listing = program.listing();

    // El procedimiento anidado precede al cuerpo del módulo
    let proc_start = listing.find("proc       Accumulate").unwrap();
    let module_start = listing.find("proc       Demo").unwrap();
    assert!(proc_start < module_start);

    assert!(listing.contains("rdi        seed"));
    assert!(listing.contains("push       @total"));
    assert!(listing.contains("call       Accumulate"));
    assert!(listing.contains("wrs        _s0"));
    assert!(listing.contains("wri        total"));
    assert!(listing.contains("wrln"));
    assert!(listing.ends_with("Start proc Demo\n"));

    let asm = codegen::generate(&program);
    assert!(asm.contains("limit DW 10"));
    assert!(asm.contains("total DW ?"));
    assert!(asm.contains("_s0 DB \"total: \",\"$\""));
    assert!(asm.contains("Accumulate\tPROC"));
    assert!(asm.contains("\tret 6"));
    assert!(asm.contains("\tcall Demo"));
    assert!(asm.contains("\tEND main"));
}

#[test]
fn nested_scopes_resolve_to_the_innermost_declaration() {
    let source = "\
MODULE Scopes;
VAR x : INTEGER;

PROCEDURE Inner;
VAR x : INTEGER;
BEGIN
  x := 1;
END Inner;

BEGIN
  x := 2;
END Scopes.
";

    let listing = compile_ok(source).listing();
    assert!(listing.contains("_bp-2      =     _bp-4"), "{}", listing);
    assert!(listing.contains("x          =     _t2"), "{}", listing);
}

#[test]
fn syntax_diagnostics_carry_line_and_column() {
    let error = compile("MODULE M;\nBEGIN\n  x := 1;\nEND M.").unwrap_err();
    assert_eq!(
        error.to_string(),
        "error at 3,3: 'x' has not been declared"
    );
}

#[test]
fn lexical_diagnostics_carry_line_and_column() {
    let error = compile("MODULE M;\n(* sin cierre\nBEGIN\nEND M.").unwrap_err();
    assert_eq!(
        error.to_string(),
        "error at 2,1: end of file encountered when expecting end of comment"
    );
}

#[test]
fn no_call_code_is_emitted_after_a_bad_argument() {
    let source = "\
MODULE M;
PROCEDURE P(VAR y : INTEGER);
BEGIN
END P;
BEGIN
  P(5);
END M.
";

    // El error es fatal: no se obtiene ningún programa parcial
    assert!(compile(source).is_err());
}

#[test]
fn reserved_words_and_comments_interact_with_statements() {
    let source = "\
MODULE M;
VAR begin : INTEGER; (* minúsculas: identificador válido *)
BEGIN
  begin := 1 (* los comentarios (* anidan *) aquí *) + 2;
END M.
";

    let listing = compile_ok(source).listing();
    assert!(listing.contains("begin      =     _t2"), "{}", listing);
}
