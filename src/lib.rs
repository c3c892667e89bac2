//! Compilador de un subconjunto de Oberon-0 a ensamblador 8086.
//!
//! El compilador está dividido en un front end y un back end que se
//! comunican mediante código de tres direcciones ([`tac`]):
//!
//! - El front end es un scanner ([`lex`]) y un parser de descenso
//!   recursivo ([`parse`]) que resuelve ámbitos sobre una tabla de
//!   símbolos ([`table`]) y sintetiza el código intermedio en una
//!   sola pasada, sin árbol sintáctico.
//! - El back end ([`codegen`]) traduce el código intermedio a
//!   ensamblador de 16 bits en sintaxis MASM, apoyándose en las
//!   rutinas de consola de `io.asm`.
//!
//! Los errores de ambas fases se unifican en [`error::CompileError`]
//! y la compilación es fatal al primer error.

pub mod codegen;
pub mod error;
pub mod lex;
pub mod parse;
pub mod source;
pub mod table;
pub mod tac;
