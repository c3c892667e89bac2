//! Representación intermedia de código de tres direcciones.
//!
//! El front end emite una secuencia lineal de instrucciones de tres
//! direcciones (TAC) que el generador de código traduce a ensamblador.
//! Cada instrucción se imprime en un formato de cinco columnas de
//! ancho fijo, que es también el contenido del archivo `.tac`.
//!
//! Junto con las instrucciones, el programa transporta los artefactos
//! que el back end necesita y que la tabla de símbolos ya no contiene
//! cuando éste corre: las declaraciones globales para la sección de
//! datos y los descriptores de marco de cada procedimiento.

use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
};

use crate::table::FrameInfo;

/// Operador binario de una instrucción TAC.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

const OPERATORS: &[(&str, BinOp)] = &[
    ("+", BinOp::Add),
    ("-", BinOp::Sub),
    ("*", BinOp::Mul),
    ("/", BinOp::Div),
    ("DIV", BinOp::IntDiv),
    ("MOD", BinOp::Mod),
    ("OR", BinOp::Or),
    ("&", BinOp::And),
    ("=", BinOp::Equal),
    ("#", BinOp::NotEqual),
    ("<", BinOp::Less),
    (">", BinOp::Greater),
    ("<=", BinOp::LessEqual),
    (">=", BinOp::GreaterEqual),
];

impl BinOp {
    /// Operador correspondiente a un lexema de operador del scanner.
    pub fn from_lexeme(lexeme: &str) -> Option<Self> {
        OPERATORS
            .iter()
            .find(|&&(name, _)| name == lexeme)
            .map(|&(_, op)| op)
    }
}

impl Display for BinOp {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let name = OPERATORS
            .iter()
            .find(|&&(_, op)| op == *self)
            .map(|&(name, _)| name)
            .unwrap_or_default();

        formatter.write_str(name)
    }
}

/// Un operando de instrucción, ya resuelto a su forma imprimible.
///
/// La resolución de nombre a desplazamiento ocurre en el front end,
/// que todavía conoce el ámbito; el back end solo distingue las
/// formas de direccionamiento.
#[derive(Clone, Debug, PartialEq)]
pub enum Place {
    /// Nombre a profundidad de módulo, direccionado por etiqueta.
    Global(String),

    /// Local, constante o temporal: `_bp-OFFSET`.
    Local { offset: i32 },

    /// Parámetro: `_bp+DISP`, con indirección extra si es por
    /// referencia.
    Param { disp: i32, indirect: bool },

    /// Literal textual embebido en la instrucción.
    Literal(String),
}

impl Display for Place {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Place::Global(name) => formatter.write_str(name),
            Place::Local { offset } => write!(formatter, "_bp-{}", offset),

            Place::Param { disp, indirect } => {
                let prefix = if *indirect { "@" } else { "" };
                write!(formatter, "{}_bp+{}", prefix, disp)
            }

            Place::Literal(text) => formatter.write_str(text),
        }
    }
}

/// Una instrucción de tres direcciones.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    /// `dest = lhs op rhs`
    Binary {
        dest: Place,
        lhs: Place,
        op: BinOp,
        rhs: Place,
    },

    /// `dest = src`
    Copy { dest: Place, src: Place },

    /// `dest = src ~`
    Complement { dest: Place, src: Place },

    /// Apertura del cuerpo de un procedimiento.
    Proc(String),

    /// Cierre del cuerpo de un procedimiento.
    Endp(String),

    /// Separador visual entre procedimientos.
    Blank,

    /// Punto de entrada del programa.
    StartProc(String),

    /// `call X`
    Call(String),

    /// `push X`, con dirección en lugar de valor si es por referencia.
    Push { place: Place, by_ref: bool },

    /// `rdi X`: lee un entero de consola hacia el operando.
    ReadInt(Place),

    /// `wri X`: escribe un entero en consola.
    WriteInt(Place),

    /// `wrd X`: escribe un decimal en consola.
    WriteReal(Place),

    /// `wrs X`: escribe la hilera internada bajo la etiqueta `X`.
    WriteStr(String),

    /// `wrln`: salto de línea en consola.
    WriteLn,
}

impl Display for Instruction {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        use Instruction::*;

        let line = match self {
            Binary { dest, lhs, op, rhs } => {
                columns(&dest.to_string(), "=", &lhs.to_string(), &op.to_string(), &rhs.to_string())
            }

            Copy { dest, src } => columns(&dest.to_string(), "=", &src.to_string(), "", ""),

            Complement { dest, src } => {
                columns(&dest.to_string(), "=", &src.to_string(), "~", "")
            }

            Proc(name) => columns("proc", name, "", "", ""),
            Endp(name) => columns("endp", name, "", "", ""),
            Blank => String::new(),
            StartProc(name) => columns("Start proc", name, "", "", ""),
            Call(name) => columns("call", name, "", "", ""),

            Push { place, by_ref } => {
                // Un parámetro por referencia ya lleva su propio `@`
                let marked = matches!(
                    place,
                    Place::Param {
                        indirect: true,
                        ..
                    }
                );

                let operand = if *by_ref && !marked {
                    format!("@{}", place)
                } else {
                    place.to_string()
                };

                columns("push", &operand, "", "", "")
            }

            ReadInt(place) => columns("rdi", &place.to_string(), "", "", ""),
            WriteInt(place) => columns("wri", &place.to_string(), "", "", ""),
            WriteReal(place) => columns("wrd", &place.to_string(), "", "", ""),
            WriteStr(label) => columns("wrs", label, "", "", ""),
            WriteLn => columns("wrln", "", "", "", ""),
        };

        formatter.write_str(&line)
    }
}

/// Formatea una línea TAC en las cinco columnas de ancho fijo.
fn columns(first: &str, second: &str, third: &str, fourth: &str, fifth: &str) -> String {
    let line = format!(
        "{:<10} {:<5} {:<10} {:<5} {:<10}",
        first, second, third, fourth, fifth
    );

    line.trim_end().to_owned()
}

/// Una declaración visible a profundidad de módulo, destinada a la
/// sección de datos del ensamblador.
#[derive(Clone, Debug, PartialEq)]
pub enum GlobalDecl {
    /// `name DW ?`
    Variable { name: String },

    /// `name DW value`
    Constant { name: String, value: String },

    /// `name DB "...","$"`
    StringLit { name: String, value: String },
}

/// Programa completo en representación intermedia.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub globals: Vec<GlobalDecl>,
    pub frames: HashMap<String, FrameInfo>,
}

impl Program {
    /// Listado textual completo, el contenido del archivo `.tac`.
    pub fn listing(&self) -> String {
        let mut listing = String::new();
        for instruction in &self.instructions {
            listing.push_str(&instruction.to_string());
            listing.push('\n');
        }

        listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_uses_five_fixed_columns() {
        let instruction = Instruction::Binary {
            dest: Place::Local { offset: 2 },
            lhs: Place::Literal(String::from("1")),
            op: BinOp::Add,
            rhs: Place::Literal(String::from("2")),
        };

        assert_eq!(
            instruction.to_string(),
            "_bp-2      =     1          +     2"
        );
    }

    #[test]
    fn markers_keep_column_alignment() {
        assert_eq!(Instruction::Proc(String::from("P")).to_string(), "proc       P");
        assert_eq!(Instruction::Call(String::from("P")).to_string(), "call       P");
        assert_eq!(
            Instruction::StartProc(String::from("Main")).to_string(),
            "Start proc Main"
        );
        assert_eq!(Instruction::WriteLn.to_string(), "wrln");
    }

    #[test]
    fn reference_parameters_render_indirection() {
        let place = Place::Param {
            disp: 4,
            indirect: true,
        };

        assert_eq!(place.to_string(), "@_bp+4");
        assert_eq!(
            Instruction::Push {
                place: Place::Global(String::from("x")),
                by_ref: true,
            }
            .to_string(),
            "push       @x"
        );
    }

    #[test]
    fn operators_round_trip_through_lexemes() {
        for lexeme in ["+", "-", "*", "/", "DIV", "MOD", "OR", "&", "<="] {
            let op = BinOp::from_lexeme(lexeme).unwrap();
            assert_eq!(op.to_string(), lexeme);
        }

        assert_eq!(BinOp::from_lexeme(":="), None);
    }
}
