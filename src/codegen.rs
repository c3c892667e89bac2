//! Generación de ensamblador 8086 a partir del código intermedio.
//!
//! El back end traduce cada instrucción TAC a ensamblador de 16 bits
//! en sintaxis MASM, para el modelo de memoria `small` de DOS. Antes
//! del bloque de cada instrucción se emite su línea TAC original como
//! comentario, lo que permite auditar la traducción lado a lado.
//!
//! # Esquema de registros
//! No hay asignación de registros: `ax` recibe el operando izquierdo
//! y acumula resultados, `bx` recibe el operando derecho y sirve de
//! puntero para los operandos con indirección doble, y `cx` releva a
//! `bx` cuando ambos papeles coinciden en el operando derecho. Las
//! rutinas de consola de `io.asm` (`readint`, `writeint`, `writestr`,
//! `writeln`) usan `bx` y `dx` según su propia convención.
//!
//! Solo los operadores `+ - * /` tienen traducción; el resto de los
//! operadores y la escritura de decimales dejan únicamente su
//! comentario, ya que `io.asm` no ofrece soporte de punto flotante.

use std::fmt::{self, Write};

use crate::{
    tac::{BinOp, GlobalDecl, Instruction, Place, Program},
    table::FrameInfo,
};

/// Escribe una línea de instrucción, precedida por tabulador.
macro_rules! emit {
    ($gen:expr) => {
        writeln!($gen.out)
    };

    ($gen:expr, $($arg:tt)*) => {{
        $gen.out.push('\t');
        writeln!($gen.out, $($arg)*)
    }};
}

/// Traduce un programa TAC completo a texto ensamblador.
pub fn generate(program: &Program) -> String {
    let mut generator = Generator {
        program,
        out: String::new(),
    };

    generator
        .run()
        .expect("formatting into a String cannot fail");

    generator.out
}

struct Generator<'a> {
    program: &'a Program,
    out: String,
}

impl<'a> Generator<'a> {
    fn run(&mut self) -> fmt::Result {
        self.data_segment()?;

        emit!(self, ".code")?;
        emit!(self, "include io.asm")?;
        emit!(self)?;

        let program = self.program;
        for instruction in &program.instructions {
            self.lower(instruction)?;
        }

        Ok(())
    }

    fn data_segment(&mut self) -> fmt::Result {
        emit!(self, ".model small")?;
        emit!(self, ".stack 100h")?;
        emit!(self, ".data")?;

        let program = self.program;
        for global in &program.globals {
            match global {
                GlobalDecl::Variable { name } => writeln!(self.out, "{} DW ?", name)?,
                GlobalDecl::Constant { name, value } => {
                    writeln!(self.out, "{} DW {}", name, value)?
                }

                GlobalDecl::StringLit { name, value } => {
                    writeln!(self.out, "{} DB \"{}\",\"$\"", name, value)?
                }
            }
        }

        Ok(())
    }

    fn lower(&mut self, instruction: &Instruction) -> fmt::Result {
        if *instruction == Instruction::Blank {
            return emit!(self);
        }

        // La línea TAC original acompaña a su traducción
        emit!(self, "; {}", instruction)?;

        match instruction {
            Instruction::Binary { dest, lhs, op, rhs } => self.binary(dest, lhs, *op, rhs),
            Instruction::Copy { dest, src } => {
                self.load_ax(src)?;
                self.store_ax(dest)
            }

            Instruction::Proc(name) => self.prologue(name),
            Instruction::Endp(name) => self.epilogue(name),
            Instruction::StartProc(name) => self.main_proc(name),
            Instruction::Call(name) => emit!(self, "call {}", name),
            Instruction::Push { place, by_ref } => self.push(place, *by_ref),
            Instruction::ReadInt(place) => self.read_int(place),
            Instruction::WriteInt(place) => self.write_int(place),
            Instruction::WriteStr(label) => {
                emit!(self, "mov dx, OFFSET {}", label)?;
                emit!(self, "call writestr")
            }

            Instruction::WriteLn => emit!(self, "call writeln"),

            // Sin traducción: complemento, operadores no aritméticos
            // y escritura de decimales quedan solo como comentario
            Instruction::Complement { .. } | Instruction::WriteReal(_) => Ok(()),
            Instruction::Blank => Ok(()),
        }
    }

    fn binary(&mut self, dest: &Place, lhs: &Place, op: BinOp, rhs: &Place) -> fmt::Result {
        let mnemonic = match op {
            BinOp::Add => "add ax, bx",
            BinOp::Sub => "sub ax, bx",
            BinOp::Mul => "imul bx",
            BinOp::Div => "idiv bx",
            _ => return Ok(()),
        };

        self.load_ax(lhs)?;

        // El operando derecho pasa por cx cuando su indirección
        // necesita bx como puntero
        match pointer_slot(rhs) {
            Some(slot) => {
                emit!(self, "mov bx, {}", slot)?;
                emit!(self, "mov cx, [bx]")?;
                emit!(self, "mov bx, cx")?;
            }

            None => emit!(self, "mov bx, {}", direct(rhs))?,
        }

        emit!(self, "{}", mnemonic)?;
        self.store_ax(dest)
    }

    fn prologue(&mut self, name: &str) -> fmt::Result {
        let frame = self.frame(name);
        writeln!(self.out, "{}\tPROC", name)?;
        emit!(self, "push bp")?;
        emit!(self, "mov bp,sp")?;
        emit!(self, "sub sp,{}", frame.size_of_locals)
    }

    fn epilogue(&mut self, name: &str) -> fmt::Result {
        let frame = self.frame(name);
        emit!(self, "add sp,{}", frame.size_of_locals)?;
        emit!(self, "pop bp")?;
        emit!(self, "ret {}", frame.size_of_params)?;
        writeln!(self.out, "{}\tENDP", name)
    }

    /// Punto de entrada DOS: inicializa `ds`, llama al módulo y
    /// termina con la llamada al sistema 4Ch.
    fn main_proc(&mut self, name: &str) -> fmt::Result {
        writeln!(self.out, "main\tPROC")?;
        emit!(self, "mov ax, @data")?;
        emit!(self, "mov ds, ax")?;
        emit!(self, "call {}", name)?;
        emit!(self, "mov ah, 04ch")?;
        emit!(self, "int 21h")?;
        writeln!(self.out, "main\tENDP")?;
        emit!(self, "END main")
    }

    fn push(&mut self, place: &Place, by_ref: bool) -> fmt::Result {
        if by_ref {
            match place {
                Place::Global(name) => {
                    emit!(self, "mov ax, OFFSET {}", name)?;
                    emit!(self, "push ax")
                }

                Place::Local { offset } => {
                    emit!(self, "lea ax, [bp-{}]", offset)?;
                    emit!(self, "push ax")
                }

                // Un parámetro por referencia ya contiene la
                // dirección; se reenvía tal cual
                Place::Param { disp, indirect: true } => emit!(self, "push [bp+{}]", disp),

                Place::Param { disp, indirect: false } => {
                    emit!(self, "lea ax, [bp+{}]", disp)?;
                    emit!(self, "push ax")
                }

                Place::Literal(_) => unreachable!("literals are never pushed by reference"),
            }
        } else {
            match pointer_slot(place) {
                Some(slot) => {
                    emit!(self, "mov bx, {}", slot)?;
                    emit!(self, "push [bx]")
                }

                None => emit!(self, "push {}", direct(place)),
            }
        }
    }

    fn read_int(&mut self, place: &Place) -> fmt::Result {
        emit!(self, "push bx")?;
        emit!(self, "call readint")?;
        emit!(self, "mov ax, bx")?;
        self.store_ax(place)?;
        emit!(self, "pop bx")
    }

    fn write_int(&mut self, place: &Place) -> fmt::Result {
        emit!(self, "push ax")?;
        emit!(self, "push bx")?;
        emit!(self, "push cx")?;
        emit!(self, "push dx")?;
        self.load_ax(place)?;
        emit!(self, "call writeint")?;
        emit!(self, "pop dx")?;
        emit!(self, "pop cx")?;
        emit!(self, "pop bx")?;
        emit!(self, "pop ax")
    }

    fn load_ax(&mut self, place: &Place) -> fmt::Result {
        match pointer_slot(place) {
            Some(slot) => {
                emit!(self, "mov bx, {}", slot)?;
                emit!(self, "mov ax, [bx]")
            }

            None => emit!(self, "mov ax, {}", direct(place)),
        }
    }

    fn store_ax(&mut self, place: &Place) -> fmt::Result {
        match pointer_slot(place) {
            Some(slot) => {
                emit!(self, "mov bx, {}", slot)?;
                emit!(self, "mov [bx], ax")
            }

            None => emit!(self, "mov {}, ax", direct(place)),
        }
    }

    fn frame(&self, name: &str) -> &'a FrameInfo {
        self.program
            .frames
            .get(name)
            .expect("procedure without frame descriptor")
    }
}

/// Celda que contiene el puntero de un operando doblemente indirecto.
fn pointer_slot(place: &Place) -> Option<String> {
    match place {
        Place::Param {
            disp,
            indirect: true,
        } => Some(format!("[bp+{}]", disp)),

        _ => None,
    }
}

/// Forma directa de un operando sin indirección doble.
fn direct(place: &Place) -> String {
    match place {
        Place::Global(name) => name.clone(),
        Place::Local { offset } => format!("[bp-{}]", offset),

        Place::Param {
            disp,
            indirect: false,
        } => format!("[bp+{}]", disp),

        Place::Param { indirect: true, .. } => {
            unreachable!("doubly indirect operands have no direct form")
        }

        Place::Literal(text) => text.clone(),
    }
}
