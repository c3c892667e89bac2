//! Análisis sintáctico y semántico.
//!
//! El parser es de descenso recursivo con un token de preanálisis.
//! Conforme reconoce la gramática realiza a la vez el análisis
//! semántico (tabla de símbolos con ámbitos anidados, chequeo de
//! declaraciones y de llamadas) y la síntesis de código intermedio,
//! por lo que no se construye ningún árbol sintáctico.
//!
//! Todo el estado de compilación vive en la estructura [`Parser`]:
//! la profundidad de ámbito actual, la pila de ámbitos abiertos, el
//! contador de desplazamientos del marco actual y los contadores de
//! temporales y de hileras internadas.
//!
//! # Convención de marcos
//! El ámbito de módulo inicia su contador de desplazamientos en 2.
//! Los parámetros de un procedimiento se desplazan desde 0 en orden
//! de declaración y las locales desde 2. Un parámetro por referencia
//! ocupa siempre 4 bytes (puntero far). Al usar un parámetro, su
//! operando se resuelve como `_bp+(size_of_params - offset - size + 4)`,
//! que es el desplazamiento real respecto al frame pointer una vez
//! que la llamada ha apilado los argumentos y la dirección de retorno.

use std::collections::HashMap;

use bitflags::bitflags;
use thiserror::Error;

use crate::{
    error::{CompileError, Parse},
    lex::{Keyword, Scanner, Token, TokenKind},
    source::{Located, Position},
    table::{
        ConstValue, EntryInfo, EntryRef, FrameInfo, Parameter, PassMode, Redeclaration,
        SymbolTable, TableEntry, VarType,
    },
    tac::{self, BinOp, GlobalDecl, Instruction, Place},
};

bitflags! {
    /// Listados de diagnóstico que se imprimen durante la compilación.
    pub struct ListingOptions: u8 {
        /// Cada token conforme el scanner lo produce.
        const TOKENS = 1;

        /// Las entradas de la tabla de símbolos al cerrar cada ámbito.
        const TABLE = 1 << 1;

        /// El código de tres direcciones generado.
        const TAC = 1 << 2;
    }
}

/// Error sintáctico o semántico.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("'{0}' has not been declared")]
    Undeclared(String),

    #[error(transparent)]
    Redeclared(#[from] Redeclaration),

    #[error("cannot assign to '{0}' because it is a constant")]
    AssignToConstant(String),

    #[error("cannot assign to '{0}' because it is the module")]
    AssignToModule(String),

    #[error("the module is named '{expected}' but ends with '{found}'")]
    ModuleNameMismatch { expected: String, found: String },

    #[error("'{0}' cannot be written to console")]
    BadWriteArgument(String),

    #[error("too many arguments in call to '{0}'")]
    TooManyArguments(String),

    #[error("too few arguments in call to '{0}'")]
    TooFewArguments(String),

    #[error("a literal cannot be passed by reference to '{0}'")]
    LiteralByReference(String),

    #[error("the constant '{0}' cannot be passed by reference")]
    ConstantByReference(String),

    #[error("'{0}' is a procedure and has no value")]
    ProcedureInExpression(String),
}

/// Compila un texto fuente completo a un programa TAC.
pub fn compile(source: &str, listing: ListingOptions) -> Parse<tac::Program> {
    let mut parser = Parser {
        scanner: Scanner::new(source),
        token: Token {
            kind: TokenKind::Eof,
            lexeme: String::new(),
            position: Position::default(),
        },
        table: SymbolTable::new(),
        scopes: Vec::new(),
        depth: 0,
        offset: 0,
        next_temp: 1,
        next_string: 0,
        code: Vec::new(),
        globals: Vec::new(),
        frames: HashMap::new(),
        listing,
    };

    parser.advance()?;
    parser.prog()?;

    Ok(tac::Program {
        instructions: parser.code,
        globals: parser.globals,
        frames: parser.frames,
    })
}

struct Parser {
    scanner: Scanner,
    token: Token,
    table: SymbolTable,

    /// Entradas de módulo/procedimiento cuyos ámbitos están abiertos.
    scopes: Vec<EntryRef>,
    depth: u32,

    /// Contador de desplazamientos del marco actual.
    offset: i32,
    next_temp: u32,
    next_string: u32,

    code: Vec<Instruction>,
    globals: Vec<GlobalDecl>,
    frames: HashMap<String, FrameInfo>,
    listing: ListingOptions,
}

impl Parser {
    /// `prog → MODULE id ; declarative-part statement-part END id .`
    fn prog(&mut self) -> Parse<()> {
        self.expect_keyword(Keyword::Module)?;
        let name_token = self.expect_ident()?;
        let name = name_token.lexeme;

        let entry = self.insert(&name, 0, EntryInfo::Module(FrameInfo::default()))?;
        self.scopes.push(entry);
        self.depth = 1;
        self.offset = 2;

        self.expect(TokenKind::Semicolon)?;
        self.declarative_part()?;

        self.emit(Instruction::Proc(name.clone()));
        self.statement_part()?;
        self.expect_keyword(Keyword::End)?;

        if self.listing.contains(ListingOptions::TABLE) {
            print!("{}", self.table.listing(1));
        }

        self.close_scope(&name);
        self.depth = 0;

        let closing = self.expect_ident()?;
        if closing.lexeme != name {
            return self.fail_at(
                ParserError::ModuleNameMismatch {
                    expected: name,
                    found: closing.lexeme,
                },
                closing.position,
            );
        }

        self.emit(Instruction::Endp(name.clone()));
        self.emit(Instruction::Blank);
        self.emit(Instruction::StartProc(name));

        self.expect(TokenKind::Period)?;
        self.table.delete_depth(0);
        Ok(())
    }

    /// `declarative-part → const-part var-part procedure-part`
    fn declarative_part(&mut self) -> Parse<()> {
        self.const_part()?;
        self.var_part()?;

        while self.token.kind == TokenKind::Keyword(Keyword::Procedure) {
            self.procedure_decl()?;
        }

        Ok(())
    }

    fn const_part(&mut self) -> Parse<()> {
        if self.token.kind != TokenKind::Keyword(Keyword::Const) {
            return Ok(());
        }

        self.advance()?;
        while self.token.kind == TokenKind::Ident {
            let name = self.expect_ident()?.lexeme;
            self.expect_equals()?;

            let (typ, value) = self.literal_value()?;
            let size = typ.size();

            self.insert(
                &name,
                self.depth,
                EntryInfo::Constant {
                    typ,
                    offset: self.offset,
                    value,
                },
            )?;

            if self.depth == 1 {
                let value = match value {
                    ConstValue::Int(int) => int.to_string(),
                    ConstValue::Real(real) => real.to_string(),
                };

                self.globals.push(GlobalDecl::Constant { name, value });
            }

            self.with_frame(|frame| frame.size_of_locals += size);
            self.offset += size;

            self.expect(TokenKind::Semicolon)?;
        }

        Ok(())
    }

    fn var_part(&mut self) -> Parse<()> {
        if self.token.kind != TokenKind::Keyword(Keyword::Var) {
            return Ok(());
        }

        self.advance()?;
        while self.token.kind == TokenKind::Ident {
            let names = self.identifier_list()?;
            self.expect(TokenKind::Colon)?;
            let typ = self.type_mark()?;
            self.expect(TokenKind::Semicolon)?;

            for name in names {
                let size = typ.size();
                self.insert(
                    &name,
                    self.depth,
                    EntryInfo::Variable {
                        typ,
                        offset: self.offset,
                        size,
                        parameter: None,
                    },
                )?;

                if self.depth == 1 {
                    self.globals.push(GlobalDecl::Variable { name });
                }

                self.with_frame(|frame| frame.size_of_locals += size);
                self.offset += size;
            }
        }

        Ok(())
    }

    /// `procedure-decl → PROCEDURE id [( args )] ; body END id ;`
    fn procedure_decl(&mut self) -> Parse<()> {
        self.expect_keyword(Keyword::Procedure)?;
        let name = self.expect_ident()?.lexeme;

        let entry = self.insert(&name, self.depth, EntryInfo::Procedure(FrameInfo::default()))?;
        self.scopes.push(entry);
        self.depth += 1;

        let enclosing_offset = self.offset;
        self.offset = 0;

        if self.token.kind == TokenKind::LParen {
            self.advance()?;
            if self.token.kind != TokenKind::RParen {
                self.formal_args()?;
            }

            self.expect(TokenKind::RParen)?;
        }

        self.expect(TokenKind::Semicolon)?;

        // Las locales inician en 2, dejando espacio al bp guardado
        self.offset = 2;
        self.declarative_part()?;

        self.emit(Instruction::Proc(name.clone()));
        self.statement_part()?;
        self.expect_keyword(Keyword::End)?;
        self.emit(Instruction::Endp(name.clone()));
        self.emit(Instruction::Blank);

        // El nombre de cierre de un procedimiento no se verifica
        self.expect_ident()?;
        self.expect(TokenKind::Semicolon)?;

        if self.listing.contains(ListingOptions::TABLE) {
            print!("{}", self.table.listing(self.depth));
        }

        self.close_scope(&name);
        self.depth -= 1;
        self.offset = enclosing_offset;
        Ok(())
    }

    /// `args → [VAR] id-list : type { ; args }`
    fn formal_args(&mut self) -> Parse<()> {
        loop {
            let mode = if self.token.kind == TokenKind::Keyword(Keyword::Var) {
                self.advance()?;
                PassMode::Reference
            } else {
                PassMode::Value
            };

            let names = self.identifier_list()?;
            self.expect(TokenKind::Colon)?;
            let typ = self.type_mark()?;

            for name in names {
                let size = match mode {
                    PassMode::Value => typ.size(),
                    PassMode::Reference => 4,
                };

                self.insert(
                    &name,
                    self.depth,
                    EntryInfo::Variable {
                        typ,
                        offset: self.offset,
                        size,
                        parameter: Some(mode),
                    },
                )?;

                self.with_frame(|frame| {
                    frame.parameters.push(Parameter { typ, mode });
                    frame.size_of_params += size;
                });

                self.offset += size;
            }

            if self.token.kind == TokenKind::Semicolon {
                self.advance()?;
            } else {
                return Ok(());
            }
        }
    }

    fn identifier_list(&mut self) -> Parse<Vec<String>> {
        let mut names = vec![self.expect_ident()?.lexeme];
        while self.token.kind == TokenKind::Comma {
            self.advance()?;
            names.push(self.expect_ident()?.lexeme);
        }

        Ok(names)
    }

    fn type_mark(&mut self) -> Parse<VarType> {
        let typ = match self.token.kind {
            TokenKind::Keyword(Keyword::Integer) => VarType::Integer,
            TokenKind::Keyword(Keyword::Real) => VarType::Float,
            TokenKind::Keyword(Keyword::Char) => VarType::Char,
            _ => return self.unexpected("a type name"),
        };

        self.advance()?;
        Ok(typ)
    }

    fn literal_value(&mut self) -> Parse<(VarType, ConstValue)> {
        let value = match self.token.kind {
            TokenKind::IntLiteral(int) => (VarType::Integer, ConstValue::Int(int)),
            TokenKind::RealLiteral(real) => (VarType::Float, ConstValue::Real(real)),
            _ => return self.unexpected("a numeric literal"),
        };

        self.advance()?;
        Ok(value)
    }

    /// `statement-part → [BEGIN statement-seq]`
    fn statement_part(&mut self) -> Parse<()> {
        if self.token.kind == TokenKind::Keyword(Keyword::Begin) {
            self.advance()?;
            self.statement_seq()?;
        }

        Ok(())
    }

    fn statement_seq(&mut self) -> Parse<()> {
        loop {
            match self.token.kind {
                TokenKind::Ident => self.assign_or_call()?,
                TokenKind::Keyword(Keyword::Read) => self.read_stat()?,
                TokenKind::Keyword(Keyword::Write) => self.write_stat(false)?,
                TokenKind::Keyword(Keyword::Writeln) => self.write_stat(true)?,
                _ => (),
            }

            if self.token.kind == TokenKind::Semicolon {
                self.advance()?;
            } else {
                return Ok(());
            }
        }
    }

    fn assign_or_call(&mut self) -> Parse<()> {
        let name_token = self.expect_ident()?;
        let name = name_token.lexeme;

        let entry = match self.table.lookup(&name) {
            Some(entry) => entry,
            None => return self.fail_at(ParserError::Undeclared(name), name_token.position),
        };

        let info = entry.borrow().info.clone();
        match info {
            EntryInfo::Procedure(frame) => self.call_stat(&name, &frame, name_token.position),

            EntryInfo::Variable { .. } => {
                let dest = self.place_of(&entry.borrow());
                self.expect(TokenKind::Assign)?;
                let src = self.expr()?;
                self.emit(Instruction::Copy { dest, src });
                Ok(())
            }

            EntryInfo::Constant { .. } => {
                self.fail_at(ParserError::AssignToConstant(name), name_token.position)
            }

            EntryInfo::Module(_) => {
                self.fail_at(ParserError::AssignToModule(name), name_token.position)
            }

            EntryInfo::StringLiteral { .. } => {
                unreachable!("string labels cannot be spelled as identifiers")
            }
        }
    }

    /// Llamada a procedimiento con chequeo de aridad en ambos sentidos.
    fn call_stat(&mut self, name: &str, frame: &FrameInfo, at: Position) -> Parse<()> {
        let mut count = 0;

        if self.token.kind == TokenKind::LParen {
            self.advance()?;

            if self.token.kind != TokenKind::RParen {
                loop {
                    match frame.parameters.get(count) {
                        Some(&parameter) => self.argument(name, parameter)?,
                        None => {
                            return self.fail(ParserError::TooManyArguments(name.to_owned()))
                        }
                    }

                    count += 1;
                    if self.token.kind == TokenKind::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
            }

            self.expect(TokenKind::RParen)?;
        }

        if count < frame.parameters.len() {
            return self.fail_at(ParserError::TooFewArguments(name.to_owned()), at);
        }

        self.emit(Instruction::Call(name.to_owned()));
        Ok(())
    }

    fn argument(&mut self, proc_name: &str, parameter: Parameter) -> Parse<()> {
        match parameter.mode {
            PassMode::Value => {
                let place = self.expr()?;
                self.emit(Instruction::Push {
                    place,
                    by_ref: false,
                });

                Ok(())
            }

            // Por referencia solo se acepta una variable declarada
            PassMode::Reference => match self.token.kind {
                TokenKind::IntLiteral(_)
                | TokenKind::RealLiteral(_)
                | TokenKind::StringLiteral(_) => {
                    self.fail(ParserError::LiteralByReference(proc_name.to_owned()))
                }

                TokenKind::Ident => {
                    let token = self.expect_ident()?;
                    let entry = match self.table.lookup(&token.lexeme) {
                        Some(entry) => entry,
                        None => {
                            return self
                                .fail_at(ParserError::Undeclared(token.lexeme), token.position)
                        }
                    };

                    let entry = entry.borrow();
                    match entry.info {
                        EntryInfo::Variable { .. } => {
                            let place = self.place_of(&entry);
                            drop(entry);

                            self.emit(Instruction::Push {
                                place,
                                by_ref: true,
                            });

                            Ok(())
                        }

                        EntryInfo::Constant { .. } => {
                            drop(entry);
                            self.fail_at(
                                ParserError::ConstantByReference(token.lexeme),
                                token.position,
                            )
                        }

                        _ => {
                            drop(entry);
                            self.fail_at(
                                ParserError::ProcedureInExpression(token.lexeme),
                                token.position,
                            )
                        }
                    }
                }

                _ => self.unexpected("an argument"),
            },
        }
    }

    /// `read-stat → READ ( id { , id } )`
    fn read_stat(&mut self) -> Parse<()> {
        self.advance()?;
        self.expect(TokenKind::LParen)?;

        loop {
            let token = self.expect_ident()?;
            let entry = match self.table.lookup(&token.lexeme) {
                Some(entry) => entry,
                None => {
                    return self.fail_at(ParserError::Undeclared(token.lexeme), token.position)
                }
            };

            // Solo las variables enteras producen `rdi`; cualquier
            // otro identificador declarado se acepta sin emitir nada.
            let place = {
                let entry = entry.borrow();
                match entry.info {
                    EntryInfo::Variable {
                        typ: VarType::Integer,
                        ..
                    } => Some(self.place_of(&entry)),

                    _ => None,
                }
            };

            if let Some(place) = place {
                self.emit(Instruction::ReadInt(place));
            }
            if self.token.kind == TokenKind::Comma {
                self.advance()?;
            } else {
                break;
            }
        }

        self.expect(TokenKind::RParen)
    }

    /// `write-stat → WRITE ( item { , item } ) | WRITELN [( ... )]`
    fn write_stat(&mut self, line: bool) -> Parse<()> {
        self.advance()?;

        if self.token.kind == TokenKind::LParen {
            self.advance()?;

            loop {
                self.write_item()?;
                if self.token.kind == TokenKind::Comma {
                    self.advance()?;
                } else {
                    break;
                }
            }

            self.expect(TokenKind::RParen)?;
        } else if !line {
            return self.unexpected("'('");
        }

        if line {
            self.emit(Instruction::WriteLn);
        }

        Ok(())
    }

    fn write_item(&mut self) -> Parse<()> {
        match self.token.kind.clone() {
            TokenKind::IntLiteral(_) => {
                let literal = Place::Literal(self.token.lexeme.clone());
                self.emit(Instruction::WriteInt(literal));
                self.advance()
            }

            TokenKind::RealLiteral(_) => {
                let literal = Place::Literal(self.token.lexeme.clone());
                self.emit(Instruction::WriteReal(literal));
                self.advance()
            }

            TokenKind::StringLiteral(value) => {
                let label = self.intern_string(value)?;
                self.emit(Instruction::WriteStr(label));
                self.advance()
            }

            TokenKind::Ident => {
                let token = self.expect_ident()?;
                let entry = match self.table.lookup(&token.lexeme) {
                    Some(entry) => entry,
                    None => {
                        return self.fail_at(ParserError::Undeclared(token.lexeme), token.position)
                    }
                };

                let entry = entry.borrow();
                let typ = match entry.info {
                    EntryInfo::Variable { typ, .. } | EntryInfo::Constant { typ, .. } => typ,
                    _ => {
                        drop(entry);
                        return self.fail_at(
                            ParserError::BadWriteArgument(token.lexeme),
                            token.position,
                        );
                    }
                };

                let place = self.place_of(&entry);
                drop(entry);

                match typ {
                    VarType::Integer => self.emit(Instruction::WriteInt(place)),
                    VarType::Float => self.emit(Instruction::WriteReal(place)),
                    VarType::Char => {
                        return self.fail_at(
                            ParserError::BadWriteArgument(token.lexeme),
                            token.position,
                        )
                    }
                }

                Ok(())
            }

            _ => self.unexpected("a printable value"),
        }
    }

    /// Registra un literal de hilera bajo una etiqueta `_sN` a
    /// profundidad de módulo y lo agrega a la sección de datos.
    fn intern_string(&mut self, value: String) -> Parse<String> {
        let label = format!("_s{}", self.next_string);
        self.next_string += 1;

        self.insert(
            &label,
            1,
            EntryInfo::StringLiteral {
                value: value.clone(),
            },
        )?;

        self.globals.push(GlobalDecl::StringLit {
            name: label.clone(),
            value,
        });

        Ok(label)
    }

    /// `expr → simple-expr [relop simple-expr]`
    fn expr(&mut self) -> Parse<Place> {
        let lhs = self.simple_expr()?;

        if self.token.kind == TokenKind::RelOp {
            let op = self.operator()?;
            let dest = self.new_temp(VarType::Integer)?;
            let rhs = self.simple_expr()?;

            self.emit(Instruction::Binary {
                dest: dest.clone(),
                lhs,
                op,
                rhs,
            });

            return Ok(dest);
        }

        Ok(lhs)
    }

    /// `simple-expr → term { addop term }`
    fn simple_expr(&mut self) -> Parse<Place> {
        let mut acc = self.term()?;

        while self.token.kind == TokenKind::AddOp {
            let op = self.operator()?;

            // El temporal del resultado se asigna antes de reconocer
            // el operando derecho
            let dest = self.new_temp(VarType::Integer)?;
            let rhs = self.term()?;

            self.emit(Instruction::Binary {
                dest: dest.clone(),
                lhs: acc,
                op,
                rhs,
            });

            acc = dest;
        }

        Ok(acc)
    }

    /// `term → factor { mulop factor }`
    fn term(&mut self) -> Parse<Place> {
        let mut acc = self.factor()?;

        while self.token.kind == TokenKind::MulOp {
            let op = self.operator()?;
            let dest = self.new_temp(VarType::Integer)?;
            let rhs = self.factor()?;

            self.emit(Instruction::Binary {
                dest: dest.clone(),
                lhs: acc,
                op,
                rhs,
            });

            acc = dest;
        }

        Ok(acc)
    }

    fn factor(&mut self) -> Parse<Place> {
        match self.token.kind.clone() {
            TokenKind::Ident => {
                let token = self.expect_ident()?;
                let entry = match self.table.lookup(&token.lexeme) {
                    Some(entry) => entry,
                    None => {
                        return self.fail_at(ParserError::Undeclared(token.lexeme), token.position)
                    }
                };

                let entry = entry.borrow();
                match entry.info {
                    EntryInfo::Variable { .. } | EntryInfo::Constant { .. } => {
                        Ok(self.place_of(&entry))
                    }

                    _ => {
                        drop(entry);
                        self.fail_at(
                            ParserError::ProcedureInExpression(token.lexeme),
                            token.position,
                        )
                    }
                }
            }

            TokenKind::IntLiteral(_) => {
                let literal = Place::Literal(self.token.lexeme.clone());
                self.advance()?;

                let dest = self.new_temp(VarType::Integer)?;
                self.emit(Instruction::Copy {
                    dest: dest.clone(),
                    src: literal,
                });

                Ok(dest)
            }

            TokenKind::RealLiteral(_) => {
                let literal = Place::Literal(self.token.lexeme.clone());
                self.advance()?;

                let dest = self.new_temp(VarType::Float)?;
                self.emit(Instruction::Copy {
                    dest: dest.clone(),
                    src: literal,
                });

                Ok(dest)
            }

            TokenKind::LParen => {
                self.advance()?;
                let place = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(place)
            }

            TokenKind::Tilde => {
                self.advance()?;
                let dest = self.new_temp(VarType::Integer)?;
                let src = self.factor()?;

                self.emit(Instruction::Complement {
                    dest: dest.clone(),
                    src,
                });

                Ok(dest)
            }

            // El menos unario se reduce a una multiplicación por -1
            TokenKind::AddOp if self.token.lexeme == "-" => {
                self.advance()?;
                let dest = self.new_temp(VarType::Integer)?;
                let rhs = self.factor()?;

                self.emit(Instruction::Binary {
                    dest: dest.clone(),
                    lhs: Place::Literal(String::from("-1")),
                    op: BinOp::Mul,
                    rhs,
                });

                Ok(dest)
            }

            _ => self.unexpected("an expression factor"),
        }
    }

    /// Consume el token de operador actual y lo traduce a [`BinOp`].
    fn operator(&mut self) -> Parse<BinOp> {
        match BinOp::from_lexeme(&self.token.lexeme) {
            Some(op) => {
                self.advance()?;
                Ok(op)
            }

            None => self.unexpected("an operator"),
        }
    }

    /// Declara un temporal `_tN` en el ámbito actual.
    ///
    /// Los temporales avanzan el contador de desplazamientos pero no
    /// se suman al tamaño de locales declaradas del marco.
    fn new_temp(&mut self, typ: VarType) -> Parse<Place> {
        let name = format!("_t{}", self.next_temp);
        self.next_temp += 1;

        let offset = self.offset;
        self.insert(
            &name,
            self.depth,
            EntryInfo::Variable {
                typ,
                offset,
                size: typ.size(),
                parameter: None,
            },
        )?;

        if self.depth == 1 {
            self.globals.push(GlobalDecl::Variable { name: name.clone() });
        }

        self.offset += typ.size();
        if self.depth <= 1 {
            Ok(Place::Global(name))
        } else {
            Ok(Place::Local { offset })
        }
    }

    /// Resuelve una entrada a su forma de operando.
    fn place_of(&self, entry: &TableEntry) -> Place {
        match entry.info {
            EntryInfo::Variable {
                offset,
                size,
                parameter: Some(mode),
                ..
            } => {
                let size_of_params = self.current_params_size();
                Place::Param {
                    disp: size_of_params - offset - size + 4,
                    indirect: mode == PassMode::Reference,
                }
            }

            EntryInfo::Variable { offset, .. } | EntryInfo::Constant { offset, .. } => {
                if entry.depth <= 1 {
                    Place::Global(entry.name.clone())
                } else {
                    Place::Local { offset }
                }
            }

            _ => unreachable!("only variables and constants have places"),
        }
    }

    fn current_params_size(&self) -> i32 {
        let scope = self.scopes.last().expect("a scope is always open");
        let scope = scope.borrow();

        match &scope.info {
            EntryInfo::Procedure(frame) | EntryInfo::Module(frame) => frame.size_of_params,
            _ => unreachable!("scope entries are procedures or modules"),
        }
    }

    /// Actualiza el descriptor de marco del ámbito abierto más interno.
    fn with_frame<R>(&mut self, action: impl FnOnce(&mut FrameInfo) -> R) -> R {
        let scope = self.scopes.last().expect("a scope is always open");
        let mut scope = scope.borrow_mut();

        match &mut scope.info {
            EntryInfo::Procedure(frame) | EntryInfo::Module(frame) => action(frame),
            _ => unreachable!("scope entries are procedures or modules"),
        }
    }

    /// Cierra el ámbito abierto más interno, preservando su marco.
    fn close_scope(&mut self, name: &str) {
        let scope = self.scopes.pop().expect("a scope is always open");
        let scope = scope.borrow();

        let frame = match &scope.info {
            EntryInfo::Procedure(frame) | EntryInfo::Module(frame) => frame.clone(),
            _ => unreachable!("scope entries are procedures or modules"),
        };

        self.frames.insert(name.to_owned(), frame);
        self.table.delete_depth(self.depth);
    }

    fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    fn insert(&mut self, name: &str, depth: u32, info: EntryInfo) -> Parse<EntryRef> {
        let at = self.token.position;
        self.table
            .insert(name, depth, info)
            .map_err(|error| Located::at(ParserError::from(error), at).into())
    }

    /// Avanza el preanálisis al siguiente token.
    fn advance(&mut self) -> Parse<()> {
        let token = self.scanner.next_token()?;
        if self.listing.contains(ListingOptions::TOKENS) {
            println!(
                "{:<8} {:<20} {}",
                token.position.to_string(),
                token.lexeme,
                token.kind
            );
        }

        self.token = token;
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind) -> Parse<()> {
        if self.token.kind == kind {
            self.advance()
        } else {
            self.unexpected(&kind.to_string())
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(TokenKind::Keyword(keyword))
    }

    fn expect_ident(&mut self) -> Parse<Token> {
        if self.token.kind == TokenKind::Ident {
            let token = self.token.clone();
            self.advance()?;
            Ok(token)
        } else {
            self.unexpected("an identifier")
        }
    }

    /// El `=` de una declaración de constante es léxicamente un relop.
    fn expect_equals(&mut self) -> Parse<()> {
        if self.token.kind == TokenKind::RelOp && self.token.lexeme == "=" {
            self.advance()
        } else {
            self.unexpected("'='")
        }
    }

    fn unexpected<T>(&self, expected: &str) -> Parse<T> {
        let found = if self.token.lexeme.is_empty() {
            self.token.kind.to_string()
        } else {
            format!("'{}'", self.token.lexeme)
        };

        self.fail(ParserError::UnexpectedToken {
            expected: expected.to_owned(),
            found,
        })
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        self.fail_at(error, self.token.position)
    }

    fn fail_at<T>(&self, error: ParserError, at: Position) -> Parse<T> {
        Err(CompileError::Syntax(Located::at(error, at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(source: &str) -> tac::Program {
        compile(source, ListingOptions::empty()).expect("compilation failed")
    }

    fn compile_err(source: &str) -> ParserError {
        match compile(source, ListingOptions::empty()).unwrap_err() {
            CompileError::Syntax(error) => error.into_inner(),
            CompileError::Lexical(error) => panic!("unexpected lexical error: {:?}", error),
        }
    }

    #[test]
    fn literal_addition_scenario() {
        let program = compile_ok("MODULE M;\nVAR x : INTEGER;\nBEGIN\n  x := 1 + 2;\nEND M.");

        let expected = "\
proc       M
_t1        =     1
_t3        =     2
_t2        =     _t1        +     _t3
x          =     _t2
endp       M

Start proc M
";

        assert_eq!(program.listing(), expected);
    }

    #[test]
    fn module_globals_include_temporaries() {
        let program = compile_ok("MODULE M;\nVAR x : INTEGER;\nBEGIN\n  x := 1 + 2;\nEND M.");

        let names: Vec<&str> = program
            .globals
            .iter()
            .map(|global| match global {
                GlobalDecl::Variable { name } => name.as_str(),
                other => panic!("unexpected global: {:?}", other),
            })
            .collect();

        assert_eq!(names, vec!["x", "_t1", "_t2", "_t3"]);
    }

    #[test]
    fn local_sizes_accumulate_declared_names_only() {
        let program = compile_ok(
            "MODULE M;\nVAR a, b : INTEGER; c : REAL;\nBEGIN\n  a := b * 3;\nEND M.",
        );

        let frame = &program.frames["M"];
        assert_eq!(frame.size_of_locals, 8);
        assert_eq!(frame.size_of_params, 0);
    }

    #[test]
    fn parameter_displacements_follow_the_frame_formula() {
        let program = compile_ok(
            "MODULE M;\n\
             PROCEDURE P(x : INTEGER; VAR y : INTEGER);\n\
             BEGIN\n  y := x;\nEND P;\n\
             BEGIN\nEND M.",
        );

        // size_of_params = 2 + 4; x: 6-0-2+4 = 8, y: 6-2-4+4 = 4
        assert!(program
            .listing()
            .contains("@_bp+4     =     _bp+8"));
    }

    #[test]
    fn procedure_locals_are_frame_relative() {
        let program = compile_ok(
            "MODULE M;\n\
             PROCEDURE P;\nVAR a : INTEGER;\nBEGIN\n  a := 7;\nEND P;\n\
             BEGIN\nEND M.",
        );

        let listing = program.listing();
        assert!(listing.contains("_bp-4      =     7"), "{}", listing);
        assert!(listing.contains("_bp-2      =     _bp-4"), "{}", listing);

        // El temporal no cuenta para el tamaño de locales
        assert_eq!(program.frames["P"].size_of_locals, 2);
    }

    #[test]
    fn call_pushes_arguments_then_calls() {
        let program = compile_ok(
            "MODULE M;\nVAR g : INTEGER;\n\
             PROCEDURE P(x : INTEGER; VAR y : INTEGER);\nBEGIN\nEND P;\n\
             BEGIN\n  P(5, g);\nEND M.",
        );

        let listing = program.listing();
        let push_value = listing.find("push       _t1").expect("missing value push");
        let push_ref = listing.find("push       @g").expect("missing ref push");
        let call = listing.find("call       P").expect("missing call");

        assert!(push_value < push_ref && push_ref < call);
    }

    #[test]
    fn literal_by_reference_is_fatal() {
        let error = compile_err(
            "MODULE M;\n\
             PROCEDURE P(VAR y : INTEGER);\nBEGIN\nEND P;\n\
             BEGIN\n  P(5);\nEND M.",
        );

        assert_eq!(error, ParserError::LiteralByReference(String::from("P")));
    }

    #[test]
    fn constant_by_reference_is_fatal() {
        let error = compile_err(
            "MODULE M;\nCONST c = 1;\n\
             PROCEDURE P(VAR y : INTEGER);\nBEGIN\nEND P;\n\
             BEGIN\n  P(c);\nEND M.",
        );

        assert_eq!(error, ParserError::ConstantByReference(String::from("c")));
    }

    #[test]
    fn arity_is_checked_both_ways() {
        let error = compile_err(
            "MODULE M;\n\
             PROCEDURE P(x : INTEGER);\nBEGIN\nEND P;\n\
             BEGIN\n  P();\nEND M.",
        );
        assert_eq!(error, ParserError::TooFewArguments(String::from("P")));

        let error = compile_err(
            "MODULE M;\n\
             PROCEDURE P(x : INTEGER);\nBEGIN\nEND P;\n\
             BEGIN\n  P(1, 2);\nEND M.",
        );
        assert_eq!(error, ParserError::TooManyArguments(String::from("P")));
    }

    #[test]
    fn redeclaration_in_same_scope_is_fatal() {
        let error = compile_err("MODULE M;\nVAR x, x : INTEGER;\nBEGIN\nEND M.");
        assert_eq!(
            error,
            ParserError::Redeclared(Redeclaration(String::from("x")))
        );
    }

    #[test]
    fn shadowing_across_scopes_is_allowed() {
        let program = compile_ok(
            "MODULE M;\nVAR x : INTEGER;\n\
             PROCEDURE P;\nVAR x : INTEGER;\nBEGIN\n  x := 1;\nEND P;\n\
             BEGIN\n  x := 2;\nEND M.",
        );

        let listing = program.listing();
        // Adentro gana la local, afuera la global
        assert!(listing.contains("_bp-2      =     _bp-4"), "{}", listing);
        assert!(listing.contains("x          =     _t2"), "{}", listing);
    }

    #[test]
    fn assignment_to_constant_is_fatal() {
        let error = compile_err("MODULE M;\nCONST c = 5;\nBEGIN\n  c := 1;\nEND M.");
        assert_eq!(error, ParserError::AssignToConstant(String::from("c")));
    }

    #[test]
    fn undeclared_name_is_fatal() {
        let error = compile_err("MODULE M;\nBEGIN\n  x := 1;\nEND M.");
        assert_eq!(error, ParserError::Undeclared(String::from("x")));
    }

    #[test]
    fn module_closing_name_must_match() {
        let error = compile_err("MODULE M;\nBEGIN\nEND N.");
        assert_eq!(
            error,
            ParserError::ModuleNameMismatch {
                expected: String::from("M"),
                found: String::from("N"),
            }
        );
    }

    #[test]
    fn read_emits_rdi_for_integer_variables_only() {
        let program =
            compile_ok("MODULE M;\nVAR a : INTEGER; r : REAL;\nBEGIN\n  READ(a, r);\nEND M.");
        let listing = program.listing();

        assert!(listing.contains("rdi        a"));
        assert!(!listing.contains("rdi        r"));

        let error = compile_err("MODULE M;\nVAR a : INTEGER;\nBEGIN\n  READ(a, b);\nEND M.");
        assert_eq!(error, ParserError::Undeclared(String::from("b")));
    }

    #[test]
    fn write_interns_string_literals() {
        let program =
            compile_ok("MODULE M;\nBEGIN\n  WRITE(\"hola\");\n  WRITELN('mundo');\nEND M.");

        let listing = program.listing();
        assert!(listing.contains("wrs        _s0"));
        assert!(listing.contains("wrs        _s1"));
        assert!(listing.contains("wrln"));

        assert!(program.globals.contains(&GlobalDecl::StringLit {
            name: String::from("_s0"),
            value: String::from("hola"),
        }));
    }

    #[test]
    fn writeln_accepts_bare_and_parenthesized_forms() {
        let program = compile_ok(
            "MODULE M;\nVAR x : INTEGER;\nBEGIN\n  WRITELN;\n  WRITELN(x);\nEND M.",
        );

        let listing = program.listing();
        assert_eq!(listing.matches("wrln").count(), 2);
        assert!(listing.contains("wri        x"));

        // WRITE sin lista sigue siendo un error
        let error = compile_err("MODULE M;\nBEGIN\n  WRITE;\nEND M.");
        assert!(matches!(error, ParserError::UnexpectedToken { .. }));
    }

    #[test]
    fn unary_operators_lower_to_tac() {
        let program = compile_ok(
            "MODULE M;\nVAR x : INTEGER;\nBEGIN\n  x := -x;\n  x := ~x;\nEND M.",
        );

        let listing = program.listing();
        assert!(listing.contains("_t1        =     -1         *     x"), "{}", listing);
        assert!(listing.contains("_t2        =     x          ~"), "{}", listing);
    }
}
