//! Diagnósticos unificados de compilación.
//!
//! La compilación se detiene en el primer error. Cada fase produce su
//! propio tipo de error con posición asociada; aquí se unifican en un
//! solo tipo que el driver imprime en un formato común.

use std::fmt::{self, Display, Formatter};

use crate::{lex::LexerError, parse::ParserError, source::Located};

/// Resultado de una operación de compilación.
pub type Parse<T> = Result<T, CompileError>;

/// Un error fatal de cualquiera de las fases del front end.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    Lexical(Located<LexerError>),
    Syntax(Located<ParserError>),
}

impl Display for CompileError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lexical(error) => {
                write!(formatter, "error at {}: {}", error.position(), error.as_ref())
            }

            CompileError::Syntax(error) => {
                write!(formatter, "error at {}: {}", error.position(), error.as_ref())
            }
        }
    }
}

impl std::error::Error for CompileError {}

impl From<Located<LexerError>> for CompileError {
    fn from(error: Located<LexerError>) -> Self {
        CompileError::Lexical(error)
    }
}

impl From<Located<ParserError>> for CompileError {
    fn from(error: Located<ParserError>) -> Self {
        CompileError::Syntax(error)
    }
}
