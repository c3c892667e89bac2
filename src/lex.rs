//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone el archivo
//! fuente (un buffer de líneas) en unidades léxicas denominadas
//! tokens. Los espacios en blanco y los comentarios se descartan
//! durante esta operación. Cada token emitido está asociado a la
//! posición donde comienza en el código fuente original, lo cual
//! permite rastrear errores tanto en los mismos como en constructos
//! más elevados de fases posteriores.
//!
//! # Reglas importantes del lenguaje
//! - Los identificadores tienen un límite de longitud de 17 caracteres.
//! - Las palabras reservadas son sensibles a mayúsculas: `MODULE` es
//!   una palabra clave mientras que `module` es un identificador.
//! - Las palabras `DIV` y `MOD` son operadores multiplicativos y `OR`
//!   es un operador aditivo, no palabras clave ordinarias.
//! - Los comentarios `(* ... *)` pueden anidarse recursivamente.
//!
//! # Errores
//! El scanner no se recupera de condiciones de error: una vez que
//! produce un error, toda llamada posterior retorna el mismo error
//! sin avanzar. Lo mismo aplica para el token de fin de archivo.

use crate::source::{Located, Position};
use std::{
    fmt::{self, Display},
    str::FromStr,
};

use thiserror::Error;

/// Longitud máxima de un identificador.
pub const MAX_IDENT_LEN: usize = 17;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexerError {
    /// Un identificador excede la longitud máxima.
    #[error("the identifier '{0}' can only be {MAX_IDENT_LEN} characters long")]
    IdentTooLong(String),

    /// Una constante numérica no es representable.
    #[error("the numeric literal '{0}' is out of range")]
    NumberOverflow(String),

    /// Salto de línea dentro de un literal de hilera.
    #[error("newline encountered when expecting end of string literal")]
    NewlineInString,

    /// Fin de archivo dentro de un literal de hilera.
    #[error("end of file encountered when expecting end of string literal")]
    EofInString,

    /// Fin de archivo dentro de un comentario.
    #[error("end of file encountered when expecting end of comment")]
    UnterminatedComment,
}

/// Una palabra reservada.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Module,
    Procedure,
    Var,
    Begin,
    End,
    If,
    Then,
    Else,
    Elsif,
    While,
    Do,
    Array,
    Record,
    Const,
    Type,
    Integer,
    Real,
    Char,
    Read,
    Write,
    Writeln,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("MODULE", Keyword::Module),
    ("PROCEDURE", Keyword::Procedure),
    ("VAR", Keyword::Var),
    ("BEGIN", Keyword::Begin),
    ("END", Keyword::End),
    ("IF", Keyword::If),
    ("THEN", Keyword::Then),
    ("ELSE", Keyword::Else),
    ("ELSIF", Keyword::Elsif),
    ("WHILE", Keyword::While),
    ("DO", Keyword::Do),
    ("ARRAY", Keyword::Array),
    ("RECORD", Keyword::Record),
    ("CONST", Keyword::Const),
    ("TYPE", Keyword::Type),
    ("INTEGER", Keyword::Integer),
    ("REAL", Keyword::Real),
    ("CHAR", Keyword::Char),
    ("READ", Keyword::Read),
    ("WRITE", Keyword::Write),
    ("WRITELN", Keyword::Writeln),
];

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = KEYWORDS
            .iter()
            .find(|&&(_, keyword)| keyword == *self)
            .map(|&(name, _)| name)
            .unwrap_or_default();

        fmt.write_str(name)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        // Case-sensitive por regla del lenguaje
        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Palabras que el scanner clasifica como operadores multiplicativos.
const MULOP_WORDS: &[&str] = &["DIV", "MOD"];

/// Palabras que el scanner clasifica como operadores aditivos.
const ADDOP_WORDS: &[&str] = &["OR"];

/// Clase de un token, incluyendo el valor de los literales.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Palabra reservada.
    Keyword(Keyword),

    /// `=`, `#`, `<`, `>`, `<=`, `>=`
    RelOp,

    /// `+`, `-`, `OR`
    AddOp,

    /// `*`, `/`, `&`, `DIV`, `MOD`
    MulOp,

    /// `:=`
    Assign,

    /// `(`
    LParen,

    /// `)`
    RParen,

    /// `{`
    LCurly,

    /// `}`
    RCurly,

    /// `[`
    LBracket,

    /// `]`
    RBracket,

    /// `,`
    Comma,

    /// `;`
    Semicolon,

    /// `:`
    Colon,

    /// `.`
    Period,

    /// `` ` ``
    Grave,

    /// `~`
    Tilde,

    /// Literal de entero.
    IntLiteral(i32),

    /// Literal decimal.
    RealLiteral(f64),

    /// Literal de hilera, sin las comillas.
    StringLiteral(String),

    /// Identificador.
    Ident,

    /// Fin de la entrada.
    Eof,

    /// Carácter que no pertenece al lenguaje.
    Unknown,
}

impl Display for TokenKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TokenKind::*;

        match self {
            Keyword(keyword) => write!(fmt, "{}", keyword),
            RelOp => fmt.write_str("a relational operator"),
            AddOp => fmt.write_str("an additive operator"),
            MulOp => fmt.write_str("a multiplicative operator"),
            Assign => fmt.write_str("':='"),
            LParen => fmt.write_str("'('"),
            RParen => fmt.write_str("')'"),
            LCurly => fmt.write_str("'{'"),
            RCurly => fmt.write_str("'}'"),
            LBracket => fmt.write_str("'['"),
            RBracket => fmt.write_str("']'"),
            Comma => fmt.write_str("','"),
            Semicolon => fmt.write_str("';'"),
            Colon => fmt.write_str("':'"),
            Period => fmt.write_str("'.'"),
            Grave => fmt.write_str("'`'"),
            Tilde => fmt.write_str("'~'"),
            IntLiteral(_) => fmt.write_str("an integer literal"),
            RealLiteral(_) => fmt.write_str("a decimal literal"),
            StringLiteral(_) => fmt.write_str("a string literal"),
            Ident => fmt.write_str("an identifier"),
            Eof => fmt.write_str("end of file"),
            Unknown => fmt.write_str("an unknown character"),
        }
    }
}

/// Objeto resultante del análisis léxico.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub position: Position,
}

/// Scanner de tokens sobre un buffer de líneas.
///
/// El scanner mantiene un carácter actual y avanza línea por línea,
/// sintetizando un `'\n'` al final de cada línea. La clase de cada
/// token se decide a partir de su primer carácter.
pub struct Scanner {
    lines: Vec<Vec<char>>,
    line_index: usize,
    char_index: usize,
    current: char,
    eof: bool,
    terminal: Option<Result<Token, Located<LexerError>>>,
}

impl Scanner {
    /// Crea un scanner a partir del texto fuente completo.
    pub fn new(source: &str) -> Self {
        let lines: Vec<Vec<char>> = source.lines().map(|line| line.chars().collect()).collect();

        let mut scanner = Scanner {
            lines,
            line_index: 0,
            char_index: 0,
            current: ' ',
            eof: false,
            terminal: None,
        };

        scanner.next_char();
        scanner
    }

    /// Obtiene el siguiente token de la entrada.
    ///
    /// Los tokens de fin de archivo y de error son terminales: una
    /// vez producidos, toda llamada posterior los repite sin avanzar.
    pub fn next_token(&mut self) -> Result<Token, Located<LexerError>> {
        if let Some(terminal) = &self.terminal {
            return terminal.clone();
        }

        let result = self.scan();
        match &result {
            Ok(token) if token.kind == TokenKind::Eof => self.terminal = Some(result.clone()),
            Err(_) => self.terminal = Some(result.clone()),
            _ => (),
        }

        result
    }

    fn scan(&mut self) -> Result<Token, Located<LexerError>> {
        loop {
            // Todo código de control a la altura del espacio o por
            // debajo cuenta como espacio en blanco
            while !self.eof && self.current <= ' ' {
                self.next_char();
            }

            if self.eof {
                let position = Position::at(self.line_index as u32 + 1, 1);
                return Ok(Token {
                    kind: TokenKind::Eof,
                    lexeme: String::new(),
                    position,
                });
            }

            let start = self.position();
            let first = self.current;

            // Apertura de comentario; los comentarios son espacio en blanco
            if first == '(' && self.peek_char() == '*' {
                self.next_char();
                self.comment().map_err(|error| Located::at(error, start))?;
                self.next_char();
                continue;
            }

            self.next_char();

            let token = if first.is_ascii_alphabetic() {
                self.word(first, start)
            } else if first.is_ascii_digit() {
                self.number(first, start)
            } else if first == '"' || first == '\'' {
                let token = self.string_literal(first, start);
                self.next_char();
                token
            } else {
                self.operator(first, start)
            };

            return token.map_err(|error| Located::at(error, start));
        }
    }

    fn word(&mut self, first: char, start: Position) -> Result<Token, LexerError> {
        let mut lexeme = String::from(first);
        while self.current.is_ascii_alphanumeric() {
            lexeme.push(self.current);
            self.next_char();
        }

        if lexeme.len() > MAX_IDENT_LEN {
            return Err(LexerError::IdentTooLong(lexeme));
        }

        let kind = if MULOP_WORDS.contains(&lexeme.as_str()) {
            TokenKind::MulOp
        } else if ADDOP_WORDS.contains(&lexeme.as_str()) {
            TokenKind::AddOp
        } else if let Ok(keyword) = Keyword::from_str(&lexeme) {
            TokenKind::Keyword(keyword)
        } else {
            TokenKind::Ident
        };

        Ok(Token {
            kind,
            lexeme,
            position: start,
        })
    }

    fn number(&mut self, first: char, start: Position) -> Result<Token, LexerError> {
        let mut lexeme = String::from(first);
        while self.current.is_ascii_digit() {
            lexeme.push(self.current);
            self.next_char();
        }

        // Un punto solo extiende el literal si le sigue otro dígito,
        // de lo contrario pertenece a un token aparte
        let kind = if self.current == '.' && self.peek_char().is_ascii_digit() {
            lexeme.push('.');
            self.next_char();

            while self.current.is_ascii_digit() {
                lexeme.push(self.current);
                self.next_char();
            }

            let value = lexeme
                .parse()
                .map_err(|_| LexerError::NumberOverflow(lexeme.clone()))?;

            TokenKind::RealLiteral(value)
        } else {
            let value = lexeme
                .parse()
                .map_err(|_| LexerError::NumberOverflow(lexeme.clone()))?;

            TokenKind::IntLiteral(value)
        };

        Ok(Token {
            kind,
            lexeme,
            position: start,
        })
    }

    fn string_literal(&mut self, quote: char, start: Position) -> Result<Token, LexerError> {
        let mut contents = String::new();

        while self.current != quote {
            if self.eof {
                return Err(LexerError::EofInString);
            } else if self.current == '\n' {
                return Err(LexerError::NewlineInString);
            }

            contents.push(self.current);
            self.next_char();
        }

        let lexeme = format!("{}{}{}", quote, contents, quote);
        Ok(Token {
            kind: TokenKind::StringLiteral(contents),
            lexeme,
            position: start,
        })
    }

    fn operator(&mut self, first: char, start: Position) -> Result<Token, LexerError> {
        use TokenKind::*;

        // Secuencias de dos caracteres antes que operadores simples
        if self.current == '=' && matches!(first, '<' | '>' | ':') {
            let kind = if first == ':' { Assign } else { RelOp };
            let lexeme = format!("{}=", first);
            self.next_char();

            return Ok(Token {
                kind,
                lexeme,
                position: start,
            });
        }

        let kind = match first {
            '=' | '#' | '<' | '>' => RelOp,
            '+' | '-' => AddOp,
            '*' | '/' | '&' => MulOp,
            '(' => LParen,
            ')' => RParen,
            '{' => LCurly,
            '}' => RCurly,
            '[' => LBracket,
            ']' => RBracket,
            ',' => Comma,
            ';' => Semicolon,
            ':' => Colon,
            '.' => Period,
            '`' => Grave,
            '~' => Tilde,
            _ => Unknown,
        };

        Ok(Token {
            kind,
            lexeme: first.to_string(),
            position: start,
        })
    }

    /// Consume un comentario hasta su cierre, incluyendo anidamiento.
    ///
    /// Al entrar, el carácter actual es el `'*'` de apertura. Al
    /// retornar, el carácter actual es el `')'` de cierre.
    fn comment(&mut self) -> Result<(), LexerError> {
        let mut previous;
        let mut current = ' ';

        loop {
            self.next_char();
            if self.eof {
                return Err(LexerError::UnterminatedComment);
            }

            previous = current;
            current = self.current;

            match (previous, current) {
                ('*', ')') => return Ok(()),
                ('(', '*') => {
                    self.comment()?;
                    current = ' ';
                }

                _ => (),
            }
        }
    }

    /// Posición del carácter actual.
    fn position(&self) -> Position {
        Position::at(self.line_index as u32 + 1, self.char_index as u32)
    }

    fn peek_char(&self) -> char {
        if self.eof {
            '\0'
        } else if self.char_index == self.lines[self.line_index].len() {
            '\n'
        } else {
            self.lines[self.line_index][self.char_index]
        }
    }

    fn next_char(&mut self) {
        if self.line_index >= self.lines.len() {
            self.eof = true;
            self.current = '\0';
        } else if self.char_index == self.lines[self.line_index].len() {
            self.next_line();
        } else {
            self.current = self.lines[self.line_index][self.char_index];
            self.char_index += 1;
        }
    }

    fn next_line(&mut self) {
        self.line_index += 1;
        self.char_index = 0;

        if self.line_index >= self.lines.len() {
            self.eof = true;
            self.current = '\0';
        } else {
            // El final de línea se reporta como '\n' para que los
            // literales de hilera detecten el salto
            self.current = '\n';
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut scanner = Scanner::new(source);
        let mut tokens = Vec::new();

        loop {
            let token = scanner.next_token().expect("unexpected lexical error");
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);

            if done {
                break;
            }
        }

        tokens
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokens(source).into_iter().map(|token| token.kind).collect()
    }

    #[test]
    fn classifies_identifiers_and_reserved_words() {
        use TokenKind::*;

        assert_eq!(
            kinds("MODULE module x1 DIV MOD OR INTEGER"),
            vec![
                Keyword(super::Keyword::Module),
                Ident,
                Ident,
                MulOp,
                MulOp,
                AddOp,
                Keyword(super::Keyword::Integer),
                Eof,
            ]
        );
    }

    #[test]
    fn reserved_words_are_case_sensitive() {
        assert_eq!(
            kinds("begin Begin BEGIN"),
            vec![
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Keyword(Keyword::Begin),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn does_not_split_double_operators() {
        let tokens = tokens("a := b <= c >= d");
        let lexemes: Vec<&str> = tokens.iter().map(|token| token.lexeme.as_str()).collect();
        assert_eq!(lexemes, vec!["a", ":=", "b", "<=", "c", ">=", "d", ""]);

        assert_eq!(tokens[1].kind, TokenKind::Assign);
        assert_eq!(tokens[3].kind, TokenKind::RelOp);
        assert_eq!(tokens[5].kind, TokenKind::RelOp);
    }

    #[test]
    fn colon_without_equals_is_a_colon() {
        assert_eq!(
            kinds("x : INTEGER"),
            vec![
                TokenKind::Ident,
                TokenKind::Colon,
                TokenKind::Keyword(Keyword::Integer),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn consumes_nested_comments() {
        assert_eq!(
            kinds("a (* outer (* inner *) still outer *) b"),
            vec![TokenKind::Ident, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn comment_may_span_lines() {
        assert_eq!(
            kinds("a (* one\ntwo\nthree *) b"),
            vec![TokenKind::Ident, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_comment_is_an_error() {
        let mut scanner = Scanner::new("a (* no close");
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Ident);

        let error = scanner.next_token().unwrap_err();
        assert_eq!(*error.as_ref(), LexerError::UnterminatedComment);
    }

    #[test]
    fn numeric_literals() {
        let tokens = tokens("42 3.25 7.");
        assert_eq!(tokens[0].kind, TokenKind::IntLiteral(42));
        assert_eq!(tokens[1].kind, TokenKind::RealLiteral(3.25));

        // "7." es un entero seguido de un punto
        assert_eq!(tokens[2].kind, TokenKind::IntLiteral(7));
        assert_eq!(tokens[3].kind, TokenKind::Period);
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let mut scanner = Scanner::new("99999999999999999999");
        let error = scanner.next_token().unwrap_err();
        assert!(matches!(*error.as_ref(), LexerError::NumberOverflow(_)));
    }

    #[test]
    fn string_literals_keep_contents() {
        let tokens = tokens("\"hello world\" 'single'");
        assert_eq!(
            tokens[0].kind,
            TokenKind::StringLiteral(String::from("hello world"))
        );
        assert_eq!(
            tokens[1].kind,
            TokenKind::StringLiteral(String::from("single"))
        );
    }

    #[test]
    fn newline_terminates_string_with_error() {
        let mut scanner = Scanner::new("\"abc\ndef\"");
        let error = scanner.next_token().unwrap_err();
        assert_eq!(*error.as_ref(), LexerError::NewlineInString);
    }

    #[test]
    fn long_identifiers_are_rejected() {
        let mut scanner = Scanner::new("abcdefghijklmnopqr");
        let error = scanner.next_token().unwrap_err();
        assert!(matches!(*error.as_ref(), LexerError::IdentTooLong(_)));

        // 17 caracteres exactos aún es válido
        let mut scanner = Scanner::new("abcdefghijklmnopq");
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Ident);
    }

    #[test]
    fn eof_is_terminal() {
        let mut scanner = Scanner::new("x");
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Ident);

        for _ in 0..3 {
            assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Eof);
        }
    }

    #[test]
    fn errors_are_terminal() {
        let mut scanner = Scanner::new("\"sin cierre");
        let first = scanner.next_token().unwrap_err();
        let second = scanner.next_token().unwrap_err();
        assert_eq!(first, second);
    }

    #[test]
    fn tracks_token_positions() {
        let tokens = tokens("MODULE M;\n  x := 1;");
        assert_eq!(tokens[0].position, Position::at(1, 1));
        assert_eq!(tokens[1].position, Position::at(1, 8));
        assert_eq!(tokens[3].position, Position::at(2, 3));
    }
}
