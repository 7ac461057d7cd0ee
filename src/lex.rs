//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone el texto fuente en
//! unidades léxicas denominadas tokens. Los espacios en blanco se descartan
//! durante esta operación. Cada token emitido está asociado a una posición
//! en el código fuente original, lo cual permite rastrear errores en
//! constructos más elevados de fases posteriores.
//!
//! # Contenido de un token
//! A diferencia de otros lexers, todo token conserva su lexema original,
//! incluso operadores y palabras clave. Las constantes numéricas no se
//! resuelven aquí: el parser necesita el texto exacto para reconstruir
//! literales reales a partir de `Number Dot Number`.
//!
//! # Reglas importantes del lenguaje
//! - Las palabras clave distinguen mayúsculas, solamente se reconocen
//!   en minúscula.
//! - `<>` no es un token. Se emite `<` seguido de `>`, y el parser los
//!   reúne si son adyacentes. De la misma forma, `..` son dos [`TokenKind::Dot`].
//! - Los literales de texto no se escanean como una unidad: un apóstrofo
//!   solitario se emite como un identificador con lexema `'`, y el
//!   contenido entre apóstrofos se tokeniza normalmente.
//!
//! # Errores
//! El lexer es total. Los caracteres desconocidos se emiten como
//! identificadores de un solo carácter, y son las fases posteriores
//! las que rechazan lo que no puedan utilizar. Todo escaneo termina con
//! exactamente un [`TokenKind::EndOfFile`].

use crate::source::{Located, Position};
use std::{
    fmt::{self, Display},
    iter::Peekable,
    str::{CharIndices, FromStr},
};

/// Objeto resultante del análisis léxico.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    kind: TokenKind,
    lexeme: String,
}

impl Token {
    /// Construye un token.
    pub fn new<S: Into<String>>(kind: TokenKind, lexeme: S) -> Self {
        Token {
            kind,
            lexeme: lexeme.into(),
        }
    }

    /// Clasificación del token.
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Texto original del token.
    pub fn lexeme(&self) -> &str {
        &self.lexeme
    }

    /// Determina si se trata del apóstrofo que abre o cierra un literal de texto.
    pub fn is_quote(&self) -> bool {
        self.kind == TokenKind::Identifier && self.lexeme == "'"
    }
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Identifier => write!(fmt, "identifier `{}`", self.lexeme),
            TokenKind::Number => write!(fmt, "literal `{}`", self.lexeme),
            TokenKind::EndOfFile => fmt.write_str("end of file"),
            kind => kind.fmt(fmt),
        }
    }
}

/// Clases de tokens.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Identificador, o cualquier carácter desconocido.
    Identifier,

    /// Secuencia de dígitos.
    Number,

    /// Palabra clave.
    Keyword(Keyword),

    /// `:=`
    Assign,

    /// `:`
    Colon,

    /// `;`
    Semicolon,

    /// `,`
    Comma,

    /// `.`
    Dot,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `[`
    OpenSquare,

    /// `]`
    CloseSquare,

    /// `^`
    Caret,

    /// `=`
    Equal,

    /// `<`
    Less,

    /// `>`
    Greater,

    /// `<=`
    LessEqual,

    /// `>=`
    GreaterEqual,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `/`
    Slash,

    /// Fin de la entrada.
    EndOfFile,
}

impl Display for TokenKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TokenKind::*;

        match self {
            Identifier => fmt.write_str("identifier"),
            Number => fmt.write_str("number"),
            Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            Assign => fmt.write_str("`:=`"),
            Colon => fmt.write_str("`:`"),
            Semicolon => fmt.write_str("`;`"),
            Comma => fmt.write_str("`,`"),
            Dot => fmt.write_str("`.`"),
            OpenParen => fmt.write_str("`(`"),
            CloseParen => fmt.write_str("`)`"),
            OpenSquare => fmt.write_str("`[`"),
            CloseSquare => fmt.write_str("`]`"),
            Caret => fmt.write_str("`^`"),
            Equal => fmt.write_str("`=`"),
            Less => fmt.write_str("`<`"),
            Greater => fmt.write_str("`>`"),
            LessEqual => fmt.write_str("`<=`"),
            GreaterEqual => fmt.write_str("`>=`"),
            Plus => fmt.write_str("`+`"),
            Minus => fmt.write_str("`-`"),
            Times => fmt.write_str("`*`"),
            Slash => fmt.write_str("`/`"),
            EndOfFile => fmt.write_str("end of file"),
        }
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Program,
    Var,
    Const,
    Type,
    Procedure,
    Function,
    Begin,
    End,
    If,
    Then,
    Else,
    While,
    Do,
    For,
    To,
    Downto,
    Repeat,
    Until,
    Case,
    Of,
    With,
    Record,
    Array,
    New,
    Dispose,
    Not,
    Div,
    Mod,
    And,
    Or,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("program",   Keyword::Program),
    ("var",       Keyword::Var),
    ("const",     Keyword::Const),
    ("type",      Keyword::Type),
    ("procedure", Keyword::Procedure),
    ("function",  Keyword::Function),
    ("begin",     Keyword::Begin),
    ("end",       Keyword::End),
    ("if",        Keyword::If),
    ("then",      Keyword::Then),
    ("else",      Keyword::Else),
    ("while",     Keyword::While),
    ("do",        Keyword::Do),
    ("for",       Keyword::For),
    ("to",        Keyword::To),
    ("downto",    Keyword::Downto),
    ("repeat",    Keyword::Repeat),
    ("until",     Keyword::Until),
    ("case",      Keyword::Case),
    ("of",        Keyword::Of),
    ("with",      Keyword::With),
    ("record",    Keyword::Record),
    ("array",     Keyword::Array),
    ("new",       Keyword::New),
    ("dispose",   Keyword::Dispose),
    ("not",       Keyword::Not),
    ("div",       Keyword::Div),
    ("mod",       Keyword::Mod),
    ("and",       Keyword::And),
    ("or",        Keyword::Or),
];

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = KEYWORDS
            .iter()
            .find(|&&(_, keyword)| keyword == *self)
            .map_or("?", |&(name, _)| name);

        fmt.write_str(name)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Escanea un texto fuente completo.
///
/// Esta operación nunca falla. El último token siempre es
/// [`TokenKind::EndOfFile`], con lexema vacío.
pub fn scan(source: &str) -> Vec<Located<Token>> {
    let mut lexer = Lexer::new(source);
    let mut tokens: Vec<_> = lexer.by_ref().collect();

    let end = Position::new(lexer.line, source.len() as u32);
    tokens.push(Located::at(Token::new(TokenKind::EndOfFile, ""), end));

    tokens
}

/// Máquina de estados para análisis léxico.
///
/// Un lexer puede encontrarse en uno de diversos estados. La
/// salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en el texto fuente.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    state: State,
    line: u32,
    start: usize,
    start_line: u32,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado de completitud; siempre emite el token incluido
    /// sin consumir la entrada actual y pasa a [`State::Start`].
    Complete(TokenKind),

    /// Se encontró `:`, puede seguir `=`.
    Colon,

    /// Se encontró `<`, puede seguir `=`.
    Less,

    /// Se encontró `>`, puede seguir `=`.
    Greater,

    /// Secuencia de dígitos.
    Number,

    /// Término que puede ser un identificador o una palabra clave.
    Word,
}

impl<'a> Lexer<'a> {
    /// Crea un lexer en estado inicial.
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            chars: source.char_indices().peekable(),
            state: State::Start,
            line: 1,
            start: 0,
            start_line: 1,
        }
    }

    /// Desplazamiento del siguiente carácter sin consumir.
    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map_or(self.source.len(), |&(offset, _)| offset)
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Option<TokenKind> {
        use State::*;

        let kind = loop {
            let next_char = self.chars.peek().map(|&(_, c)| c);

            // El inicio del token se mueve junto al cursor mientras
            // no se haya encontrado una frontera de token
            if let Start = self.state {
                self.start = self.offset();
                self.start_line = self.line;
            }

            match (&mut self.state, next_char) {
                (Start, None) => return None,

                // Espacios en blanco
                (Start, Some('\n')) => self.line += 1,
                (Start, Some(c)) if c.is_whitespace() => (),

                // Operadores que pueden extenderse con `=`
                (Start, Some(':')) => self.state = Colon,
                (Start, Some('<')) => self.state = Less,
                (Start, Some('>')) => self.state = Greater,

                // Identificadores, palabras clave y constantes
                (Start, Some(c)) if c.is_ascii_alphabetic() || c == '_' => self.state = Word,
                (Start, Some(c)) if c.is_ascii_digit() => self.state = Number,

                // Tokens triviales, incluyendo caracteres desconocidos
                (Start, Some(c)) => self.state = Complete(punctuation(c)),

                // Emisión retardada de tokens cualesquiera
                (Complete(kind), _) => break *kind,

                (Colon, Some('=')) => self.state = Complete(TokenKind::Assign),
                (Colon, _) => break TokenKind::Colon,

                (Less, Some('=')) => self.state = Complete(TokenKind::LessEqual),
                (Less, _) => break TokenKind::Less,

                (Greater, Some('=')) => self.state = Complete(TokenKind::GreaterEqual),
                (Greater, _) => break TokenKind::Greater,

                (Number, Some(c)) if c.is_ascii_digit() => (),
                (Number, _) => break TokenKind::Number,

                (Word, Some(c)) if is_word_char(c) => (),
                (Word, _) => {
                    let word = &self.source[self.start..self.offset()];
                    break match Keyword::from_str(word) {
                        Ok(keyword) => TokenKind::Keyword(keyword),
                        Err(()) => TokenKind::Identifier,
                    };
                }
            }

            // Si no hubo `break`, aquí se consume el carácter que
            // se observó con lookahead anteriormente
            self.chars.next();
        };

        self.state = State::Start;
        Some(kind)
    }
}

impl Iterator for Lexer<'_> {
    type Item = Located<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        let kind = self.lex()?;

        let lexeme = &self.source[self.start..self.offset()];
        let position = Position::new(self.start_line, self.start as u32);

        Some(Located::at(Token::new(kind, lexeme), position))
    }
}

/// Clasifica un carácter que por sí solo forma un token.
fn punctuation(c: char) -> TokenKind {
    use TokenKind::*;

    match c {
        ';' => Semicolon,
        ',' => Comma,
        '.' => Dot,
        '(' => OpenParen,
        ')' => CloseParen,
        '[' => OpenSquare,
        ']' => CloseSquare,
        '^' => Caret,
        '=' => Equal,
        '+' => Plus,
        '-' => Minus,
        '*' => Times,
        '/' => Slash,
        _ => Identifier,
    }
}

/// Determina si un carácter puede pertenecer a un término.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        scan(source).iter().map(|token| token.val().kind()).collect()
    }

    fn lexemes(source: &str) -> Vec<String> {
        scan(source)
            .iter()
            .map(|token| token.val().lexeme().to_owned())
            .collect()
    }

    #[test]
    fn var_declaration() {
        use TokenKind::*;

        assert_eq!(
            kinds("var a: integer;"),
            [
                Keyword(super::Keyword::Var),
                Identifier,
                Colon,
                Identifier,
                Semicolon,
                EndOfFile
            ]
        );

        assert_eq!(lexemes("var a: integer;"), ["var", "a", ":", "integer", ";", ""]);
    }

    #[test]
    fn always_ends_with_a_single_eof() {
        for source in ["", "   \n\n", "begin end.", "'unterminated", "@#$"] {
            let tokens = scan(source);
            let eofs = tokens
                .iter()
                .filter(|token| token.val().kind() == TokenKind::EndOfFile)
                .count();

            assert_eq!(eofs, 1);
            assert_eq!(tokens.last().unwrap().val().kind(), TokenKind::EndOfFile);
            assert_eq!(tokens.last().unwrap().val().lexeme(), "");
        }
    }

    #[test]
    fn two_character_operators() {
        use TokenKind::*;

        assert_eq!(
            kinds("a:=b<=c>=d<>e"),
            [
                Identifier,
                Assign,
                Identifier,
                LessEqual,
                Identifier,
                GreaterEqual,
                Identifier,
                Less,
                Greater,
                Identifier,
                EndOfFile
            ]
        );
    }

    #[test]
    fn ranges_and_reals_are_split() {
        use TokenKind::*;

        assert_eq!(kinds("1..10"), [Number, Dot, Dot, Number, EndOfFile]);
        assert_eq!(kinds("1.5"), [Number, Dot, Number, EndOfFile]);
    }

    #[test]
    fn keywords_are_case_sensitive() {
        use TokenKind::*;

        assert_eq!(kinds("begin"), [Keyword(super::Keyword::Begin), EndOfFile]);
        assert_eq!(kinds("Begin BEGIN"), [Identifier, Identifier, EndOfFile]);
    }

    #[test]
    fn apostrophes_and_unknown_characters() {
        let tokens = scan("'hi there' @");
        let lexemes: Vec<_> = tokens.iter().map(|t| t.val().lexeme()).collect();

        assert_eq!(lexemes, ["'", "hi", "there", "'", "@", ""]);
        assert!(tokens[0].val().is_quote());
        assert!(tokens[3].val().is_quote());
        assert_eq!(tokens[4].val().kind(), TokenKind::Identifier);
    }

    #[test]
    fn positions() {
        let tokens = scan("a :=\n  b");

        assert_eq!(tokens[0].position(), Position::new(1, 0));
        assert_eq!(tokens[1].position(), Position::new(1, 2));
        assert_eq!(tokens[2].position(), Position::new(2, 7));
        assert_eq!(tokens[3].position(), Position::new(2, 8));
    }
}
