//! Árbol sintáctico abstracto.
//!
//! El AST es un modelo pasivo: lo construye [`crate::parse`] una sola
//! vez, y tanto [`crate::semantic`] como [`crate::codegen`] lo recorren
//! sin modificarlo. Cada nodo es dueño exclusivo de sus hijos, y cada
//! uno lleva la posición de su token inicial por medio de [`Located`].
//!
//! Los hijos que el parser puede no lograr construir durante su
//! recuperación de errores se modelan como `Option`. El validador
//! es quien reporta su ausencia.

use crate::source::Located;
use std::fmt::{self, Display};

/// Resultado del análisis sintáctico.
///
/// Un AST es válido si y solo si contiene un programa.
#[derive(Debug)]
pub struct Ast {
    program: Option<Located<Program>>,
}

impl Ast {
    pub fn new(program: Option<Located<Program>>) -> Self {
        Ast { program }
    }

    pub fn program(&self) -> Option<&Located<Program>> {
        self.program.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.program.is_some()
    }
}

/// Raíz del árbol.
#[derive(Debug)]
pub struct Program {
    pub name: String,
    pub block: Block,
}

/// Declaraciones seguidas por sentencias.
#[derive(Debug, Default)]
pub struct Block {
    pub declarations: Vec<Located<Declaration>>,
    pub statements: Vec<Located<Statement>>,
}

#[derive(Debug)]
pub enum Declaration {
    Var(VarDecl),
    Const(ConstDecl),
    Type(TypeDecl),
    Procedure(ProcedureDecl),
    Function(FunctionDecl),
}

/// `a, b: T`
#[derive(Debug)]
pub struct VarDecl {
    pub names: Vec<String>,
    pub typ: Option<Located<TypeSpec>>,
}

/// Grupo de parámetros formales, `[var] a, b: T`.
#[derive(Debug)]
pub struct ParamDecl {
    pub names: Vec<String>,
    pub typ: Option<Located<TypeSpec>>,
    pub by_reference: bool,
}

#[derive(Debug)]
pub struct ConstDecl {
    pub name: String,
    pub value: Option<Located<Expr>>,
}

#[derive(Debug)]
pub struct TypeDecl {
    pub name: String,
    pub typ: Option<Located<TypeSpec>>,
}

#[derive(Debug)]
pub struct ProcedureDecl {
    pub name: String,
    pub params: Vec<Located<ParamDecl>>,
    pub body: Block,
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Located<ParamDecl>>,
    pub return_type: Option<Located<TypeSpec>>,
    pub body: Block,
}

#[derive(Debug)]
pub enum Statement {
    Compound(Vec<Located<Statement>>),

    Assign(Assign),

    Call(ProcCall),

    If {
        condition: Option<Located<Expr>>,
        then_branch: Option<Box<Located<Statement>>>,
        else_branch: Option<Box<Located<Statement>>>,
    },

    While {
        condition: Option<Located<Expr>>,
        body: Option<Box<Located<Statement>>>,
    },

    For {
        init: Option<Located<Assign>>,
        downto: bool,
        limit: Option<Located<Expr>>,
        body: Option<Box<Located<Statement>>>,
    },

    Repeat {
        body: Vec<Located<Statement>>,
        condition: Option<Located<Expr>>,
    },

    Case {
        expr: Option<Located<Expr>>,
        cases: Vec<Located<CaseLabel>>,
        else_branch: Option<Box<Located<Statement>>>,
    },

    With {
        record: Option<Located<Expr>>,
        body: Option<Box<Located<Statement>>>,
    },
}

/// `target := value`
///
/// El destino debe ser un [`Expr::Variable`].
#[derive(Debug)]
pub struct Assign {
    pub target: Option<Located<Expr>>,
    pub value: Option<Located<Expr>>,
}

/// Invocación de procedimiento como sentencia.
#[derive(Debug)]
pub struct ProcCall {
    pub name: String,
    pub args: Vec<Located<Expr>>,
}

/// `c1, c2: stmt` dentro de un `case`.
#[derive(Debug)]
pub struct CaseLabel {
    pub constants: Vec<Located<Expr>>,
    pub stmt: Option<Box<Located<Statement>>>,
}

#[derive(Debug)]
pub enum Expr {
    Binary {
        left: Box<Located<Expr>>,
        op: BinOp,
        right: Option<Box<Located<Expr>>>,
    },

    Unary {
        op: UnOp,
        operand: Option<Box<Located<Expr>>>,
    },

    Literal(Literal),

    Variable(VariableExpr),

    /// Llamada a función dentro de una expresión, `f(a, b)`.
    Call(ProcCall),
}

impl Expr {
    /// Obtiene el acceso a variable, si esta expresión es un l-value.
    pub fn as_variable(&self) -> Option<&VariableExpr> {
        match self {
            Expr::Variable(variable) => Some(variable),
            _ => None,
        }
    }

    /// Obtiene el literal, si esta expresión es uno.
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Expr::Literal(literal) => Some(literal),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Divide,
    Div,
    Mod,
    And,
    Or,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Display for BinOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinOp::*;

        let symbol = match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Divide => "/",
            Div => "div",
            Mod => "mod",
            And => "and",
            Or => "or",
            Equal => "=",
            NotEqual => "<>",
            Less => "<",
            LessOrEqual => "<=",
            Greater => ">",
            GreaterOrEqual => ">=",
        };

        fmt.write_str(symbol)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Negate,
    Not,
}

/// Texto literal de un número o de una cadena.
///
/// Las cadenas conservan sus apóstrofos delimitadores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    pub value: String,
}

/// Clasificación de un literal a partir de su texto.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LiteralKind {
    Integer,
    Real,
    String,
}

impl Literal {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Literal {
            value: value.into(),
        }
    }

    pub fn kind(&self) -> LiteralKind {
        if self.value.starts_with('\'') {
            LiteralKind::String
        } else if self.value.contains('.') {
            LiteralKind::Real
        } else {
            LiteralKind::Integer
        }
    }

    /// Contenido de una cadena, sin delimitadores.
    pub fn content(&self) -> &str {
        let value = self.value.strip_prefix('\'').unwrap_or(&self.value);
        value.strip_suffix('\'').unwrap_or(value)
    }
}

/// Identificador base seguido de una cadena de selectores.
#[derive(Debug)]
pub struct VariableExpr {
    pub name: String,
    pub selectors: Vec<Selector>,
}

/// Un paso en un acceso encadenado, aplicado de izquierda a derecha.
#[derive(Debug)]
pub enum Selector {
    /// `[i]`
    Index(Located<Expr>),

    /// `.campo`
    Field(String),

    /// `^`
    Pointer,
}

#[derive(Debug)]
pub enum TypeSpec {
    Simple {
        basic: BasicType,
        name: String,
    },

    Array {
        ranges: Vec<Range>,
        element: Option<Box<Located<TypeSpec>>>,
    },

    Record {
        fields: Vec<Located<VarDecl>>,
    },

    Pointer(Option<Box<Located<TypeSpec>>>),
}

/// Tipos primitivos.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BasicType {
    Integer,
    LongInt,
    UnsignedInt,
    Real,
    String,
}

impl BasicType {
    /// Clasifica un nombre de tipo. Los nombres desconocidos se
    /// consideran `Integer`.
    pub fn classify(name: &str) -> Self {
        const NAMES: &[(&str, BasicType)] = &[
            ("integer", BasicType::Integer),
            ("longint", BasicType::LongInt),
            ("unsignedint", BasicType::UnsignedInt),
            ("real", BasicType::Real),
            ("string", BasicType::String),
        ];

        NAMES
            .iter()
            .find(|&&(known, _)| unicase::eq_ascii(known, name))
            .map_or(BasicType::Integer, |&(_, basic)| basic)
    }
}

/// `start..end`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub end: i64,
}

impl Range {
    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

impl Display for Range {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_type_names() {
        assert_eq!(BasicType::classify("integer"), BasicType::Integer);
        assert_eq!(BasicType::classify("LongInt"), BasicType::LongInt);
        assert_eq!(BasicType::classify("real"), BasicType::Real);
        assert_eq!(BasicType::classify("String"), BasicType::String);
        assert_eq!(BasicType::classify("unsignedint"), BasicType::UnsignedInt);
        assert_eq!(BasicType::classify("TPoint"), BasicType::Integer);
    }

    #[test]
    fn literal_kinds() {
        assert_eq!(Literal::new("42").kind(), LiteralKind::Integer);
        assert_eq!(Literal::new("1.5").kind(), LiteralKind::Real);

        let string = Literal::new("'a.b'");
        assert_eq!(string.kind(), LiteralKind::String);
        assert_eq!(string.content(), "a.b");
    }

    #[test]
    fn ranges() {
        assert!(Range { start: 1, end: 10 }.is_valid());
        assert!(Range { start: 3, end: 3 }.is_valid());
        assert!(!Range { start: 2, end: 1 }.is_valid());
    }
}
