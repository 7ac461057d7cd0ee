//! Análisis sintáctico.
//!
//! Parser descendente recursivo de una sola pasada. Se utiliza un
//! token de lookahead, con algunas excepciones documentadas que
//! requieren observar un segundo token:
//!
//! - `<` seguido inmediatamente por `>` forma el operador `<>`.
//! - Una entrada de una sección `var`, `type` o `const` se reconoce
//!   por un identificador seguido de `:`, `,` o `=`.
//! - `Number Dot Number` forma un literal real, mientras que
//!   `Number Dot Dot Number` es un rango.
//!
//! # Errores
//! Las expectativas estructurales fuertes (punto y coma faltante,
//! paréntesis o corchetes sin cerrar, encabezado de programa
//! ilegible) abortan el análisis con un [`ParseError`]. Cualquier
//! otro inicio de sentencia irreconocible se descarta token por token,
//! y los hijos que no se logran construir quedan ausentes en el AST
//! para que el validador los reporte.

use thiserror::Error;

use crate::{
    ast::*,
    lex::{Keyword, Token, TokenKind},
    source::{Located, Position},
};

/// Nombre del programa implícito cuando la entrada no tiene encabezado.
pub const IMPLICIT_PROGRAM: &str = "main";

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Expected {0}, found {1}")]
    UnexpectedToken(TokenKind, Token),

    #[error("Expected identifier, found {0}")]
    ExpectedId(Token),

    #[error("Expected an expression, found {0}")]
    ExpectedExpr(Token),

    #[error("Expected a number, found {0}")]
    ExpectedNumber(Token),

    #[error("Integer literal `{0}` is out of range")]
    NumberOutOfRange(String),
}

type Parse<T> = Result<T, Located<ParseError>>;

/// Construye un AST a partir de un flujo de tokens.
pub fn parse(tokens: &[Located<Token>]) -> Parse<Ast> {
    let mut parser = Parser::new(tokens);
    parser.program().map(Ast::new)
}

struct Parser<'a> {
    tokens: &'a [Located<Token>],
    cursor: usize,
    eof: Located<Token>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Located<Token>]) -> Self {
        let end = tokens
            .last()
            .map_or_else(Position::default, Located::position);

        Parser {
            tokens,
            cursor: 0,
            eof: Located::at(Token::new(TokenKind::EndOfFile, ""), end),
        }
    }

    fn program(&mut self) -> Parse<Option<Located<Program>>> {
        let position = self.peek().position();

        match self.peek_kind() {
            TokenKind::EndOfFile => Ok(None),

            TokenKind::Keyword(Keyword::Program) => {
                self.next();
                let name = self.id()?.into_inner();

                // Parámetros de programa, e.g. `(input, output)`, se ignoran
                if self.accept(TokenKind::OpenParen) {
                    self.id()?;
                    while self.accept(TokenKind::Comma) {
                        self.id()?;
                    }

                    self.expect(TokenKind::CloseParen)?;
                }

                self.expect(TokenKind::Semicolon)?;
                let block = self.block()?;
                self.expect(TokenKind::Dot)?;

                Ok(Some(Located::at(Program { name, block }, position)))
            }

            _ => {
                let block = self.block()?;
                self.accept(TokenKind::Dot);

                let name = IMPLICIT_PROGRAM.to_owned();
                Ok(Some(Located::at(Program { name, block }, position)))
            }
        }
    }

    fn block(&mut self) -> Parse<Block> {
        let declarations = self.declarations()?;

        let statements = if self.accept_keyword(Keyword::Begin) {
            let statements = self.statement_list(&[TokenKind::Keyword(Keyword::End)])?;
            self.keyword(Keyword::End)?;
            statements
        } else {
            let terminators = [TokenKind::Keyword(Keyword::End), TokenKind::Dot];
            let statements = self.statement_list(&terminators)?;
            self.accept_keyword(Keyword::End);
            statements
        };

        Ok(Block {
            declarations,
            statements,
        })
    }

    fn declarations(&mut self) -> Parse<Vec<Located<Declaration>>> {
        let mut declarations = Vec::new();

        loop {
            match self.peek_kind() {
                TokenKind::Keyword(Keyword::Var) => {
                    self.next();
                    while self.starts_entry(&[TokenKind::Colon, TokenKind::Comma]) {
                        let declaration = self.var_decl()?;
                        self.expect(TokenKind::Semicolon)?;
                        declarations.push(declaration.map(Declaration::Var));
                    }
                }

                TokenKind::Keyword(Keyword::Type) => {
                    self.next();
                    while self.starts_entry(&[TokenKind::Equal]) {
                        declarations.push(self.type_decl()?);
                    }
                }

                TokenKind::Keyword(Keyword::Const) => {
                    self.next();
                    while self.starts_entry(&[TokenKind::Equal]) {
                        declarations.push(self.const_decl()?);
                    }
                }

                TokenKind::Keyword(Keyword::Procedure) => declarations.push(self.procedure()?),
                TokenKind::Keyword(Keyword::Function) => declarations.push(self.function()?),

                _ => break Ok(declarations),
            }
        }
    }

    /// Determina si sigue una entrada de sección de declaraciones.
    fn starts_entry(&self, follow: &[TokenKind]) -> bool {
        self.peek_kind() == TokenKind::Identifier
            && !self.peek().val().is_quote()
            && follow.contains(&self.peek_nth(1).val().kind())
    }

    fn var_decl(&mut self) -> Parse<Located<VarDecl>> {
        let position = self.peek().position();
        let names = self.id_list()?;

        self.expect(TokenKind::Colon)?;
        let typ = self.type_spec()?;

        Ok(Located::at(VarDecl { names, typ }, position))
    }

    fn type_decl(&mut self) -> Parse<Located<Declaration>> {
        let (position, name) = self.id()?.split();

        self.expect(TokenKind::Equal)?;
        let typ = self.type_spec()?;
        self.expect(TokenKind::Semicolon)?;

        Ok(Located::at(
            Declaration::Type(TypeDecl { name, typ }),
            position,
        ))
    }

    fn const_decl(&mut self) -> Parse<Located<Declaration>> {
        let (position, name) = self.id()?.split();

        self.expect(TokenKind::Equal)?;
        let value = self.expr()?;
        self.expect(TokenKind::Semicolon)?;

        Ok(Located::at(
            Declaration::Const(ConstDecl { name, value }),
            position,
        ))
    }

    fn procedure(&mut self) -> Parse<Located<Declaration>> {
        let position = self.next().position();
        let name = self.routine_name();
        let params = self.parameters()?;

        self.expect(TokenKind::Semicolon)?;
        let body = self.block()?;
        self.expect(TokenKind::Semicolon)?;

        let procedure = ProcedureDecl { name, params, body };
        Ok(Located::at(Declaration::Procedure(procedure), position))
    }

    fn function(&mut self) -> Parse<Located<Declaration>> {
        let position = self.next().position();
        let name = self.routine_name();
        let params = self.parameters()?;

        let return_type = if self.accept(TokenKind::Colon) {
            self.type_spec()?
        } else {
            None
        };

        self.expect(TokenKind::Semicolon)?;
        let body = self.block()?;
        self.expect(TokenKind::Semicolon)?;

        let function = FunctionDecl {
            name,
            params,
            return_type,
            body,
        };

        Ok(Located::at(Declaration::Function(function), position))
    }

    /// Un nombre de rutina ausente queda vacío y lo reporta el validador.
    fn routine_name(&mut self) -> String {
        if self.peek_kind() == TokenKind::Identifier {
            self.next().into_inner().lexeme().to_owned()
        } else {
            String::new()
        }
    }

    fn parameters(&mut self) -> Parse<Vec<Located<ParamDecl>>> {
        let mut params = Vec::new();
        if !self.accept(TokenKind::OpenParen) {
            return Ok(params);
        }

        if self.accept(TokenKind::CloseParen) {
            return Ok(params);
        }

        loop {
            let position = self.peek().position();
            let by_reference = self.accept_keyword(Keyword::Var);
            let names = self.id_list()?;

            self.expect(TokenKind::Colon)?;
            let typ = self.type_spec()?;

            let param = ParamDecl {
                names,
                typ,
                by_reference,
            };

            params.push(Located::at(param, position));
            if !self.accept(TokenKind::Semicolon) {
                break;
            }
        }

        self.expect(TokenKind::CloseParen)?;
        Ok(params)
    }

    fn type_spec(&mut self) -> Parse<Option<Located<TypeSpec>>> {
        let position = self.peek().position();

        let typ = match self.peek_kind() {
            TokenKind::Caret => {
                self.next();
                let referenced = self.type_spec()?;
                TypeSpec::Pointer(referenced.map(Box::new))
            }

            TokenKind::Keyword(Keyword::Array) => {
                self.next();
                self.expect(TokenKind::OpenSquare)?;

                let mut ranges = vec![self.range()?];
                while self.accept(TokenKind::Comma) {
                    ranges.push(self.range()?);
                }

                self.expect(TokenKind::CloseSquare)?;
                self.keyword(Keyword::Of)?;

                let element = self.type_spec()?.map(Box::new);
                TypeSpec::Array { ranges, element }
            }

            TokenKind::Keyword(Keyword::Record) => {
                self.next();

                let mut fields = Vec::new();
                while self.peek_kind() == TokenKind::Identifier {
                    fields.push(self.var_decl()?);
                    if !self.accept(TokenKind::Semicolon) {
                        break;
                    }
                }

                self.keyword(Keyword::End)?;
                TypeSpec::Record { fields }
            }

            TokenKind::Identifier if !self.peek().val().is_quote() => {
                let name = self.next().into_inner().lexeme().to_owned();
                let basic = BasicType::classify(&name);

                TypeSpec::Simple { basic, name }
            }

            _ => return Ok(None),
        };

        Ok(Some(Located::at(typ, position)))
    }

    fn range(&mut self) -> Parse<Range> {
        let start = self.bound()?;
        self.expect(TokenKind::Dot)?;
        self.expect(TokenKind::Dot)?;
        let end = self.bound()?;

        Ok(Range { start, end })
    }

    fn bound(&mut self) -> Parse<i64> {
        let negative = self.accept(TokenKind::Minus);

        let (position, token) = self.next().split();
        if token.kind() != TokenKind::Number {
            return Err(Located::at(ParseError::ExpectedNumber(token), position));
        }

        let lexeme = token.lexeme();
        let magnitude: i64 = lexeme.parse().map_err(|_| {
            Located::at(ParseError::NumberOutOfRange(lexeme.to_owned()), position)
        })?;

        Ok(if negative { -magnitude } else { magnitude })
    }

    fn statement_list(&mut self, terminators: &[TokenKind]) -> Parse<Vec<Located<Statement>>> {
        let mut statements = Vec::new();

        loop {
            let kind = self.peek_kind();
            if kind == TokenKind::EndOfFile || terminators.contains(&kind) {
                break Ok(statements);
            } else if self.accept(TokenKind::Semicolon) {
                continue;
            }

            let before = self.cursor;
            match self.statement()? {
                Some(statement) => statements.push(statement),

                // Se garantiza progreso aun si no se reconoció nada
                None if self.cursor == before => {
                    self.next();
                }

                None => (),
            }
        }
    }

    fn statement(&mut self) -> Parse<Option<Located<Statement>>> {
        let (position, token) = self.peek().clone().split();

        let statement = match token.kind() {
            // Sentencia vacía, no se consume el token que le sigue
            TokenKind::Semicolon
            | TokenKind::Dot
            | TokenKind::EndOfFile
            | TokenKind::Keyword(Keyword::End)
            | TokenKind::Keyword(Keyword::Else)
            | TokenKind::Keyword(Keyword::Until) => return Ok(None),

            TokenKind::Keyword(Keyword::Begin) => {
                self.next();
                let statements = self.statement_list(&[TokenKind::Keyword(Keyword::End)])?;
                self.keyword(Keyword::End)?;

                Statement::Compound(statements)
            }

            TokenKind::Keyword(Keyword::If) => {
                self.next();
                let condition = self.expr()?;
                self.accept_keyword(Keyword::Then);
                let then_branch = self.boxed_statement()?;

                let else_branch = if self.accept_keyword(Keyword::Else) {
                    self.boxed_statement()?
                } else {
                    None
                };

                Statement::If {
                    condition,
                    then_branch,
                    else_branch,
                }
            }

            TokenKind::Keyword(Keyword::While) => {
                self.next();
                let condition = self.expr()?;
                self.accept_keyword(Keyword::Do);
                let body = self.boxed_statement()?;

                Statement::While { condition, body }
            }

            TokenKind::Keyword(Keyword::Repeat) => {
                self.next();
                let body = self.statement_list(&[TokenKind::Keyword(Keyword::Until)])?;
                self.accept_keyword(Keyword::Until);
                let condition = self.expr()?;

                Statement::Repeat { body, condition }
            }

            TokenKind::Keyword(Keyword::For) => {
                self.next();
                let init = self.for_init()?;

                let downto = if self.accept_keyword(Keyword::Downto) {
                    true
                } else {
                    self.accept_keyword(Keyword::To);
                    false
                };

                let limit = self.expr()?;
                self.accept_keyword(Keyword::Do);
                let body = self.boxed_statement()?;

                Statement::For {
                    init,
                    downto,
                    limit,
                    body,
                }
            }

            TokenKind::Keyword(Keyword::Case) => self.case_statement()?,

            TokenKind::Keyword(Keyword::With) => {
                self.next();
                let record = self.expr()?;
                self.accept_keyword(Keyword::Do);
                let body = self.boxed_statement()?;

                Statement::With { record, body }
            }

            TokenKind::Keyword(Keyword::New) | TokenKind::Keyword(Keyword::Dispose) => {
                self.next();
                let name = token.lexeme().to_owned();
                let args = if self.peek_kind() == TokenKind::OpenParen {
                    self.arguments()?
                } else {
                    Vec::new()
                };

                Statement::Call(ProcCall { name, args })
            }

            TokenKind::Identifier if !token.is_quote() => {
                if self.peek_nth(1).val().kind() == TokenKind::OpenParen {
                    self.next();
                    let name = token.lexeme().to_owned();
                    let args = self.arguments()?;

                    Statement::Call(ProcCall { name, args })
                } else {
                    let target = self.variable()?;
                    if self.accept(TokenKind::Assign) {
                        let value = self.expr()?;
                        Statement::Assign(Assign {
                            target: Some(target),
                            value,
                        })
                    } else {
                        match target.into_inner() {
                            Expr::Variable(VariableExpr { name, selectors })
                                if selectors.is_empty() =>
                            {
                                let args = Vec::new();
                                Statement::Call(ProcCall { name, args })
                            }

                            // Acceso con selectores sin asignación, se descarta
                            _ => return Ok(None),
                        }
                    }
                }
            }

            _ => {
                self.next();
                return Ok(None);
            }
        };

        Ok(Some(Located::at(statement, position)))
    }

    fn boxed_statement(&mut self) -> Parse<Option<Box<Located<Statement>>>> {
        Ok(self.statement()?.map(Box::new))
    }

    fn for_init(&mut self) -> Parse<Option<Located<Assign>>> {
        if self.peek_kind() != TokenKind::Identifier || self.peek().val().is_quote() {
            return Ok(None);
        }

        let target = self.variable()?;
        let position = target.position();

        let value = if self.accept(TokenKind::Assign) {
            self.expr()?
        } else {
            None
        };

        let assign = Assign {
            target: Some(target),
            value,
        };

        Ok(Some(Located::at(assign, position)))
    }

    fn case_statement(&mut self) -> Parse<Statement> {
        self.next();
        let expr = self.expr()?;
        self.accept_keyword(Keyword::Of);

        let mut cases = Vec::new();
        let mut else_branch = None;

        loop {
            let (position, token) = self.peek().clone().split();
            match token.kind() {
                TokenKind::Keyword(Keyword::End) | TokenKind::EndOfFile => break,

                TokenKind::Semicolon => {
                    self.next();
                }

                TokenKind::Keyword(Keyword::Else) => {
                    self.next();
                    let statements = self.statement_list(&[TokenKind::Keyword(Keyword::End)])?;
                    let statement = Located::at(Statement::Compound(statements), position);
                    else_branch = Some(Box::new(statement));
                }

                _ => {
                    let mut constants = Vec::new();
                    while let Some(constant) = self.expr()? {
                        constants.push(constant);
                        if !self.accept(TokenKind::Comma) {
                            break;
                        }
                    }

                    if constants.is_empty() && self.peek_kind() != TokenKind::Colon {
                        self.next();
                        continue;
                    }

                    self.expect(TokenKind::Colon)?;
                    let stmt = self.boxed_statement()?;

                    cases.push(Located::at(CaseLabel { constants, stmt }, position));
                }
            }
        }

        self.keyword(Keyword::End)?;
        Ok(Statement::Case {
            expr,
            cases,
            else_branch,
        })
    }

    fn expr(&mut self) -> Parse<Option<Located<Expr>>> {
        let left = match self.primary()? {
            Some(left) => left,
            None => return Ok(None),
        };

        let op = match self.binary_op() {
            Some(op) => op,
            None => return Ok(Some(left)),
        };

        // Asociatividad por la derecha, sin tabla de precedencia
        let right = self.expr()?.map(Box::new);
        let position = left.position();

        let binary = Expr::Binary {
            left: Box::new(left),
            op,
            right,
        };

        Ok(Some(Located::at(binary, position)))
    }

    fn binary_op(&mut self) -> Option<BinOp> {
        let op = match self.peek_kind() {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Times => BinOp::Mul,
            TokenKind::Slash => BinOp::Divide,
            TokenKind::Keyword(Keyword::Div) => BinOp::Div,
            TokenKind::Keyword(Keyword::Mod) => BinOp::Mod,
            TokenKind::Keyword(Keyword::And) => BinOp::And,
            TokenKind::Keyword(Keyword::Or) => BinOp::Or,
            TokenKind::Equal => BinOp::Equal,
            TokenKind::LessEqual => BinOp::LessOrEqual,
            TokenKind::Greater => BinOp::Greater,
            TokenKind::GreaterEqual => BinOp::GreaterOrEqual,

            TokenKind::Less => {
                let less = self.next();
                let greater = self.peek();

                let adjacent = greater.val().kind() == TokenKind::Greater
                    && greater.position().column() == less.position().column() + 1;

                if adjacent {
                    self.next();
                    return Some(BinOp::NotEqual);
                }

                return Some(BinOp::Less);
            }

            _ => return None,
        };

        self.next();
        Some(op)
    }

    fn primary(&mut self) -> Parse<Option<Located<Expr>>> {
        let (position, token) = self.peek().clone().split();

        let expr = match token.kind() {
            TokenKind::Number => {
                self.next();

                let mut value = token.lexeme().to_owned();
                let fraction = self.peek_nth(1).val();
                if self.peek_kind() == TokenKind::Dot && fraction.kind() == TokenKind::Number {
                    value.push('.');
                    value.push_str(fraction.lexeme());

                    self.next();
                    self.next();
                }

                Expr::Literal(Literal::new(value))
            }

            TokenKind::Identifier if token.is_quote() => Expr::Literal(self.string()),

            TokenKind::OpenParen => {
                self.next();
                let inner = self.expr()?;
                self.expect(TokenKind::CloseParen)?;

                return Ok(inner);
            }

            TokenKind::Minus | TokenKind::Keyword(Keyword::Not) => {
                self.next();

                let op = if token.kind() == TokenKind::Minus {
                    UnOp::Negate
                } else {
                    UnOp::Not
                };

                let operand = self.primary()?.map(Box::new);
                Expr::Unary { op, operand }
            }

            TokenKind::Identifier if self.peek_nth(1).val().kind() == TokenKind::OpenParen => {
                self.next();
                let name = token.lexeme().to_owned();
                let args = self.arguments()?;

                Expr::Call(ProcCall { name, args })
            }

            TokenKind::Identifier => return Ok(Some(self.variable()?)),

            _ => return Ok(None),
        };

        Ok(Some(Located::at(expr, position)))
    }

    /// Reconstruye un literal de texto a partir de los tokens entre apóstrofos.
    ///
    /// El espacio entre tokens de una misma línea se reproduce a partir de
    /// sus columnas. Dos apóstrofos adyacentes representan un apóstrofo
    /// literal. El fin de la entrada termina el literal.
    fn string(&mut self) -> Literal {
        let open = self.next();

        let mut value = String::from("'");
        let mut line = open.position().line();
        let mut end = open.position().column() + 1;

        loop {
            let (position, token) = self.peek().clone().split();
            if token.kind() == TokenKind::EndOfFile {
                break;
            }

            if position.line() == line {
                let gap = position.column().saturating_sub(end) as usize;
                value.extend(std::iter::repeat(' ').take(gap));
            } else {
                value.push(' ');
            }

            self.next();
            line = position.line();
            end = position.column() + token.lexeme().len() as u32;

            if token.is_quote() {
                let escaped = self.peek();
                let adjacent = escaped.val().is_quote() && escaped.position().column() == end;
                if !adjacent {
                    value.push('\'');
                    break;
                }

                self.next();
                end += 1;
            }

            value.push_str(token.lexeme());
        }

        Literal::new(value)
    }

    fn variable(&mut self) -> Parse<Located<Expr>> {
        let (position, name) = self.id()?.split();

        let mut selectors = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Caret => {
                    self.next();
                    selectors.push(Selector::Pointer);
                }

                TokenKind::OpenSquare => {
                    self.next();
                    loop {
                        let index = self.required_expr()?;
                        selectors.push(Selector::Index(index));

                        if !self.accept(TokenKind::Comma) {
                            break;
                        }
                    }

                    self.expect(TokenKind::CloseSquare)?;
                }

                TokenKind::Dot if self.peek_nth(1).val().kind() == TokenKind::Identifier => {
                    self.next();
                    let field = self.next().into_inner().lexeme().to_owned();
                    selectors.push(Selector::Field(field));
                }

                _ => break,
            }
        }

        let variable = VariableExpr { name, selectors };
        Ok(Located::at(Expr::Variable(variable), position))
    }

    fn arguments(&mut self) -> Parse<Vec<Located<Expr>>> {
        self.expect(TokenKind::OpenParen)?;

        let mut args = Vec::new();
        if self.accept(TokenKind::CloseParen) {
            return Ok(args);
        }

        loop {
            args.push(self.required_expr()?);
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::CloseParen)?;
        Ok(args)
    }

    fn required_expr(&mut self) -> Parse<Located<Expr>> {
        match self.expr()? {
            Some(expr) => Ok(expr),
            None => {
                let (position, token) = self.peek().clone().split();
                Err(Located::at(ParseError::ExpectedExpr(token), position))
            }
        }
    }

    fn id_list(&mut self) -> Parse<Vec<String>> {
        let mut names = vec![self.id()?.into_inner()];
        while self.accept(TokenKind::Comma) {
            names.push(self.id()?.into_inner());
        }

        Ok(names)
    }

    fn id(&mut self) -> Parse<Located<String>> {
        let (position, token) = self.peek().clone().split();
        if token.kind() != TokenKind::Identifier || token.is_quote() {
            return Err(Located::at(ParseError::ExpectedId(token), position));
        }

        self.next();
        Ok(Located::at(token.lexeme().to_owned(), position))
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(TokenKind::Keyword(keyword)).map(drop)
    }

    fn accept_keyword(&mut self, keyword: Keyword) -> bool {
        self.accept(TokenKind::Keyword(keyword))
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        let found = self.peek_kind() == kind;
        if found {
            self.next();
        }

        found
    }

    fn expect(&mut self, kind: TokenKind) -> Parse<Located<Token>> {
        let (position, found) = self.peek().clone().split();
        if found.kind() != kind {
            return Err(Located::at(ParseError::UnexpectedToken(kind, found), position));
        }

        Ok(self.next())
    }

    /// Consume un token. El fin de la entrada nunca se consume.
    fn next(&mut self) -> Located<Token> {
        let token = self.peek().clone();
        if token.val().kind() != TokenKind::EndOfFile {
            self.cursor += 1;
        }

        token
    }

    fn peek(&self) -> &Located<Token> {
        self.peek_nth(0)
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().val().kind()
    }

    fn peek_nth(&self, offset: usize) -> &Located<Token> {
        self.tokens.get(self.cursor + offset).unwrap_or(&self.eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::scan;

    fn parse_source(source: &str) -> Ast {
        parse(&scan(source)).unwrap()
    }

    fn program(ast: &Ast) -> &Program {
        ast.program().unwrap().val()
    }

    fn only_statement(ast: &Ast) -> &Statement {
        let statements = &program(ast).block.statements;
        assert_eq!(statements.len(), 1, "{:#?}", statements);
        statements[0].val()
    }

    fn assignment(ast: &Ast) -> (&VariableExpr, &Expr) {
        match program(ast).block.statements[0].val() {
            Statement::Assign(Assign {
                target: Some(target),
                value: Some(value),
            }) => (target.val().as_variable().unwrap(), value.val()),

            other => panic!("not an assignment: {:#?}", other),
        }
    }

    #[test]
    fn headed_program() {
        let ast = parse_source("program hello(input, output);\nbegin\n  x := 1\nend.");
        assert!(ast.is_valid());

        let program = program(&ast);
        assert_eq!(program.name, "hello");
        assert_eq!(program.block.statements.len(), 1);
    }

    #[test]
    fn empty_input_is_invalid() {
        let ast = parse_source("   ");
        assert!(!ast.is_valid());
    }

    #[test]
    fn single_var_declaration() {
        let ast = parse_source("var a: integer;");
        let program = program(&ast);

        assert_eq!(program.name, IMPLICIT_PROGRAM);
        assert_eq!(program.block.declarations.len(), 1);

        match program.block.declarations[0].val() {
            Declaration::Var(VarDecl { names, typ: Some(typ) }) => {
                assert_eq!(names, &["a"]);
                match typ.val() {
                    TypeSpec::Simple { basic, name } => {
                        assert_eq!(*basic, BasicType::Integer);
                        assert_eq!(name, "integer");
                    }

                    other => panic!("{:#?}", other),
                }
            }

            other => panic!("{:#?}", other),
        }
    }

    #[test]
    fn indexed_assignment() {
        let ast = parse_source("a[1]:=0;");
        let (target, value) = assignment(&ast);

        assert_eq!(target.name, "a");
        match target.selectors.as_slice() {
            [Selector::Index(index)] => {
                assert_eq!(index.val().as_literal().unwrap().value, "1");
            }

            other => panic!("{:#?}", other),
        }

        assert_eq!(value.as_literal().unwrap().value, "0");
    }

    #[test]
    fn selector_chain_order() {
        let ast = parse_source("a[i].f^ := 1");
        let (target, _) = assignment(&ast);

        assert!(matches!(
            target.selectors.as_slice(),
            [Selector::Index(_), Selector::Field(field), Selector::Pointer] if field == "f"
        ));
    }

    #[test]
    fn multi_index_sugar() {
        let ast = parse_source("m[1, 2] := 0");
        let (target, _) = assignment(&ast);

        assert!(matches!(
            target.selectors.as_slice(),
            [Selector::Index(_), Selector::Index(_)]
        ));
    }

    #[test]
    fn if_with_else() {
        let ast = parse_source("if a>0 then b:=1 else b:=2;");
        match only_statement(&ast) {
            Statement::If {
                condition: Some(condition),
                then_branch: Some(_),
                else_branch: Some(_),
            } => {
                assert!(matches!(
                    condition.val(),
                    Expr::Binary {
                        op: BinOp::Greater,
                        right: Some(_),
                        ..
                    }
                ));
            }

            other => panic!("{:#?}", other),
        }
    }

    #[test]
    fn not_equal_requires_adjacency() {
        let ast = parse_source("x := a <> b");
        let (_, value) = assignment(&ast);
        assert!(matches!(value, Expr::Binary { op: BinOp::NotEqual, right: Some(_), .. }));

        let ast = parse_source("x := a < > b");
        let (_, value) = assignment(&ast);
        assert!(matches!(value, Expr::Binary { op: BinOp::Less, right: None, .. }));
    }

    #[test]
    fn binary_operators_associate_right() {
        let ast = parse_source("x := a - b - c");
        let (_, value) = assignment(&ast);

        match value {
            Expr::Binary {
                left,
                op: BinOp::Sub,
                right: Some(right),
            } => {
                assert!(matches!(left.val(), Expr::Variable(_)));
                assert!(matches!(right.val(), Expr::Binary { op: BinOp::Sub, .. }));
            }

            other => panic!("{:#?}", other),
        }
    }

    #[test]
    fn real_literals() {
        let ast = parse_source("x := 1.5");
        let (_, value) = assignment(&ast);
        assert_eq!(value.as_literal().unwrap().value, "1.5");
    }

    #[test]
    fn string_reconstruction() {
        let ast = parse_source("s := 'hello,  world!'");
        let (_, value) = assignment(&ast);
        assert_eq!(value.as_literal().unwrap().value, "'hello,  world!'");

        let ast = parse_source("s := 'it''s'");
        let (_, value) = assignment(&ast);
        assert_eq!(value.as_literal().unwrap().content(), "it's");
    }

    #[test]
    fn unterminated_string_stops_at_eof() {
        let ast = parse_source("s := 'never closed");
        let (_, value) = assignment(&ast);
        assert_eq!(value.as_literal().unwrap().value, "'never closed");
    }

    #[test]
    fn array_and_record_types() {
        let ast = parse_source(
            "type M = array[1..3, -1..1] of ^integer;\n\
             type P = record x, y: real; next: ^P end;",
        );

        let declarations = &program(&ast).block.declarations;
        assert_eq!(declarations.len(), 2);

        match declarations[0].val() {
            Declaration::Type(TypeDecl {
                name,
                typ: Some(typ),
            }) => {
                assert_eq!(name, "M");
                match typ.val() {
                    TypeSpec::Array {
                        ranges,
                        element: Some(element),
                    } => {
                        assert_eq!(ranges, &[Range { start: 1, end: 3 }, Range { start: -1, end: 1 }]);
                        assert!(matches!(element.val(), TypeSpec::Pointer(Some(_))));
                    }

                    other => panic!("{:#?}", other),
                }
            }

            other => panic!("{:#?}", other),
        }

        match declarations[1].val() {
            Declaration::Type(TypeDecl { typ: Some(typ), .. }) => match typ.val() {
                TypeSpec::Record { fields } => {
                    assert_eq!(fields.len(), 2);
                    assert_eq!(fields[0].val().names, ["x", "y"]);
                }

                other => panic!("{:#?}", other),
            },

            other => panic!("{:#?}", other),
        }
    }

    #[test]
    fn routines() {
        let ast = parse_source(
            "program p;\n\
             procedure show(var a, b: integer; c: real);\n\
             begin writeln(a) end;\n\
             function twice(n: integer): integer;\n\
             begin twice := n * 2 end;\n\
             begin show(1, 2, 3.0) end.",
        );

        let block = &program(&ast).block;
        assert_eq!(block.declarations.len(), 2);

        match block.declarations[0].val() {
            Declaration::Procedure(procedure) => {
                assert_eq!(procedure.name, "show");
                assert_eq!(procedure.params.len(), 2);
                assert!(procedure.params[0].val().by_reference);
                assert_eq!(procedure.params[0].val().names, ["a", "b"]);
            }

            other => panic!("{:#?}", other),
        }

        match block.declarations[1].val() {
            Declaration::Function(function) => {
                assert_eq!(function.name, "twice");
                assert!(function.return_type.is_some());
                assert_eq!(function.body.statements.len(), 1);
            }

            other => panic!("{:#?}", other),
        }
    }

    #[test]
    fn loops_and_case() {
        let ast = parse_source(
            "begin\n\
               for i := 10 downto 1 do s := s + i;\n\
               repeat i := i - 1 until i = 0;\n\
               while i < 3 do i := i + 1;\n\
               case i of 1, 2: x := 0; 3: x := 1 else x := 2 end;\n\
               with r do f := 1;\n\
               new(p); dispose(p)\n\
             end",
        );

        let statements = &program(&ast).block.statements;
        assert_eq!(statements.len(), 7);

        assert!(matches!(
            statements[0].val(),
            Statement::For { init: Some(_), downto: true, limit: Some(_), body: Some(_) }
        ));

        assert!(matches!(statements[1].val(), Statement::Repeat { condition: Some(_), .. }));
        assert!(matches!(statements[2].val(), Statement::While { body: Some(_), .. }));

        match statements[3].val() {
            Statement::Case {
                cases,
                else_branch: Some(_),
                ..
            } => {
                assert_eq!(cases.len(), 2);
                assert_eq!(cases[0].val().constants.len(), 2);
            }

            other => panic!("{:#?}", other),
        }

        assert!(matches!(statements[4].val(), Statement::With { record: Some(_), body: Some(_) }));
        assert!(matches!(
            statements[5].val(),
            Statement::Call(ProcCall { name, args }) if name == "new" && args.len() == 1
        ));
    }

    #[test]
    fn unknown_statement_starts_are_skipped() {
        let ast = parse_source("begin then 42 x := 1 end");
        let statements = &program(&ast).block.statements;

        assert_eq!(statements.len(), 1);
        assert!(matches!(statements[0].val(), Statement::Assign(_)));
    }

    #[test]
    fn positions_come_from_leading_tokens() {
        let ast = parse_source("begin\n  x := 1\nend");
        let statement = &program(&ast).block.statements[0];

        assert_eq!(statement.position(), Position::new(2, 8));
    }

    #[test]
    fn hard_errors() {
        let missing_semicolon = parse(&scan("var a: integer a := 1"));
        assert!(matches!(
            missing_semicolon.unwrap_err().into_inner(),
            ParseError::UnexpectedToken(TokenKind::Semicolon, _)
        ));

        let unclosed = parse(&scan("x := (1 + 2"));
        assert!(matches!(
            unclosed.unwrap_err().into_inner(),
            ParseError::UnexpectedToken(TokenKind::CloseParen, _)
        ));

        let header = parse(&scan("program ; begin end."));
        assert!(matches!(header.unwrap_err().into_inner(), ParseError::ExpectedId(_)));
    }
}
