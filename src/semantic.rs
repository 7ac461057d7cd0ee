//! Validación semántica.
//!
//! Recorre el AST en preorden (declaraciones antes que sentencias,
//! hijos de izquierda a derecha) verificando su integridad estructural
//! y llevando una pila de ámbitos léxicos. El recorrido nunca se
//! interrumpe: solamente se conserva el primer error encontrado.
//!
//! Los accesos a variables no declaradas no son errores. Se declaran
//! implícitamente en el ámbito actual, ya que el lenguaje no exige
//! declaraciones previas.

use thiserror::Error;

use std::collections::HashSet;

use crate::{
    ast::*,
    source::{Located, Position},
};

pub type Validation = Result<(), Located<ValidationError>>;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid AST")]
    InvalidAst,

    #[error("{0} missing {1}")]
    Missing(&'static str, &'static str),

    #[error("{0} with empty name")]
    EmptyName(&'static str),

    #[error("RecordTypeSpec with no fields")]
    EmptyRecord,

    #[error("ArrayTypeSpec with invalid range {0}")]
    InvalidRange(Range),

    #[error("CaseLabel with no constants")]
    EmptyCaseLabel,

    #[error("AssignStmt target is not a variable")]
    NotAnLvalue,

    #[error("{0} takes a single argument")]
    ExtraArguments(String),
}

/// Valida un AST completo.
///
/// Un AST que el parser marcó como inválido produce
/// [`ValidationError::InvalidAst`] en la posición `0:0`.
pub fn validate(ast: &Ast) -> Validation {
    let program = match ast.program() {
        Some(program) => program,
        None => return Err(Located::at(ValidationError::InvalidAst, Position::default())),
    };

    let mut validator = Validator::default();
    validator.program(program);

    match validator.first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[derive(Default)]
struct Validator {
    scopes: Vec<HashSet<String>>,
    first_error: Option<Located<ValidationError>>,
}

impl Validator {
    fn program(&mut self, program: &Located<Program>) {
        let position = program.position();
        let program = program.val();

        self.name("Program", &program.name, position);

        self.scopes.push(HashSet::new());
        self.declare(&program.name);
        self.block(&program.block);
        self.scopes.pop();
    }

    fn block(&mut self, block: &Block) {
        self.scopes.push(HashSet::new());

        for declaration in &block.declarations {
            self.declaration(declaration);
        }

        for statement in &block.statements {
            self.statement(statement);
        }

        self.scopes.pop();
    }

    fn declaration(&mut self, declaration: &Located<Declaration>) {
        let position = declaration.position();

        match declaration.val() {
            Declaration::Var(var) => self.var_decl(var, position, true),

            Declaration::Const(ConstDecl { name, value }) => {
                self.name("ConstDecl", name, position);
                self.require(value.as_ref(), "ConstDecl", "value", position);
                self.declare(name);

                if let Some(value) = value {
                    self.expr(value);
                }
            }

            Declaration::Type(TypeDecl { name, typ }) => {
                self.name("TypeDecl", name, position);
                self.require(typ.as_ref(), "TypeDecl", "type", position);
                self.declare(name);

                if let Some(typ) = typ {
                    self.type_spec(typ);
                }
            }

            Declaration::Procedure(ProcedureDecl { name, params, body }) => {
                self.routine("ProcedureDecl", name, params, body, position);
            }

            Declaration::Function(function) => {
                let FunctionDecl {
                    name,
                    params,
                    return_type,
                    body,
                } = function;

                self.require(return_type.as_ref(), "FunctionDecl", "return type", position);
                if let Some(return_type) = return_type {
                    self.type_spec(return_type);
                }

                self.routine("FunctionDecl", name, params, body, position);
            }
        }
    }

    fn routine(
        &mut self,
        kind: &'static str,
        name: &str,
        params: &[Located<ParamDecl>],
        body: &Block,
        position: Position,
    ) {
        self.name(kind, name, position);
        self.declare(name);

        self.scopes.push(HashSet::new());

        for param in params {
            let ParamDecl { names, typ, .. } = param.val();
            self.names("ParamDecl", names, param.position());
            self.require(typ.as_ref(), "ParamDecl", "type", param.position());

            for name in names {
                self.declare(name);
            }

            if let Some(typ) = typ {
                self.type_spec(typ);
            }
        }

        self.block(body);
        self.scopes.pop();
    }

    fn var_decl(&mut self, var: &VarDecl, position: Position, declare: bool) {
        self.names("VarDecl", &var.names, position);
        self.require(var.typ.as_ref(), "VarDecl", "type", position);

        if declare {
            for name in &var.names {
                self.declare(name);
            }
        }

        if let Some(typ) = &var.typ {
            self.type_spec(typ);
        }
    }

    fn type_spec(&mut self, typ: &Located<TypeSpec>) {
        let position = typ.position();

        match typ.val() {
            TypeSpec::Simple { .. } => (),

            TypeSpec::Array { ranges, element } => {
                if let Some(range) = ranges.iter().find(|range| !range.is_valid()) {
                    self.fail(ValidationError::InvalidRange(*range), position);
                }

                self.require(element.as_ref(), "ArrayTypeSpec", "element type", position);
                if let Some(element) = element {
                    self.type_spec(element);
                }
            }

            TypeSpec::Record { fields } => {
                if fields.is_empty() {
                    self.fail(ValidationError::EmptyRecord, position);
                }

                // Los campos no son nombres del ámbito actual
                for field in fields {
                    self.var_decl(field.val(), field.position(), false);
                }
            }

            TypeSpec::Pointer(referenced) => {
                self.require(referenced.as_ref(), "PointerTypeSpec", "referenced type", position);
                if let Some(referenced) = referenced {
                    self.type_spec(referenced);
                }
            }
        }
    }

    fn statement(&mut self, statement: &Located<Statement>) {
        let position = statement.position();

        match statement.val() {
            Statement::Compound(statements) => {
                for statement in statements {
                    self.statement(statement);
                }
            }

            Statement::Assign(assign) => self.assign(assign, position),

            Statement::Call(call) => self.call(call, position),

            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.require(condition.as_ref(), "IfStmt", "condition", position);
                self.require(then_branch.as_ref(), "IfStmt", "then branch", position);

                self.optional_expr(condition);
                self.optional_statement(then_branch);
                self.optional_statement(else_branch);
            }

            Statement::While { condition, body } => {
                self.require(condition.as_ref(), "WhileStmt", "condition", position);
                self.require(body.as_ref(), "WhileStmt", "body", position);

                self.optional_expr(condition);
                self.optional_statement(body);
            }

            Statement::For {
                init,
                limit,
                body,
                ..
            } => {
                self.require(init.as_ref(), "ForStmt", "initializer", position);
                self.require(limit.as_ref(), "ForStmt", "limit", position);
                self.require(body.as_ref(), "ForStmt", "body", position);

                if let Some(init) = init {
                    self.assign(init.val(), init.position());
                }

                self.optional_expr(limit);
                self.optional_statement(body);
            }

            Statement::Repeat { body, condition } => {
                self.require(condition.as_ref(), "RepeatStmt", "condition", position);

                for statement in body {
                    self.statement(statement);
                }

                self.optional_expr(condition);
            }

            Statement::Case {
                expr,
                cases,
                else_branch,
            } => {
                self.require(expr.as_ref(), "CaseStmt", "expression", position);
                self.optional_expr(expr);

                for case in cases {
                    let CaseLabel { constants, stmt } = case.val();
                    if constants.is_empty() {
                        self.fail(ValidationError::EmptyCaseLabel, case.position());
                    }

                    self.require(stmt.as_ref(), "CaseLabel", "statement", case.position());

                    for constant in constants {
                        self.expr(constant);
                    }

                    self.optional_statement(stmt);
                }

                self.optional_statement(else_branch);
            }

            Statement::With { record, body } => {
                self.require(record.as_ref(), "WithStmt", "record", position);
                self.require(body.as_ref(), "WithStmt", "body", position);

                self.optional_expr(record);
                self.optional_statement(body);
            }
        }
    }

    fn assign(&mut self, assign: &Assign, position: Position) {
        let Assign { target, value } = assign;

        self.require(target.as_ref(), "AssignStmt", "target", position);
        self.require(value.as_ref(), "AssignStmt", "value", position);

        if let Some(target) = target {
            if target.val().as_variable().is_none() {
                self.fail(ValidationError::NotAnLvalue, target.position());
            }

            self.expr(target);
        }

        self.optional_expr(value);
    }

    /// `new` y `dispose` reciben exactamente un argumento; el de `new`
    /// es el puntero donde se almacena la dirección reservada.
    fn call(&mut self, call: &ProcCall, position: Position) {
        let ProcCall { name, args } = call;
        self.name("ProcCall", name, position);

        if let "new" | "dispose" = name.as_str() {
            match args.as_slice() {
                [] => self.fail(ValidationError::Missing("ProcCall", "argument"), position),

                [arg] if name == "new" && arg.val().as_variable().is_none() => {
                    self.fail(ValidationError::NotAnLvalue, arg.position())
                }

                [_] => (),

                [_, extra, ..] => {
                    self.fail(ValidationError::ExtraArguments(name.clone()), extra.position())
                }
            }
        }

        for arg in args {
            self.expr(arg);
        }
    }

    fn expr(&mut self, expr: &Located<Expr>) {
        let position = expr.position();

        match expr.val() {
            Expr::Binary { left, right, .. } => {
                self.require(right.as_ref(), "BinaryExpr", "right operand", position);

                self.expr(left);
                if let Some(right) = right {
                    self.expr(right);
                }
            }

            Expr::Unary { operand, .. } => {
                self.require(operand.as_ref(), "UnaryExpr", "operand", position);
                if let Some(operand) = operand {
                    self.expr(operand);
                }
            }

            Expr::Literal(_) => (),

            Expr::Variable(VariableExpr { name, selectors }) => {
                if !self.is_declared(name) {
                    self.declare(name);
                }

                for selector in selectors {
                    if let Selector::Index(index) = selector {
                        self.expr(index);
                    }
                }
            }

            Expr::Call(ProcCall { name, args }) => {
                self.name("CallExpr", name, position);
                for arg in args {
                    self.expr(arg);
                }
            }
        }
    }

    fn optional_expr(&mut self, expr: &Option<Located<Expr>>) {
        if let Some(expr) = expr {
            self.expr(expr);
        }
    }

    fn optional_statement(&mut self, statement: &Option<Box<Located<Statement>>>) {
        if let Some(statement) = statement {
            self.statement(statement);
        }
    }

    fn require<T>(
        &mut self,
        child: Option<T>,
        kind: &'static str,
        field: &'static str,
        position: Position,
    ) {
        if child.is_none() {
            self.fail(ValidationError::Missing(kind, field), position);
        }
    }

    fn name(&mut self, kind: &'static str, name: &str, position: Position) {
        if name.is_empty() {
            self.fail(ValidationError::EmptyName(kind), position);
        }
    }

    fn names(&mut self, kind: &'static str, names: &[String], position: Position) {
        if names.is_empty() || names.iter().any(String::is_empty) {
            self.fail(ValidationError::EmptyName(kind), position);
        }
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned());
        }
    }

    /// Busca un nombre desde el ámbito más interno hacia el más externo.
    fn is_declared(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(name))
    }

    fn fail(&mut self, error: ValidationError, position: Position) {
        if self.first_error.is_none() {
            self.first_error = Some(Located::at(error, position));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::scan, parse::parse};

    fn check(source: &str) -> Validation {
        let ast = parse(&scan(source)).unwrap();
        validate(&ast)
    }

    fn message(source: &str) -> String {
        check(source).unwrap_err().into_inner().to_string()
    }

    fn located(source: &str) -> String {
        check(source).unwrap_err().to_string()
    }

    #[test]
    fn well_formed_program() {
        let source = "program p;\n\
                      type R = record x: integer end;\n\
                      var a: array[1..10] of R; n: integer;\n\
                      procedure bump(var k: integer);\n\
                      begin k := k + 1 end;\n\
                      begin\n\
                        for n := 1 to 10 do a[n].x := n;\n\
                        bump(n)\n\
                      end.";

        assert_eq!(check(source), Ok(()));
    }

    #[test]
    fn empty_record() {
        assert_eq!(message("type R = record end;"), "RecordTypeSpec with no fields");
    }

    #[test]
    fn inverted_range() {
        let error = check("type T = array[2..1] of integer;").unwrap_err();

        assert_eq!(
            error.val(),
            &ValidationError::InvalidRange(Range { start: 2, end: 1 })
        );

        assert_eq!(error.position(), Position::new(1, 9));
        assert_eq!(error.to_string(), "ArrayTypeSpec with invalid range 2..1 at 1:9");
    }

    #[test]
    fn invalid_ast() {
        let ast = parse(&scan("")).unwrap();
        let error = validate(&ast).unwrap_err();

        assert_eq!(error.val(), &ValidationError::InvalidAst);
        assert_eq!(error.position(), Position::new(0, 0));
    }

    #[test]
    fn missing_children() {
        assert_eq!(message("if then x := 1"), "IfStmt missing condition");
        assert_eq!(message("while x do ;"), "WhileStmt missing body");
        assert_eq!(message("x := ;"), "AssignStmt missing value");
        assert_eq!(message("x := 1 +"), "BinaryExpr missing right operand");
        assert_eq!(message("var p: ^;"), "PointerTypeSpec missing referenced type");
        assert_eq!(message("function f: ; begin end;"), "FunctionDecl missing return type");
    }

    #[test]
    fn empty_routine_name() {
        assert_eq!(message("procedure ; begin end;"), "ProcedureDecl with empty name");
    }

    #[test]
    fn first_error_wins() {
        let error = check("type A = array[5..1] of integer;\ntype R = record end;").unwrap_err();
        assert!(matches!(error.val(), ValidationError::InvalidRange(_)));

        let error = check("if x then ;\nwhile y do ;").unwrap_err();
        assert_eq!(error.into_inner(), ValidationError::Missing("IfStmt", "then branch"));
    }

    #[test]
    fn builtin_arguments() {
        assert_eq!(located("begin new end"), "ProcCall missing argument at 1:6");
        assert_eq!(located("begin dispose() end"), "ProcCall missing argument at 1:6");
        assert_eq!(located("begin new(1) end"), "AssignStmt target is not a variable at 1:10");
        assert_eq!(located("begin new(p, q) end"), "new takes a single argument at 1:13");

        assert_eq!(check("begin new(p); p^ := 1; dispose(p) end"), Ok(()));
    }

    #[test]
    fn undeclared_variables_are_implicit() {
        assert_eq!(check("x := y + 1; z := x"), Ok(()));
    }

    #[test]
    fn scopes_are_lifo() {
        let ast = parse(&scan("var a: integer;\nprocedure p(b: integer);\nbegin c := b end;\nd := a")).unwrap();
        let program = ast.program().unwrap();

        let mut validator = Validator::default();
        validator.program(program);

        assert!(validator.first_error.is_none());
        assert!(validator.scopes.is_empty());
        assert!(!validator.is_declared("a"));
    }
}
