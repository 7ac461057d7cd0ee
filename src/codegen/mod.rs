//! Generación de código ensamblador.
//!
//! El generador recorre un AST validado y produce un único listado NASM
//! para x86-64 (System V). Toda variable, parámetro y resultado de
//! función vive en una celda global de 8 bytes en `.bss`. Las
//! expresiones se evalúan con una disciplina de pila: el resultado queda
//! siempre en `rax`, y los operandos izquierdos se preservan en la pila
//! mientras se evalúa el derecho.
//!
//! La salida es determinista. Las tablas de variables y cadenas se
//! emiten en orden de primera aparición, y las etiquetas de salto se
//! numeran con un único contador que empieza en 1.

use crate::{
    ast::*,
    source::{Located, Position},
};
use bitflags::bitflags;
use thiserror::Error;

use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Display, Write},
    mem,
};

mod layout;
mod x86_64;

use layout::{Layout, Step};
use x86_64::{Reg, VALUE_SIZE};

/// Error de generación de código.
///
/// Solo ocurre si el árbol no fue validado previamente.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("Invalid AST")]
    InvalidAst,

    #[error("{0} missing {1}")]
    Missing(&'static str, &'static str),

    #[error("Assignment target is not a variable")]
    NotAnLvalue,

    #[error("Malformed literal `{0}`")]
    BadLiteral(String),

    #[error("Formatting error")]
    Fmt(#[from] fmt::Error),
}

impl From<fmt::Error> for Located<CodegenError> {
    fn from(error: fmt::Error) -> Self {
        Located::at(CodegenError::Fmt(error), Default::default())
    }
}

type Emit<T = ()> = Result<T, Located<CodegenError>>;

/// Traduce un programa completo a ensamblador NASM.
///
/// Invocar esta función dos veces sobre el mismo árbol produce
/// exactamente el mismo texto.
pub fn generate(ast: &Ast) -> Emit<String> {
    let program = ast
        .program()
        .ok_or_else(|| Located::at(CodegenError::InvalidAst, Default::default()))?;

    let mut generator = Generator::new();
    generator.block(&program.val().block)?;

    Ok(generator.finish()?)
}

bitflags! {
    /// Símbolos de libc referidos por el programa.
    struct Externs: u32 {
        const MALLOC = 0x01;
        const FREE = 0x02;
        const PRINTF = 0x04;
    }
}

const EXTERNS: &[(Externs, &str)] = &[
    (Externs::MALLOC, "malloc"),
    (Externs::FREE, "free"),
    (Externs::PRINTF, "printf"),
];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Label(u32);

impl Display for Label {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "L{}", self.0)
    }
}

/// Ubicación de un valor en memoria.
///
/// `Static` se direcciona directamente por símbolo; `Dynamic` requiere
/// calcular la dirección en tiempo de ejecución a partir de `base`.
enum Place<'a> {
    Static(String),
    Dynamic { base: String, steps: Vec<Step<'a>> },
}

struct Generator<'a> {
    text: String,
    routines: Vec<String>,
    variables: Vec<&'a str>,
    cells: HashSet<&'a str>,
    strings: Vec<String>,
    string_labels: HashMap<String, usize>,
    labels: u32,
    depth: usize,
    externs: Externs,
    layout: Layout<'a>,
    constants: HashMap<&'a str, &'a Located<Expr>>,
    expanding: Vec<&'a str>,
    callables: HashMap<&'a str, bool>,
    function: Option<&'a str>,
    withs: Vec<&'a VariableExpr>,
}

impl<'a> Generator<'a> {
    fn new() -> Self {
        Generator {
            text: String::new(),
            routines: Vec::new(),
            variables: Vec::new(),
            cells: HashSet::new(),
            strings: Vec::new(),
            string_labels: HashMap::new(),
            labels: 0,
            depth: 0,
            externs: Externs::empty(),
            layout: Layout::default(),
            constants: HashMap::new(),
            expanding: Vec::new(),
            callables: HashMap::new(),
            function: None,
            withs: Vec::new(),
        }
    }

    fn output(&mut self) -> &mut String {
        &mut self.text
    }

    fn finish(self) -> Result<String, fmt::Error> {
        let mut output = String::new();

        writeln!(output, "section .bss")?;
        for variable in &self.variables {
            writeln!(output, "{}:    resq    1", variable)?;
        }

        writeln!(output)?;

        if !self.strings.is_empty() {
            writeln!(output, "section .data")?;
            for (index, string) in self.strings.iter().enumerate() {
                writeln!(output, "str{}:    db    {}", index, encode(string))?;
            }

            writeln!(output)?;
        }

        writeln!(output, "section .text")?;
        writeln!(output, "global main")?;

        for &(flag, symbol) in EXTERNS {
            if self.externs.contains(flag) {
                writeln!(output, "extern {}", symbol)?;
            }
        }

        writeln!(output, "main:")?;
        output.push_str(&self.text);
        writeln!(output, "    ret")?;

        for routine in &self.routines {
            writeln!(output)?;
            output.push_str(routine);
        }

        Ok(output)
    }

    fn block(&mut self, block: &'a Block) -> Emit {
        for declaration in &block.declarations {
            self.declaration(declaration)?;
        }

        for statement in &block.statements {
            self.statement(statement)?;
        }

        Ok(())
    }

    fn declaration(&mut self, declaration: &'a Located<Declaration>) -> Emit {
        match declaration.val() {
            Declaration::Var(VarDecl { names, typ }) => {
                for name in names {
                    self.variable(name, typ.as_ref().map(Located::val));
                }
            }

            Declaration::Const(ConstDecl { name, value }) => {
                if let Some(value) = value {
                    self.constants.insert(name, value);
                }
            }

            Declaration::Type(TypeDecl { name, typ }) => {
                if let Some(typ) = typ {
                    self.layout.declare_type(name, typ.val());
                }
            }

            Declaration::Procedure(procedure) => {
                self.routine(&procedure.name, &procedure.params, &procedure.body, false)?
            }

            Declaration::Function(function) => {
                self.routine(&function.name, &function.params, &function.body, true)?
            }
        }

        Ok(())
    }

    /// Emite una rutina en su propio bloque, después de `main`.
    ///
    /// Los parámetros se copian desde los registros de argumentos (o desde
    /// la pila, a partir del séptimo) hacia sus celdas. Una función
    /// retorna el contenido de la celda con su propio nombre.
    fn routine(
        &mut self,
        name: &'a str,
        params: &'a [Located<ParamDecl>],
        body: &'a Block,
        function: bool,
    ) -> Emit {
        self.callables.insert(name, function);
        if function {
            self.cell(name);
        }

        // Las declaraciones locales no sobreviven a la rutina
        let outer_scope = (
            self.layout.clone(),
            self.constants.clone(),
            self.callables.clone(),
        );

        let outer_text = mem::take(&mut self.text);
        let outer_depth = mem::replace(&mut self.depth, 0);
        let outer_function = mem::replace(&mut self.function, Some(name).filter(|_| function));

        writeln!(self.text, "{}:", routine_symbol(name))?;

        let params = params.iter().flat_map(|group| {
            let group = group.val();
            let typ = group.typ.as_ref().map(Located::val);
            group.names.iter().map(move |name| (name, typ))
        });

        let mut registers = Reg::argument_sequence();
        for (index, (param, typ)) in params.enumerate() {
            self.variable(param, typ);

            match registers.next() {
                Some(reg) => emit!(self, "mov", "[{}], {}", param, reg)?,
                None => {
                    // Dirección de retorno en [rsp], argumentos extra por encima
                    let offset = (index - Reg::MAX_ARGS + 1) as i64 * VALUE_SIZE;
                    emit!(self, "mov", "rax, [rsp + {}]", offset)?;
                    emit!(self, "mov", "[{}], rax", param)?;
                }
            }
        }

        self.block(body)?;

        if function {
            emit!(self, "mov", "rax, [{}]", name)?;
        }

        emit!(self, "ret")?;

        let routine = mem::replace(&mut self.text, outer_text);
        self.routines.push(routine);

        self.depth = outer_depth;
        self.function = outer_function;
        (self.layout, self.constants, self.callables) = outer_scope;

        Ok(())
    }

    fn statement(&mut self, statement: &'a Located<Statement>) -> Emit {
        let position = statement.position();

        match statement.val() {
            Statement::Compound(statements) => {
                for statement in statements {
                    self.statement(statement)?;
                }
            }

            Statement::Assign(assign) => self.assign(assign, position)?,

            Statement::Call(call) => self.procedure_call(call, position)?,

            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = condition
                    .as_ref()
                    .ok_or_else(missing("IfStmt", "condition", position))?;

                let then_branch = then_branch
                    .as_deref()
                    .ok_or_else(missing("IfStmt", "then branch", position))?;

                let otherwise = self.label();
                self.branch_unless(condition, otherwise)?;
                self.statement(then_branch)?;

                match else_branch {
                    Some(else_branch) => {
                        let join = self.label();
                        emit!(self, "jmp", "{}", join)?;
                        self.set_label(otherwise)?;
                        self.statement(else_branch)?;
                        self.set_label(join)?;
                    }

                    None => self.set_label(otherwise)?,
                }
            }

            Statement::While { condition, body } => {
                let condition = condition
                    .as_ref()
                    .ok_or_else(missing("WhileStmt", "condition", position))?;

                let body = body.as_deref().ok_or_else(missing("WhileStmt", "body", position))?;

                let (top, exit) = (self.label(), self.label());

                self.set_label(top)?;
                self.branch_unless(condition, exit)?;
                self.statement(body)?;
                emit!(self, "jmp", "{}", top)?;
                self.set_label(exit)?;
            }

            Statement::For {
                init,
                downto,
                limit,
                body,
            } => {
                let init = init.as_ref().ok_or_else(missing("ForStmt", "initializer", position))?;
                let limit = limit.as_ref().ok_or_else(missing("ForStmt", "limit", position))?;
                let body = body.as_deref().ok_or_else(missing("ForStmt", "body", position))?;

                self.assign(init.val(), init.position())?;

                let counter = init
                    .val()
                    .target
                    .as_ref()
                    .and_then(|target| target.val().as_variable())
                    .ok_or_else(|| Located::at(CodegenError::NotAnLvalue, init.position()))?;

                let (top, exit) = (self.label(), self.label());
                let (exit_jump, step) = if *downto { ("jl", "sub") } else { ("jg", "add") };

                self.set_label(top)?;
                self.load(counter)?;
                self.push(Reg::ACCUMULATOR)?;
                self.expr(limit)?;
                self.pop(Reg::SECONDARY)?;
                emit!(self, "cmp", "{}, {}", Reg::SECONDARY, Reg::ACCUMULATOR)?;
                emit!(self, exit_jump, "{}", exit)?;

                self.statement(body)?;

                self.load(counter)?;
                emit!(self, step, "{}, 1", Reg::ACCUMULATOR)?;
                self.store(counter)?;
                emit!(self, "jmp", "{}", top)?;
                self.set_label(exit)?;
            }

            Statement::Repeat { body, condition } => {
                let condition = condition
                    .as_ref()
                    .ok_or_else(missing("RepeatStmt", "condition", position))?;

                let top = self.label();
                self.set_label(top)?;

                for statement in body {
                    self.statement(statement)?;
                }

                self.branch_unless(condition, top)?;
            }

            Statement::Case {
                expr,
                cases,
                else_branch,
            } => {
                let expr = expr.as_ref().ok_or_else(missing("CaseStmt", "expression", position))?;
                self.case(expr, cases, else_branch.as_deref())?;
            }

            Statement::With { record, body } => {
                let record = record.as_ref().ok_or_else(missing("WithStmt", "record", position))?;
                let body = body.as_deref().ok_or_else(missing("WithStmt", "body", position))?;

                match record.val().as_variable() {
                    Some(record) => {
                        self.withs.push(record);
                        self.statement(body)?;
                        self.withs.pop();
                    }

                    None => self.statement(body)?,
                }
            }
        }

        Ok(())
    }

    /// El selector se conserva en la pila durante todas las comparaciones.
    fn case(
        &mut self,
        expr: &'a Located<Expr>,
        cases: &'a [Located<CaseLabel>],
        else_branch: Option<&'a Located<Statement>>,
    ) -> Emit {
        self.expr(expr)?;
        self.push(Reg::ACCUMULATOR)?;

        let end = match else_branch {
            Some(_) => Some(self.label()),
            None => None,
        };

        for case in cases {
            let position = case.position();
            let CaseLabel { constants, stmt } = case.val();

            let stmt = stmt.as_deref().ok_or_else(|| {
                Located::at(CodegenError::Missing("CaseLabel", "statement"), position)
            })?;

            let (last, rest) = constants.split_last().ok_or_else(|| {
                Located::at(CodegenError::Missing("CaseLabel", "constants"), position)
            })?;

            let body = Some(self.label()).filter(|_| !rest.is_empty());
            let skip = self.label();
            if let Some(body) = body {

                for constant in rest {
                    self.expr(constant)?;
                    emit!(self, "cmp", "[rsp], {}", Reg::ACCUMULATOR)?;
                    emit!(self, "je", "{}", body)?;
                }

                self.expr(last)?;
                emit!(self, "cmp", "[rsp], {}", Reg::ACCUMULATOR)?;
                emit!(self, "jne", "{}", skip)?;
                self.set_label(body)?;
            } else {
                self.expr(last)?;
                emit!(self, "cmp", "[rsp], {}", Reg::ACCUMULATOR)?;
                emit!(self, "jne", "{}", skip)?;
            }

            self.statement(stmt)?;
            if let Some(end) = end {
                emit!(self, "jmp", "{}", end)?;
            }

            self.set_label(skip)?;
        }

        if let Some(else_branch) = else_branch {
            self.statement(else_branch)?;
        }

        if let Some(end) = end {
            self.set_label(end)?;
        }

        self.discard()
    }

    fn assign(&mut self, assign: &'a Assign, position: Position) -> Emit {
        let target = assign.target.as_ref().ok_or_else(|| {
            Located::at(CodegenError::Missing("AssignStmt", "target"), position)
        })?;

        let value = assign.value.as_ref().ok_or_else(|| {
            Located::at(CodegenError::Missing("AssignStmt", "value"), position)
        })?;

        let target = target
            .val()
            .as_variable()
            .ok_or_else(|| Located::at(CodegenError::NotAnLvalue, target.position()))?;

        match immediate(value) {
            Some(immediate) => {
                let operand = self.address(target)?;
                emit!(self, "mov", "qword [{}], {}", operand, immediate)?;
                Ok(())
            }

            None => {
                self.expr(value)?;
                self.store(target)
            }
        }
    }

    fn procedure_call(&mut self, call: &'a ProcCall, position: Position) -> Emit {
        let first = || {
            call.args.first().ok_or_else(|| {
                Located::at(CodegenError::Missing("ProcCall", "argument"), position)
            })
        };

        match call.name.as_str() {
            "new" => {
                let target = first()?;
                let variable = target
                    .val()
                    .as_variable()
                    .ok_or_else(|| Located::at(CodegenError::NotAnLvalue, target.position()))?;

                let typ = self.layout.resolve(variable, &self.withs).typ;
                let size = self.layout.cells(self.layout.pointee(typ)) * VALUE_SIZE;

                emit!(self, "mov", "rdi, {}", size)?;
                self.externs |= Externs::MALLOC;
                self.libc("malloc")?;
                self.store(variable)
            }

            "dispose" => {
                self.expr(first()?)?;
                emit!(self, "mov", "rdi, {}", Reg::ACCUMULATOR)?;
                self.externs |= Externs::FREE;
                self.libc("free")
            }

            name @ ("write" | "writeln") => {
                for arg in &call.args {
                    self.print(arg)?;
                }

                if name == "writeln" {
                    let newline = self.intern("\n");
                    emit!(self, "lea", "rdi, [str{}]", newline)?;
                    emit!(self, "xor", "eax, eax")?;
                    self.externs |= Externs::PRINTF;
                    self.libc("printf")?;
                }

                Ok(())
            }

            name => self.call(name, &call.args),
        }
    }

    fn print(&mut self, arg: &'a Located<Expr>) -> Emit {
        let kind = self.value_kind(arg);
        self.expr(arg)?;

        match kind {
            LiteralKind::Real => {
                let format = self.intern("%f");
                emit!(self, "movq", "xmm0, {}", Reg::ACCUMULATOR)?;
                emit!(self, "lea", "rdi, [str{}]", format)?;
                emit!(self, "mov", "eax, 1")?;
            }

            kind => {
                let format = self.intern(match kind {
                    LiteralKind::String => "%s",
                    _ => "%ld",
                });

                emit!(self, "mov", "rsi, {}", Reg::ACCUMULATOR)?;
                emit!(self, "lea", "rdi, [str{}]", format)?;
                emit!(self, "xor", "eax, eax")?;
            }
        }

        self.externs |= Externs::PRINTF;
        self.libc("printf")
    }

    /// Llamada a una rutina del programa.
    fn call(&mut self, name: &str, args: &'a [Located<Expr>]) -> Emit {
        let stacked = args.len().saturating_sub(Reg::MAX_ARGS);
        let padding = x86_64::padding_for(self.depth + stacked);

        if padding > 0 {
            emit!(self, "sub", "rsp, {}", VALUE_SIZE)?;
            self.depth += padding;
        }

        for arg in args.iter().rev() {
            self.expr(arg)?;
            self.push(Reg::ACCUMULATOR)?;
        }

        for reg in Reg::argument_sequence().take(args.len()) {
            self.pop(reg)?;
        }

        emit!(self, "call", "{}", routine_symbol(name))?;

        let reclaimed = stacked + padding;
        if reclaimed > 0 {
            emit!(self, "add", "rsp, {}", reclaimed as i64 * VALUE_SIZE)?;
            self.depth -= reclaimed;
        }

        Ok(())
    }

    /// Llamada a libc, con argumentos ya colocados en registros.
    fn libc(&mut self, symbol: &str) -> Emit {
        let padded = x86_64::padding_for(self.depth) > 0;

        if padded {
            emit!(self, "sub", "rsp, {}", VALUE_SIZE)?;
        }

        emit!(self, "call", "{}", symbol)?;

        if padded {
            emit!(self, "add", "rsp, {}", VALUE_SIZE)?;
        }

        Ok(())
    }

    fn expr(&mut self, expr: &'a Located<Expr>) -> Emit {
        let position = expr.position();

        match expr.val() {
            Expr::Literal(literal) => self.literal(literal, position),

            Expr::Variable(variable) => self.load(variable),

            Expr::Call(call) => self.call(&call.name, &call.args),

            Expr::Binary { left, op, right } => {
                let right = right.as_deref().ok_or_else(|| {
                    Located::at(CodegenError::Missing("BinaryExpr", "right operand"), position)
                })?;

                self.operands(left, right)?;
                self.apply(*op)
            }

            Expr::Unary { op, operand } => {
                let operand = operand.as_deref().ok_or_else(|| {
                    Located::at(CodegenError::Missing("UnaryExpr", "operand"), position)
                })?;

                self.expr(operand)?;

                match op {
                    UnOp::Negate => emit!(self, "neg", "{}", Reg::ACCUMULATOR)?,
                    UnOp::Not => {
                        emit!(self, "cmp", "{}, 0", Reg::ACCUMULATOR)?;
                        emit!(self, "sete", "al")?;
                        emit!(self, "movzx", "{}, al", Reg::ACCUMULATOR)?;
                    }
                }

                Ok(())
            }
        }
    }

    /// Deja el operando izquierdo en `rcx` y el derecho en `rax`.
    fn operands(&mut self, left: &'a Located<Expr>, right: &'a Located<Expr>) -> Emit {
        self.expr(left)?;
        self.push(Reg::ACCUMULATOR)?;
        self.expr(right)?;
        self.pop(Reg::SECONDARY)
    }

    fn apply(&mut self, op: BinOp) -> Emit {
        let (acc, sec) = (Reg::ACCUMULATOR, Reg::SECONDARY);

        match op {
            BinOp::Add => emit!(self, "add", "{}, {}", acc, sec)?,
            BinOp::Mul => emit!(self, "imul", "{}, {}", acc, sec)?,
            BinOp::And => emit!(self, "and", "{}, {}", acc, sec)?,
            BinOp::Or => emit!(self, "or", "{}, {}", acc, sec)?,

            BinOp::Sub => {
                emit!(self, "sub", "{}, {}", sec, acc)?;
                emit!(self, "mov", "{}, {}", acc, sec)?;
            }

            BinOp::Divide | BinOp::Div | BinOp::Mod => {
                emit!(self, "xchg", "{}, {}", acc, sec)?;
                emit!(self, "cqo")?;
                emit!(self, "idiv", "{}", sec)?;

                if op == BinOp::Mod {
                    emit!(self, "mov", "{}, rdx", acc)?;
                }
            }

            relational => {
                if let Some(set) = x86_64::set_condition(relational) {
                    emit!(self, "cmp", "{}, {}", sec, acc)?;
                    emit!(self, set, "al")?;
                    emit!(self, "movzx", "{}, al", acc)?;
                }
            }
        }

        Ok(())
    }

    /// Salta a `target` si la condición es falsa.
    fn branch_unless(&mut self, condition: &'a Located<Expr>, target: Label) -> Emit {
        if let Expr::Binary {
            left,
            op,
            right: Some(right),
        } = condition.val()
        {
            if let Some(jump) = x86_64::inverse_jump(*op) {
                self.operands(left, right)?;
                emit!(self, "cmp", "{}, {}", Reg::SECONDARY, Reg::ACCUMULATOR)?;
                emit!(self, jump, "{}", target)?;
                return Ok(());
            }
        }

        self.expr(condition)?;
        emit!(self, "cmp", "{}, 0", Reg::ACCUMULATOR)?;
        emit!(self, "je", "{}", target)?;

        Ok(())
    }

    fn literal(&mut self, literal: &Literal, position: Position) -> Emit {
        match literal.kind() {
            LiteralKind::Integer => {
                let value: i64 = literal.value.parse().map_err(|_| {
                    Located::at(CodegenError::BadLiteral(literal.value.clone()), position)
                })?;

                emit!(self, "mov", "{}, {}", Reg::ACCUMULATOR, value)?;
            }

            LiteralKind::Real => {
                let value: f64 = literal.value.parse().map_err(|_| {
                    Located::at(CodegenError::BadLiteral(literal.value.clone()), position)
                })?;

                emit!(self, "mov", "{}, 0x{:016x}", Reg::ACCUMULATOR, value.to_bits())?;
            }

            LiteralKind::String => {
                let label = self.intern(literal.content());
                emit!(self, "lea", "{}, [str{}]", Reg::ACCUMULATOR, label)?;
            }
        }

        Ok(())
    }

    /// Carga el valor de un acceso a variable en `rax`.
    ///
    /// Un nombre de constante se sustituye por su valor, y el nombre de
    /// una función fuera de su propio cuerpo es una llamada sin argumentos.
    fn load(&mut self, variable: &'a VariableExpr) -> Emit {
        let name = variable.name.as_str();

        if variable.selectors.is_empty() && !self.layout.is_open_field(name, &self.withs) {
            if let Some(&value) = self.constants.get(name) {
                if !self.expanding.contains(&name) {
                    self.expanding.push(name);
                    let result = self.expr(value);
                    self.expanding.pop();

                    return result;
                }
            }

            if self.callables.get(name) == Some(&true) && self.function != Some(name) {
                return self.call(name, &[]);
            }
        }

        match self.place(variable) {
            Place::Static(operand) => emit!(self, "mov", "{}, [{}]", Reg::ACCUMULATOR, operand)?,

            dynamic => {
                self.compute(dynamic)?;
                emit!(self, "mov", "{0}, [{0}]", Reg::ACCUMULATOR)?;
            }
        }

        Ok(())
    }

    /// Almacena `rax` en un acceso a variable.
    fn store(&mut self, variable: &'a VariableExpr) -> Emit {
        match self.place(variable) {
            Place::Static(operand) => emit!(self, "mov", "[{}], {}", operand, Reg::ACCUMULATOR)?,

            dynamic => {
                self.push(Reg::ACCUMULATOR)?;
                self.compute(dynamic)?;
                self.pop(Reg::SECONDARY)?;
                emit!(self, "mov", "[{}], {}", Reg::ACCUMULATOR, Reg::SECONDARY)?;
            }
        }

        Ok(())
    }

    /// Operando de memoria para un acceso, calculado en `rax` si es dinámico.
    fn address(&mut self, variable: &'a VariableExpr) -> Emit<String> {
        match self.place(variable) {
            Place::Static(operand) => Ok(operand),
            dynamic => {
                self.compute(dynamic)?;
                Ok(Reg::ACCUMULATOR.to_string())
            }
        }
    }

    fn place(&mut self, variable: &'a VariableExpr) -> Place<'a> {
        let resolved = self.layout.resolve(variable, &self.withs);
        self.cell(resolved.base);

        let mut steps = resolved.steps.into_iter().peekable();

        let (mut offset, mut folded) = (0, false);
        while let Some(Step::Offset(step)) = steps.peek() {
            offset += step;
            folded = true;
            steps.next();
        }

        let base = match (folded, offset) {
            (false, _) => resolved.base.to_owned(),
            (true, offset) if offset < 0 => format!("{} - {}", resolved.base, -offset),
            (true, offset) => format!("{} + {}", resolved.base, offset),
        };

        let steps: Vec<_> = steps.collect();
        if steps.is_empty() {
            Place::Static(base)
        } else {
            Place::Dynamic { base, steps }
        }
    }

    /// Calcula en `rax` la dirección de un acceso dinámico.
    fn compute(&mut self, place: Place<'a>) -> Emit {
        let (base, steps) = match place {
            Place::Static(base) => (base, Vec::new()),
            Place::Dynamic { base, steps } => (base, steps),
        };

        let acc = Reg::ACCUMULATOR;
        let mut steps = steps.into_iter().peekable();

        match steps.peek() {
            Some(Step::Deref) => {
                emit!(self, "mov", "{}, [{}]", acc, base)?;
                steps.next();
            }

            _ => emit!(self, "lea", "{}, [{}]", acc, base)?,
        }

        for step in steps {
            match step {
                Step::Offset(0) => (),
                Step::Offset(offset) if offset < 0 => emit!(self, "sub", "{}, {}", acc, -offset)?,
                Step::Offset(offset) => emit!(self, "add", "{}, {}", acc, offset)?,
                Step::Deref => emit!(self, "mov", "{0}, [{0}]", acc)?,

                Step::Index { index, low } => {
                    self.push(acc)?;
                    self.expr(index)?;

                    if low != 0 {
                        emit!(self, "sub", "{}, {}", acc, low)?;
                    }

                    emit!(self, "imul", "{0}, {0}, {1}", acc, VALUE_SIZE)?;
                    self.pop(Reg::SECONDARY)?;
                    emit!(self, "add", "{}, {}", acc, Reg::SECONDARY)?;
                }
            }
        }

        Ok(())
    }

    /// Tipo de valor de una expresión, para elegir el formato de `printf`.
    fn value_kind(&self, expr: &'a Located<Expr>) -> LiteralKind {
        match expr.val() {
            Expr::Literal(literal) => literal.kind(),

            Expr::Variable(variable) => {
                let name = variable.name.as_str();
                let constant = self
                    .constants
                    .get(name)
                    .filter(|_| variable.selectors.is_empty())
                    .filter(|_| !self.layout.is_open_field(name, &self.withs))
                    .and_then(|value| value.val().as_literal());

                if let Some(literal) = constant {
                    return literal.kind();
                }

                match self.layout.resolve(variable, &self.withs).typ {
                    Some(TypeSpec::Simple {
                        basic: BasicType::String,
                        ..
                    }) => LiteralKind::String,

                    Some(TypeSpec::Simple {
                        basic: BasicType::Real,
                        ..
                    }) => LiteralKind::Real,

                    _ => LiteralKind::Integer,
                }
            }

            Expr::Unary {
                op: UnOp::Negate,
                operand: Some(operand),
            } => self.value_kind(operand),

            _ => LiteralKind::Integer,
        }
    }

    fn push(&mut self, reg: Reg) -> Emit {
        emit!(self, "push", "{}", reg)?;
        self.depth += 1;

        Ok(())
    }

    fn pop(&mut self, reg: Reg) -> Emit {
        emit!(self, "pop", "{}", reg)?;
        self.depth -= 1;

        Ok(())
    }

    fn discard(&mut self) -> Emit {
        emit!(self, "add", "rsp, {}", VALUE_SIZE)?;
        self.depth -= 1;

        Ok(())
    }

    fn label(&mut self) -> Label {
        self.labels += 1;
        Label(self.labels)
    }

    fn set_label(&mut self, label: Label) -> Emit {
        writeln!(self.text, "{}:", label)?;
        Ok(())
    }

    /// Declara una variable o parámetro, ocultando constantes y rutinas
    /// homónimas del ámbito exterior.
    fn variable(&mut self, name: &'a str, typ: Option<&'a TypeSpec>) {
        self.cell(name);
        self.layout.declare_variable(name, typ);
        self.constants.remove(name);
        self.callables.remove(name);
    }

    fn cell(&mut self, name: &'a str) {
        if self.cells.insert(name) {
            self.variables.push(name);
        }
    }

    fn intern(&mut self, content: &str) -> usize {
        if let Some(&index) = self.string_labels.get(content) {
            return index;
        }

        let index = self.strings.len();
        self.strings.push(content.to_owned());
        self.string_labels.insert(content.to_owned(), index);

        index
    }
}

fn missing(
    node: &'static str,
    field: &'static str,
    position: Position,
) -> impl FnOnce() -> Located<CodegenError> {
    move || Located::at(CodegenError::Missing(node, field), position)
}

fn routine_symbol(name: &str) -> String {
    format!("fn_{}", name)
}

/// Constante entera que cabe como inmediato de 32 bits.
fn immediate(expr: &Located<Expr>) -> Option<i64> {
    layout::integer_constant(expr).filter(|&value| i32::try_from(value).is_ok())
}

/// Codifica una cadena como operandos de `db`, terminada en nulo.
fn encode(content: &str) -> String {
    let mut pieces = Vec::new();
    let mut run = String::new();

    for byte in content.bytes() {
        if (0x20..0x7f).contains(&byte) && byte != b'\'' {
            run.push(byte as char);
        } else {
            if !run.is_empty() {
                pieces.push(format!("'{}'", mem::take(&mut run)));
            }

            pieces.push(byte.to_string());
        }
    }

    if !run.is_empty() {
        pieces.push(format!("'{}'", run));
    }

    pieces.push(String::from("0"));
    pieces.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex, parse};

    fn compile(source: &str) -> String {
        let ast = parse::parse(&lex::scan(source)).expect("parse failed");
        generate(&ast).expect("codegen failed")
    }

    fn labels(asm: &str) -> Vec<u32> {
        asm.lines()
            .filter_map(|line| line.strip_prefix('L')?.strip_suffix(':')?.parse().ok())
            .collect()
    }

    #[test]
    fn single_variable() {
        assert_eq!(
            compile("var a: integer;"),
            "section .bss\na:    resq    1\n\nsection .text\nglobal main\nmain:\n    ret\n"
        );
    }

    #[test]
    fn constant_index_store() {
        let asm = compile("a[1] := 0");
        assert!(asm.contains("    mov qword [a + 0], 0\n"));
        assert!(asm.starts_with("section .bss\na:    resq    1\n"));
    }

    #[test]
    fn if_else_branches() {
        let asm = compile("if a > 0 then b := 1 else b := 2");

        let expected = "\
main:
    mov rax, [a]
    push rax
    mov rax, 0
    pop rcx
    cmp rcx, rax
    jle L1
    mov qword [b], 1
    jmp L2
L1:
    mov qword [b], 2
L2:
    ret
";

        assert!(asm.ends_with(expected), "{}", asm);
        assert_eq!(labels(&asm), [1, 2]);
    }

    #[test]
    fn variables_are_unique() {
        let asm = compile("var a, b: integer;\nbegin a := 1; b := a; a := b end");
        assert_eq!(asm.matches("resq").count(), 2);
        assert!(asm.find("a:    resq").unwrap() < asm.find("b:    resq").unwrap());
    }

    #[test]
    fn redeclared_variables_share_a_cell() {
        for source in ["var a: integer;\nvar a: real;", "var a, a: integer;"] {
            let asm = compile(source);
            assert_eq!(asm.matches("a:    resq").count(), 1, "{}", asm);
        }
    }

    #[test]
    fn strings_are_deduplicated() {
        let asm = compile("begin writeln('hi'); writeln('hi'); write('it''s') end");

        assert_eq!(asm.matches("'hi', 0").count(), 1);
        assert!(asm.contains("section .data\n"));
        assert!(asm.contains("'it', 39, 's', 0"));
        assert!(asm.contains("extern printf\n"));
        assert!(!asm.contains("extern malloc"));
    }

    #[test]
    fn sequential_labels_in_order() {
        let asm = compile(
            "begin\n\
             while i < 10 do i := i + 1;\n\
             repeat i := i - 1 until i = 0;\n\
             for k := 1 to 3 do j := j + k\n\
             end",
        );

        assert_eq!(labels(&asm), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn labels_are_unique() {
        let asm = compile(
            "begin\n\
             while i < 10 do begin\n\
               if i = 5 then j := i;\n\
               i := i + 1\n\
             end;\n\
             repeat i := i - 1 until i = 0;\n\
             for k := 1 to 3 do j := j + k\n\
             end",
        );

        let mut found = labels(&asm);
        found.sort_unstable();
        assert_eq!(found, (1..=found.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn generation_is_deterministic() {
        let source = "var p: ^integer;\nbegin new(p); p^ := 3; writeln(p^); dispose(p) end";
        let ast = parse::parse(&lex::scan(source)).unwrap();

        let first = generate(&ast).unwrap();
        assert_eq!(first, generate(&ast).unwrap());
        assert!(first.contains("extern malloc\nextern free\nextern printf\n"));
    }

    #[test]
    fn routines_follow_main() {
        let asm = compile(
            "function twice(x: integer): integer;\n\
             begin twice := x + x end;\n\
             begin y := twice(4) end",
        );

        let main = asm.find("main:").unwrap();
        let routine = asm.find("fn_twice:").unwrap();
        assert!(main < routine);
        assert!(asm.contains("    mov [x], rdi\n"));
        assert!(asm.contains("    call fn_twice\n"));
        assert!(asm.contains("    mov rax, [twice]\n"));
    }

    #[test]
    fn constants_are_substituted() {
        let asm = compile("const n = 7;\nbegin x := n end");
        assert!(asm.contains("    mov rax, 7\n"));
        assert!(!asm.contains("n:    resq"));
    }

    #[test]
    fn dynamic_index() {
        let asm = compile("var a: array[0..9] of integer;\nbegin a[i] := 5 end");
        assert!(asm.contains("    lea rax, [a]\n"));
        assert!(asm.contains("    imul rax, rax, 8\n"));
        assert!(!asm.contains("sub rax, 0"));
        assert!(asm.contains("    mov qword [rax], 5\n"));
    }

    #[test]
    fn with_resolves_fields() {
        let asm = compile(
            "type R = record x, y: integer end;\nvar r: R;\nbegin with r do y := 1 end",
        );

        assert!(asm.contains("    mov qword [r + 8], 1\n"));
        assert!(!asm.contains("y:    resq"));
    }

    #[test]
    fn case_arms() {
        let asm = compile("case k of 1, 2: x := 1; 3: x := 2 else x := 3 end");
        assert!(asm.contains("    cmp [rsp], rax\n"));
        assert!(asm.contains("    add rsp, 8\n"));

        // El final del `case` se reserva antes que los brazos
        assert_eq!(labels(&asm), [2, 3, 4, 1]);

        let asm = compile("case k of 1, 2: x := 1; 3: x := 2 end");
        assert_eq!(labels(&asm), [1, 2, 3]);
    }

    #[test]
    fn routine_declarations_stay_local() {
        let asm = compile(
            "var n: integer;\n\
             procedure p; const n = 5; begin end;\n\
             begin n := 1; writeln(n) end",
        );

        let main = &asm[..asm.find("fn_p:").unwrap()];
        assert!(main.contains("    mov rax, [n]\n"), "{}", asm);
        assert!(!main.contains("mov rax, 5"), "{}", asm);
    }

    #[test]
    fn variables_hide_outer_constants() {
        let asm = compile(
            "const n = 5;\n\
             procedure p; var n: integer; begin n := 2; writeln(n) end;\n\
             begin writeln(n) end",
        );

        let routine = &asm[asm.find("fn_p:").unwrap()..];
        assert!(routine.contains("    mov rax, [n]\n"), "{}", asm);
        assert!(asm[..asm.find("fn_p:").unwrap()].contains("    mov rax, 5\n"));
    }

    #[test]
    fn with_fields_hide_constants() {
        let asm = compile(
            "const y = 5;\ntype R = record x, y: integer end;\nvar r: R;\n\
             begin with r do writeln(y) end",
        );

        assert!(asm.contains("    mov rax, [r + 8]\n"), "{}", asm);
    }

    #[test]
    fn integer_literals_must_fit() {
        let ast = parse::parse(&lex::scan("x := 99999999999999999999")).unwrap();
        let error = generate(&ast).unwrap_err();
        assert!(matches!(error.val(), CodegenError::BadLiteral(value) if value == "99999999999999999999"));

        let asm = compile("x := 9223372036854775807");
        assert!(asm.contains("    mov rax, 9223372036854775807\n"));
    }

    #[test]
    fn reals_are_bit_patterns() {
        let asm = compile("x := 1.5");
        assert!(asm.contains(&format!("mov rax, 0x{:016x}", 1.5f64.to_bits())));
    }

    #[test]
    fn calls_are_aligned() {
        let asm = compile("begin writeln(1) end");
        assert!(asm.contains("    sub rsp, 8\n    call printf\n    add rsp, 8\n"));
    }

    #[test]
    fn invalid_ast() {
        let ast = Ast::new(None);
        let error = generate(&ast).unwrap_err();
        assert!(matches!(error.val(), CodegenError::InvalidAst));
    }

    #[test]
    fn encoding() {
        assert_eq!(encode("hello"), "'hello', 0");
        assert_eq!(encode(""), "0");
        assert_eq!(encode("%ld"), "'%ld', 0");
        assert_eq!(encode("\n"), "10, 0");
    }
}
