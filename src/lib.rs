//! Compilador de un subconjunto de Pascal hacia ensamblador x86-64.
//!
//! # Front end
//! Cada programa deriva de un único archivo de código fuente, descrito
//! por [`source::Source`]. Este archivo se somete primero a análisis
//! léxico en [`lex`], de lo cual se obtiene un flujo de tokens. El flujo
//! de tokens se dispone en un AST ([`ast`]) por medio de análisis
//! sintáctico en [`parse`]. El árbol sintáctico es verificado por
//! [`semantic`] antes de continuar.
//!
//! # Back end
//! [`codegen`] recorre el árbol validado y emite un listado NASM para
//! x86-64 bajo la ABI System V. El ensamblado y enlazado del listado
//! se delegan a `nasm` y al enlazador del sistema, fuera de este crate.
//!
//! Los errores de todas las fases se unifican para su reporte en
//! [`error::Diagnostics`].

#[macro_use]
mod macros;

pub mod ast;
pub mod codegen;
pub mod error;
pub mod lex;
pub mod parse;
pub mod semantic;
pub mod source;

use ast::Ast;
use error::Diagnostics;
use lex::Token;
use source::{Located, Source};
use std::rc::Rc;

/// Análisis sintáctico de los tokens de un archivo fuente.
pub fn syntax(source: &Rc<Source>, tokens: &[Located<Token>]) -> Result<Ast, Diagnostics> {
    parse::parse(tokens)
        .map_err(|error| Diagnostics::from(error).kind("Syntax error").source(source.clone()))
}

/// Validación semántica de un árbol ya construido.
pub fn check(source: &Rc<Source>, ast: &Ast) -> Result<(), Diagnostics> {
    semantic::validate(ast).map_err(|error| {
        Diagnostics::from(error)
            .kind("Semantic error")
            .source(source.clone())
    })
}

/// Generación del listado a partir de un árbol validado.
pub fn emit(source: &Rc<Source>, ast: &Ast) -> Result<String, Diagnostics> {
    codegen::generate(ast)
        .map_err(|error| Diagnostics::from(error).kind("Codegen error").source(source.clone()))
}

/// Ejecuta todas las fases sobre un archivo fuente y produce el listado
/// ensamblador, o los diagnósticos de la primera fase que falle.
pub fn compile(source: Rc<Source>) -> Result<String, Diagnostics> {
    let tokens = lex::scan(source.text());
    let ast = syntax(&source, &tokens)?;

    check(&source, &ast)?;
    emit(&source, &ast)
}
