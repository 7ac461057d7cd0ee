//! Disposición de variables en memoria.
//!
//! Toda variable escalar ocupa una celda de [`VALUE_SIZE`] bytes. Los
//! arreglos y registros se direccionan a partir de la celda base de su
//! variable: los índices constantes y los campos se pliegan a un
//! desplazamiento, mientras que los índices dinámicos y las
//! desreferencias producen pasos que se evalúan en tiempo de ejecución.

use super::x86_64::VALUE_SIZE;
use crate::{ast::*, source::Located};
use std::collections::HashMap;

/// Cota inferior supuesta cuando el tipo de un arreglo es desconocido.
pub const DEFAULT_LOW: i64 = 1;

// Límite para cadenas de alias entre declaraciones `type`
const MAX_ALIAS_DEPTH: usize = 32;

/// Un paso en el cálculo de una dirección.
#[derive(Debug)]
pub enum Step<'a> {
    Offset(i64),
    Index { index: &'a Located<Expr>, low: i64 },
    Deref,
}

/// Acceso a variable resuelto a una celda base y sus pasos.
#[derive(Debug)]
pub struct Resolved<'a> {
    pub base: &'a str,
    pub steps: Vec<Step<'a>>,
    pub typ: Option<&'a TypeSpec>,
}

#[derive(Clone, Default)]
pub struct Layout<'a> {
    types: HashMap<&'a str, &'a TypeSpec>,
    variables: HashMap<&'a str, &'a TypeSpec>,
}

impl<'a> Layout<'a> {
    pub fn declare_type(&mut self, name: &'a str, typ: &'a TypeSpec) {
        self.types.insert(name, typ);
    }

    pub fn declare_variable(&mut self, name: &'a str, typ: Option<&'a TypeSpec>) {
        match typ {
            Some(typ) => self.variables.insert(name, typ),
            None => self.variables.remove(name),
        };
    }

    /// Resuelve un acceso. Un nombre que es campo de alguno de los
    /// registros abiertos por `with` se refiere a ese campo, aunque exista
    /// una variable homónima; los registros se buscan del más interno al
    /// más externo.
    pub fn resolve(&self, variable: &'a VariableExpr, withs: &[&'a VariableExpr]) -> Resolved<'a> {
        for record in withs.iter().rev() {
            let mut resolved = self.resolve(record, &[]);
            let field = resolved.typ.and_then(|typ| self.field(typ, &variable.name));

            if let Some((offset, typ)) = field {
                resolved.steps.push(Step::Offset(offset));
                resolved.typ = self.walk(&variable.selectors, typ, &mut resolved.steps);
                return resolved;
            }
        }

        let typ = self.variables.get(variable.name.as_str()).copied();
        let mut steps = Vec::new();
        let typ = self.walk(&variable.selectors, typ, &mut steps);

        Resolved {
            base: &variable.name,
            steps,
            typ,
        }
    }

    /// Determina si un nombre simple es campo de algún registro abierto.
    pub fn is_open_field(&self, name: &str, withs: &[&'a VariableExpr]) -> bool {
        withs.iter().any(|record| {
            let typ = self.resolve(record, &[]).typ;
            typ.and_then(|typ| self.field(typ, name)).is_some()
        })
    }

    /// Cantidad de celdas que ocupa un valor del tipo dado.
    pub fn cells(&self, typ: Option<&'a TypeSpec>) -> i64 {
        match typ.map(|typ| self.resolve_type(typ)) {
            Some(TypeSpec::Record { fields }) => {
                let count: usize = fields.iter().map(|field| field.val().names.len()).sum();
                count.max(1) as i64
            }

            _ => 1,
        }
    }

    /// Tipo referido por un puntero.
    pub fn pointee(&self, typ: Option<&'a TypeSpec>) -> Option<&'a TypeSpec> {
        match typ.map(|typ| self.resolve_type(typ)) {
            Some(TypeSpec::Pointer(Some(referenced))) => Some(self.resolve_type(referenced.val())),
            _ => None,
        }
    }

    fn resolve_type(&self, mut typ: &'a TypeSpec) -> &'a TypeSpec {
        for _ in 0..MAX_ALIAS_DEPTH {
            match typ {
                TypeSpec::Simple { name, .. } => match self.types.get(name.as_str()) {
                    Some(alias) => typ = alias,
                    None => break,
                },

                _ => break,
            }
        }

        typ
    }

    fn walk(
        &self,
        selectors: &'a [Selector],
        typ: Option<&'a TypeSpec>,
        steps: &mut Vec<Step<'a>>,
    ) -> Option<&'a TypeSpec> {
        let mut typ = typ.map(|typ| self.resolve_type(typ));
        let mut dimension = 0;

        for selector in selectors {
            match selector {
                Selector::Index(index) => {
                    let (low, next) = match typ {
                        Some(TypeSpec::Array { ranges, element }) => {
                            let low = ranges.get(dimension).map_or(DEFAULT_LOW, |range| range.start);

                            dimension += 1;
                            if dimension >= ranges.len() {
                                dimension = 0;
                                (low, element.as_deref().map(Located::val))
                            } else {
                                (low, typ)
                            }
                        }

                        _ => (DEFAULT_LOW, None),
                    };

                    steps.push(match integer_constant(index) {
                        Some(value) => Step::Offset((value - low) * VALUE_SIZE),
                        None => Step::Index { index, low },
                    });

                    typ = next.map(|typ| self.resolve_type(typ));
                }

                Selector::Field(name) => {
                    dimension = 0;

                    let (offset, next) = typ
                        .and_then(|typ| self.field(typ, name))
                        .unwrap_or((0, None));

                    steps.push(Step::Offset(offset));
                    typ = next;
                }

                Selector::Pointer => {
                    dimension = 0;
                    steps.push(Step::Deref);
                    typ = self.pointee(typ);
                }
            }
        }

        typ
    }

    fn field(&self, typ: &'a TypeSpec, name: &str) -> Option<(i64, Option<&'a TypeSpec>)> {
        let fields = match self.resolve_type(typ) {
            TypeSpec::Record { fields } => fields,
            _ => return None,
        };

        fields
            .iter()
            .flat_map(|field| {
                let field = field.val();
                let typ = field.typ.as_ref().map(Located::val);
                field.names.iter().map(move |name| (name, typ))
            })
            .enumerate()
            .find(|(_, (field, _))| *field == name)
            .map(|(ordinal, (_, typ))| {
                let typ = typ.map(|typ| self.resolve_type(typ));
                (ordinal as i64 * VALUE_SIZE, typ)
            })
    }
}

/// Valor de una expresión entera constante, `N` o `-N`.
pub fn integer_constant(expr: &Located<Expr>) -> Option<i64> {
    match expr.val() {
        Expr::Literal(literal) if literal.kind() == LiteralKind::Integer => {
            literal.value.parse().ok()
        }

        Expr::Unary {
            op: UnOp::Negate,
            operand: Some(operand),
        } => integer_constant(operand).and_then(i64::checked_neg),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex, parse, source::Position};

    fn declarations(source: &str) -> Ast {
        parse::parse(&lex::scan(source)).expect("parse failed")
    }

    fn layout(ast: &Ast) -> Layout<'_> {
        let mut layout = Layout::default();
        let program = ast.program().expect("no program");

        for declaration in &program.val().block.declarations {
            match declaration.val() {
                Declaration::Type(TypeDecl {
                    name,
                    typ: Some(typ),
                }) => layout.declare_type(name, typ.val()),

                Declaration::Var(VarDecl { names, typ }) => {
                    for name in names {
                        layout.declare_variable(name, typ.as_ref().map(Located::val));
                    }
                }

                _ => (),
            }
        }

        layout
    }

    fn access(name: &str, selectors: Vec<Selector>) -> VariableExpr {
        VariableExpr {
            name: name.into(),
            selectors,
        }
    }

    fn index(value: &str) -> Selector {
        Selector::Index(Located::at(
            Expr::Literal(Literal::new(value)),
            Position::default(),
        ))
    }

    fn offsets(resolved: &Resolved) -> Vec<i64> {
        resolved
            .steps
            .iter()
            .map(|step| match step {
                Step::Offset(offset) => *offset,
                _ => -1,
            })
            .collect()
    }

    #[test]
    fn constant_indices_fold() {
        let ast = declarations("var a: array[0..9] of integer; m: array[1..3, 1..3] of integer;");
        let layout = layout(&ast);

        let first = access("a", vec![index("2")]);
        assert_eq!(offsets(&layout.resolve(&first, &[])), [16]);

        let matrix = access("m", vec![index("2"), index("3")]);
        assert_eq!(offsets(&layout.resolve(&matrix, &[])), [8, 16]);
    }

    #[test]
    fn unknown_arrays_start_at_one() {
        let ast = declarations("var n: integer;");
        let layout = layout(&ast);

        let unknown = access("a", vec![index("1")]);
        let resolved = layout.resolve(&unknown, &[]);

        assert_eq!(resolved.base, "a");
        assert_eq!(offsets(&resolved), [0]);
    }

    #[test]
    fn record_fields() {
        let ast = declarations(
            "type R = record x, y: integer; z: real end; P = ^R;\nvar r: R; p: P;",
        );
        let layout = layout(&ast);

        let field = access("r", vec![Selector::Field("z".into())]);
        let resolved = layout.resolve(&field, &[]);
        assert_eq!(offsets(&resolved), [16]);
        assert!(matches!(
            resolved.typ,
            Some(TypeSpec::Simple {
                basic: BasicType::Real,
                ..
            })
        ));

        let through = access("p", vec![Selector::Pointer, Selector::Field("y".into())]);
        let resolved = layout.resolve(&through, &[]);
        assert!(matches!(resolved.steps[0], Step::Deref));
        assert!(matches!(resolved.steps[1], Step::Offset(8)));

        let p = access("p", vec![]);
        let pointee = layout.pointee(layout.resolve(&p, &[]).typ);
        assert_eq!(layout.cells(pointee), 3);
    }

    #[test]
    fn with_fields() {
        let ast = declarations("type R = record x, y: integer end;\nvar r: R;");
        let layout = layout(&ast);

        let record = access("r", vec![]);
        let bare = access("y", vec![]);

        let resolved = layout.resolve(&bare, &[&record]);
        assert_eq!(resolved.base, "r");
        assert_eq!(offsets(&resolved), [8]);

        let unrelated = access("k", vec![]);
        assert_eq!(layout.resolve(&unrelated, &[&record]).base, "k");
    }

    #[test]
    fn with_fields_hide_variables() {
        let ast = declarations("type R = record x, y: integer end;\nvar r: R; y: integer;");
        let layout = layout(&ast);

        let record = access("r", vec![]);
        let bare = access("y", vec![]);

        let resolved = layout.resolve(&bare, &[&record]);
        assert_eq!(resolved.base, "r");
        assert_eq!(offsets(&resolved), [8]);

        assert_eq!(layout.resolve(&bare, &[]).base, "y");
    }

    #[test]
    fn negative_constants() {
        let negative = Located::at(
            Expr::Unary {
                op: UnOp::Negate,
                operand: Some(Box::new(Located::at(
                    Expr::Literal(Literal::new("3")),
                    Position::default(),
                ))),
            },
            Position::default(),
        );

        assert_eq!(integer_constant(&negative), Some(-3));
    }
}
