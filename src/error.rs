//! Reporte de errores al usuario.
//!
//! Cada fase del compilador produce sus propios tipos de error, pero
//! todos ellos viajan envueltos en [`Located`]. [`Diagnostics`] unifica
//! cualquiera de ellos para su impresión, opcionalmente mostrando la
//! línea original donde ocurrió el problema.

use crate::source::{Located, Position, Source};
use std::{
    error::Error,
    fmt::{self, Display},
    rc::Rc,
};

mod sealed {
    pub trait Sealed {}
}

pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &dyn Error;
    fn position(&self) -> Position;
}

pub struct Diagnostics {
    kind: &'static str,
    source: Option<Rc<Source>>,
    errors: Vec<Box<dyn 'static + LocatedError>>,
}

impl Diagnostics {
    pub fn kind(self, kind: &'static str) -> Self {
        Diagnostics { kind, ..self }
    }

    /// Asocia el texto fuente, lo cual habilita extractos de código.
    pub fn source(self, source: Rc<Source>) -> Self {
        Diagnostics {
            source: Some(source),
            ..self
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            kind: "error",
            source: None,
            errors: Default::default(),
        }
    }
}

impl<E: 'static + LocatedError> From<E> for Diagnostics {
    fn from(error: E) -> Self {
        Diagnostics {
            errors: vec![Box::new(error)],
            ..Default::default()
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics {
            kind,
            source,
            errors,
        } = self;

        if errors.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        for error in errors {
            let position = error.position();
            writeln!(fmt, "{}: {} at {}", kind, error.source(), position)?;

            let source = match source {
                Some(source) => source,
                None => continue,
            };

            writeln!(fmt, " --> {}:{}", source.name(), position)?;

            if let Some((line, column)) = source.line_at(position) {
                let digits = position.line().to_string().len();

                writeln!(fmt, "{:digits$} |", "", digits = digits)?;
                writeln!(fmt, "{:>digits$} | {}", position.line(), line, digits = digits)?;
                writeln!(
                    fmt,
                    "{:digits$} | {:skip$}^",
                    "",
                    "",
                    digits = digits,
                    skip = column
                )?;
            }

            writeln!(fmt)?;
        }

        Ok(())
    }
}

impl<E: Error> sealed::Sealed for Located<E> {}

impl<E: Error> LocatedError for Located<E> {
    fn source(&self) -> &dyn Error {
        self.as_ref()
    }

    fn position(&self) -> Position {
        Located::position(self)
    }
}
