//! Rastreo de ubicaciones originales en código fuente.
//!
//! Los distintos objetos internos que el compilador construye
//! deben llevar cuenta de la posición en el código fuente original
//! donde comienzan, lo cual permite determinar un punto exacto en
//! donde ocurre un error de abstracción arbitraria.
//!
//! # Convención de posiciones
//! Las líneas se cuentan a partir de 1. Las columnas son el
//! desplazamiento en bytes, a partir de 0, desde el inicio del texto
//! escaneado (no desde el inicio de la línea). Esto permite que el
//! parser decida si dos tokens son adyacentes con una simple resta.

use std::{
    fmt::{self, Debug, Display, Formatter},
    io::{self, Read},
};

/// Un objeto cualquiera con una posición original asociada.
#[derive(Debug, Clone, PartialEq)]
pub struct Located<T> {
    position: Position,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Obtiene la posición.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Descarta la posición y toma ownership del valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Descompone y toma ownership de las dos partes.
    pub fn split(self) -> (Position, T) {
        (self.position, self.value)
    }

    /// Construye a partir de un valor y una posición.
    pub fn at(value: T, position: Position) -> Self {
        Located { value, position }
    }

    /// Transforma el valor con la misma posición.
    pub fn map<U, F>(self, map: F) -> Located<U>
    where
        F: FnOnce(T) -> U,
    {
        Located {
            value: map(self.value),
            position: self.position,
        }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

impl<T: Display> Display for Located<T> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} at {}", self.value, self.position)
    }
}

/// Una posición línea-columna en el texto fuente.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    /// Construye una posición.
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }

    /// Obtiene el número de línea.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Obtiene el desplazamiento desde el inicio del texto.
    pub fn column(&self) -> u32 {
        self.column
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

impl Debug for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

/// Texto fuente completo junto a su nombre de origen.
pub struct Source {
    name: String,
    text: String,
}

impl Source {
    /// Construye a partir de texto ya disponible en memoria.
    pub fn new<S: Into<String>, T: Into<String>>(name: S, text: T) -> Self {
        Source {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Lee completamente un flujo de entrada.
    pub fn read<R: Read, S: Into<String>>(mut reader: R, name: S) -> io::Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        Ok(Source::new(name, text))
    }

    /// Nombre de origen, usualmente una ruta.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Texto fuente.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Obtiene la línea en la que se encuentra una posición, junto
    /// con la columna relativa al inicio de esa línea.
    ///
    /// Si el desplazamiento no cae dentro de la línea indicada (por
    /// ejemplo, para la posición genérica `0:0`) la columna relativa
    /// es cero.
    pub fn line_at(&self, position: Position) -> Option<(&str, usize)> {
        let index = position.line().checked_sub(1)? as usize;

        let mut start = 0;
        for (number, line) in self.text.split('\n').enumerate() {
            if number == index {
                let offset = position.column() as usize;
                let relative = match offset.checked_sub(start) {
                    Some(relative) if relative <= line.len() => relative,
                    _ => 0,
                };

                return Some((line.trim_end_matches('\r'), relative));
            }

            start += line.len() + 1;
        }

        None
    }
}
