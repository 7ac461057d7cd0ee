use crate::ast::BinOp;
use std::fmt;

// Esta es una arquitectura de 64 bits
pub const VALUE_SIZE: i64 = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reg {
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
}

impl Reg {
    /* La ABI indica que se coloquen los primeros 6 argumentos en los registros %rdi, %rsi, %rdx, %rcx,
     * %r8 y %r9. Si hay más se ponen en el stack en orden inverso.
     */
    pub const MAX_ARGS: usize = 6;

    /// Acumulador, donde toda expresión deja su resultado.
    pub const ACCUMULATOR: Reg = Reg::Rax;

    /// Registro que recibe el operando izquierdo de una operación binaria.
    pub const SECONDARY: Reg = Reg::Rcx;

    pub fn argument_sequence() -> impl Iterator<Item = Reg> {
        use Reg::*;

        std::iter::successors(Some(Rdi), |last| match last {
            Rdi => Some(Rsi),
            Rsi => Some(Rdx),
            Rdx => Some(Rcx),
            Rcx => Some(R8),
            R8 => Some(R9),
            _ => None,
        })
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Reg::*;

        let name = match self {
            Rax => "rax",
            Rcx => "rcx",
            Rdx => "rdx",
            Rsi => "rsi",
            Rdi => "rdi",
            R8 => "r8",
            R9 => "r9",
        };

        formatter.write_str(name)
    }
}

/// Cantidad de celdas de relleno necesarias antes de un `call`.
///
/// Al entrar a cualquier rutina `rsp` está a 8 bytes de una frontera de
/// 16, por lo que la pila queda alineada solo si la cantidad total de
/// celdas empujadas es impar.
pub fn padding_for(pushed: usize) -> usize {
    (pushed + 1) % 2
}

/// Instrucción `setcc` que materializa una comparación.
pub fn set_condition(op: BinOp) -> Option<&'static str> {
    use BinOp::*;

    let opcode = match op {
        Equal => "sete",
        NotEqual => "setne",
        Less => "setl",
        LessOrEqual => "setle",
        Greater => "setg",
        GreaterOrEqual => "setge",
        _ => return None,
    };

    Some(opcode)
}

/// Salto que se toma cuando la comparación resulta falsa.
pub fn inverse_jump(op: BinOp) -> Option<&'static str> {
    use BinOp::*;

    let opcode = match op {
        Equal => "jne",
        NotEqual => "je",
        Less => "jge",
        LessOrEqual => "jg",
        Greater => "jle",
        GreaterOrEqual => "jl",
        _ => return None,
    };

    Some(opcode)
}
