macro_rules! emit {
    ($context:expr, $opcode:expr) => {
        writeln!($context.output(), "    {}", $opcode)
    };

    ($context:expr, $opcode:expr, $($format:tt)*) => {{
        write!($context.output(), "    {} ", $opcode)?;
        writeln!($context.output(), $($format)*)
    }};
}
