use pascalc::{lex, source::Source};
use std::rc::Rc;

fn main() {
    let stdin = std::io::stdin();
    let stdin = stdin.lock();

    let source = match Source::read(stdin, "<stdin>") {
        Ok(source) => Rc::new(source),
        Err(error) => {
            eprintln!("Failed to read stdin: {}", error);
            return;
        }
    };

    let tokens = lex::scan(source.text());
    print!("Tokens: {:#?}\n\n", tokens);

    let result = pascalc::syntax(&source, &tokens).and_then(|ast| {
        print!("Ast: {:#?}\n\n", ast);

        pascalc::check(&source, &ast)?;
        pascalc::emit(&source, &ast)
    });

    match result {
        Ok(asm) => print!("Assembly:\n{}", asm),
        Err(diagnostics) => eprint!("{}", diagnostics),
    }
}
