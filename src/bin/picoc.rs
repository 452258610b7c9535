//! the main compiler binary. takes a source file and an output path, and
//! writes the requested compilation stage (final assembly by default).
//!
//! run with `--help` for more info.

use pico::{
    common::Error,
    front::lex,
    front::parse,
    pipeline::Pipeline,
};

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// the output file
    out: String,
    /// the stage to emit
    #[arg(value_enum, short, long, default_value_t = Emit::Asm)]
    emit: Emit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Emit {
    /// the list of tokens
    Tokens,
    /// the ast data structure
    Ast,
    /// the ast after uniquify
    Uniq,
    /// the flat three-address form
    Flat,
    /// virtual-register x86
    Virt,
    /// x86 after register allocation
    Mem,
    /// the resulting assembly code
    Asm,
}

fn main() {
    if let Err(e) = run(&Args::parse()) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let input = std::fs::read_to_string(&args.file)?;

    let text = match args.emit {
        Emit::Tokens => {
            let mut lexer = lex::Lexer::new(&input);
            let mut out = String::new();
            while let Some(token) = lexer.next().map_err(|e| Error::Lex(e.to_string()))? {
                out.push_str(&token.to_string());
                out.push('\n');
            }
            out
        }
        Emit::Ast => {
            let program = parse(&input).map_err(|e| Error::Parse(e.to_string()))?;
            program.to_string()
        }
        stage => {
            let program = parse(&input).map_err(|e| Error::Parse(e.to_string()))?;
            let (stages, error) = Pipeline::run(program);
            let text = match stage {
                Emit::Uniq => stages.uniq.map(|p| p.to_string()),
                Emit::Flat => stages.flat.map(|p| p.to_string()),
                Emit::Virt => stages.virt.map(|p| p.to_string()),
                Emit::Mem => stages.mem.map(|p| p.to_string()),
                _ => stages.patched.map(|p| p.to_string()),
            };
            match (text, error) {
                (Some(text), _) => text,
                (None, Some(e)) => return Err(e.into()),
                (None, None) => return Err(Error::IllFormed("pipeline stopped early".into()).into()),
            }
        }
    };

    std::fs::write(&args.out, text)?;
    Ok(())
}
