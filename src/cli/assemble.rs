use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::Args;

use bass::Assembler;

#[derive(Args)]
pub struct AssembleArgs {
    /// Source files, assembled in order into one program
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,
    /// Output target file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Pre-seed a define
    #[arg(short = 'd', long = "define", value_name = "NAME[=VALUE]")]
    pub defines: Vec<String>,
    /// Pre-seed a constant (default value 1)
    #[arg(short = 'c', long = "constant", value_name = "NAME[=VALUE]")]
    pub constants: Vec<String>,
    /// Upgrade warnings to errors
    #[arg(long)]
    pub strict: bool,
    /// Print elapsed wall time to stderr
    #[arg(long)]
    pub benchmark: bool,
}

pub fn cmd_assemble(args: AssembleArgs, create: bool) {
    let start = Instant::now();
    let mut asm = Assembler::new();

    if let Some(output) = &args.output {
        if let Err(e) = asm.target(output, create) {
            eprintln!("{e}");
            process::exit(1);
        }
    }
    for source in &args.sources {
        if let Err(e) = asm.source(source) {
            eprintln!("{e}");
            process::exit(1);
        }
    }
    for define in &args.defines {
        let (name, value) = split_seed(define, "");
        asm.define(name, value);
    }
    for constant in &args.constants {
        let (name, value) = split_seed(constant, "1");
        asm.constant(name, value);
    }

    if let Err(e) = asm.assemble(args.strict) {
        match e.file.as_deref().and_then(|f| asm.source_text(f)) {
            Some(source) => e.render(source),
            None => eprintln!("{e}"),
        }
        eprintln!("bass: assembly failed");
        process::exit(1);
    }

    if args.benchmark {
        eprintln!(
            "bass: assembled in {:.3} seconds",
            start.elapsed().as_secs_f64()
        );
    }
}

/// Split `name[=value]`, falling back to `default` when no value given.
fn split_seed<'a>(seed: &'a str, default: &'a str) -> (&'a str, &'a str) {
    match seed.split_once('=') {
        Some((name, value)) => (name, value),
        None => (seed, default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_seed() {
        assert_eq!(split_seed("x=10", "1"), ("x", "10"));
        assert_eq!(split_seed("x", "1"), ("x", "1"));
        assert_eq!(split_seed("x=", "1"), ("x", ""));
    }
}
