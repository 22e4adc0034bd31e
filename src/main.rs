mod cli;

use clap::{Parser, Subcommand};

use cli::assemble::AssembleArgs;

#[derive(Parser)]
#[command(
    name = "bass",
    version,
    about = "Table-driven multi-pass macro assembler"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble into a new target file (created or truncated)
    Create(AssembleArgs),
    /// Assemble into an existing target file without truncation (ROM patching)
    Modify(AssembleArgs),
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Create(args) => cli::assemble::cmd_assemble(args, true),
        Command::Modify(args) => cli::assemble::cmd_assemble(args, false),
    }
}
