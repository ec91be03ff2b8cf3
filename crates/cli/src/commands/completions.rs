//! completions command - Print a shell completion script

use clap::{Args, CommandFactory};
use clap_complete::Shell;

use crate::Cli;
use crate::exit_code::ExitCode;

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Write the completion script for `args.shell` to stdout
pub fn execute(args: CompletionsArgs) -> ExitCode {
    let mut command = Cli::command();
    clap_complete::generate(args.shell, &mut command, "nb", &mut std::io::stdout());
    ExitCode::Success
}
