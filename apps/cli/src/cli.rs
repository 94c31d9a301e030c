//! Command-line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// MIPS-I assembler and simulator.
#[derive(Debug, Parser)]
#[command(name = "mipsim", version, about)]
pub struct Cli {
    /// Subcommand to perform.
    #[command(subcommand)]
    pub cmd: Command,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Assemble sources and report the image layout.
    Assemble(Assemble),
    /// Assemble, load, and execute sources.
    Run(Run),
}

/// Arguments for `assemble`.
#[derive(Args, Debug)]
pub struct Assemble {
    /// Assembly source files; later files link after earlier ones.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Reject pseudo-instructions.
    #[arg(long)]
    pub no_pseudo: bool,
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct Run {
    /// Assembly source files; later files link after earlier ones.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Stop after this many cycles.
    #[arg(long, value_name = "N")]
    pub max_cycles: Option<u64>,

    /// Execute on the five-stage pipeline (the default).
    #[arg(long, conflicts_with = "sequential")]
    pub pipeline: bool,

    /// Execute one instruction per step.
    #[arg(long)]
    pub sequential: bool,

    /// Reject pseudo-instructions.
    #[arg(long)]
    pub no_pseudo: bool,

    /// Model the branch delay slot (sequential mode).
    #[arg(long)]
    pub delayed_branching: bool,

    /// Disable pipeline forwarding.
    #[arg(long)]
    pub no_forwarding: bool,

    /// Queue text for the console input syscalls.
    #[arg(long, value_name = "TEXT")]
    pub stdin: Option<String>,

    /// Print performance counters after execution.
    #[arg(long)]
    pub stats: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from([
            "mipsim",
            "run",
            "prog.s",
            "--max-cycles",
            "1000",
            "--sequential",
            "--stdin",
            "42\n",
        ]);
        let Command::Run(run) = cli.cmd else {
            panic!("expected run");
        };
        assert_eq!(run.max_cycles, Some(1000));
        assert!(run.sequential);
        assert_eq!(run.stdin.as_deref(), Some("42\n"));
    }

    #[test]
    fn pipeline_and_sequential_conflict() {
        assert!(Cli::try_parse_from(["mipsim", "run", "p.s", "--pipeline", "--sequential"]).is_err());
    }
}
