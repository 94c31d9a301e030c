#![warn(clippy::pedantic)]

use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::debug;
use mipsim::core::asm::link;
use mipsim::prelude::*;

use crate::cli::{Cli, Command};
use crate::err::Exit;

mod cli;
mod err;

fn main() -> Exit {
    // Initialize logging from the environment.
    env_logger::init();
    let args = Cli::parse();
    debug!("{args:?}");

    match args.cmd {
        Command::Assemble(cmd) => match assemble(&cmd.files, cmd.no_pseudo) {
            Ok(image) => {
                println!(
                    "text {:#010x}+{:#x} data {:#010x}+{:#x} symbols {}",
                    image.text_base,
                    4 * image.text.len(),
                    image.data_base,
                    image.data.len(),
                    image.symbols.len(),
                );
                Exit::Success
            }
            Err(err) => Exit::Assembly(err),
        },
        Command::Run(cmd) => run(&cmd),
    }
}

/// Reads, assembles, and links the given source files.
fn assemble(files: &[std::path::PathBuf], no_pseudo: bool) -> Result<BinaryImage> {
    let sources = read_all(files)?;
    // Every named file doubles as `.include` material for the others.
    let includes: HashMap<String, String> = sources
        .iter()
        .map(|(name, text)| (name.clone(), text.clone()))
        .collect();
    let assembler = Assembler::new(AsmOptions {
        pseudo: !no_pseudo,
        ..AsmOptions::default()
    });
    let mut images = Vec::with_capacity(sources.len());
    for (name, text) in &sources {
        let image = assembler
            .assemble_with(name, text, &includes)
            .with_context(|| format!("could not assemble `{name}`"))?;
        images.push(image);
    }
    link::link(&images).context("could not link")
}

fn read_all(files: &[std::path::PathBuf]) -> Result<Vec<(String, String)>> {
    files
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("could not read `{}`", path.display()))?;
            Ok((display_name(path), text))
        })
        .collect()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| {
            name.to_string_lossy().into_owned()
        })
}

fn run(cmd: &cli::Run) -> Exit {
    let image = match assemble(&cmd.files, cmd.no_pseudo) {
        Ok(image) => image,
        Err(err) => return Exit::Assembly(err),
    };

    let mut sim = Simulator::new();
    let mode = if cmd.pipeline || !cmd.sequential {
        Mode::Pipeline
    } else {
        Mode::Sequential
    };
    sim.set_mode(mode);
    sim.set_delayed_branching(cmd.delayed_branching);
    sim.set_forwarding(!cmd.no_forwarding);
    if let Err(err) = sim.load(image) {
        return Exit::Assembly(anyhow!(err).context("could not load image"));
    }
    if let Some(text) = &cmd.stdin {
        sim.feed_input(text);
    }
    // Stream console output as the program produces it.
    sim.terminal().borrow_mut().attach(Box::new(|byte| {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(&[byte]);
        let _ = out.flush();
    }));

    let status = sim.run(cmd.max_cycles);
    if cmd.stats {
        let counters = sim.get_performance_counters();
        eprintln!(
            "cycles {} instructions {} cpi {:.2} stalls {} flushes {}",
            counters.cycle_count,
            counters.instruction_count,
            counters.cpi(),
            counters.stall_count,
            counters.flush_count,
        );
    }
    match status {
        Status::Terminated => match sim.error() {
            Some(error) => Exit::Runtime(anyhow!("{error}")),
            None => Exit::Success,
        },
        // A bounded run that never terminated ran out of cycles.
        Status::Running => Exit::CycleLimit,
        Status::Halted | Status::Breakpoint => {
            Exit::Runtime(anyhow!("execution stopped at {:#010x}", sim.get_state().pc))
        }
    }
}
