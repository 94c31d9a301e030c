//! Process exit status.

use std::process::{ExitCode, Termination};

/// Final status of a `mipsim` invocation.
#[derive(Debug)]
pub enum Exit {
    /// Normal termination.
    Success,
    /// Sources failed to assemble or link.
    Assembly(anyhow::Error),
    /// Execution ended on a runtime fault.
    Runtime(anyhow::Error),
    /// The cycle bound was exhausted before termination.
    CycleLimit,
}

impl Termination for Exit {
    fn report(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::from(0),
            Self::Assembly(err) => {
                eprintln!("error: {err:#}");
                ExitCode::from(1)
            }
            Self::Runtime(err) => {
                eprintln!("error: {err:#}");
                ExitCode::from(2)
            }
            Self::CycleLimit => {
                eprintln!("error: cycle limit exceeded");
                ExitCode::from(3)
            }
        }
    }
}
