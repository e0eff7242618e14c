//! CLI command implementations

pub mod gate;
pub mod ops;
pub mod run;

use clap::Args;
use gantry_types::RunId;

/// Identifies the run a command acts on
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Run ID, `<category>-<YYYYMMDD>`
    #[arg(long)]
    pub run_id: String,
}

impl RunArgs {
    pub fn run_id(&self) -> RunId {
        RunId::new(self.run_id.trim())
    }
}
