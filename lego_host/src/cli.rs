use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "Runs a LeGo script program on the embedded Lua VM and drives its frame functions",
    version
)]
pub struct Args {
    /// Lua script files forming the program, loaded in order
    #[arg(long = "script", value_name = "PATH", required = true)]
    pub scripts: Vec<PathBuf>,

    /// Script functions to call once the layers are active (e.g. LeGo_Init)
    #[arg(long = "call", value_name = "NAME")]
    pub calls: Vec<String>,

    /// Number of host frames to run
    #[arg(long, default_value_t = 60)]
    pub frames: u64,

    /// Ticks the world clock advances per frame
    #[arg(long, default_value_t = 1)]
    pub tick_step: u64,

    /// Tick count of the world clock before the first frame
    #[arg(long, default_value_t = 0)]
    pub start_tick: u64,

    /// Optional JSON file with LeGo layer settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Path to write the run report as JSON
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Log scheduler bookkeeping and override installation
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug)]
pub struct RunArgs {
    pub scripts: Vec<PathBuf>,
    pub calls: Vec<String>,
    pub frames: u64,
    pub tick_step: u64,
    pub start_tick: u64,
    pub config: Option<PathBuf>,
    pub report_json: Option<PathBuf>,
    pub verbose: bool,
}

pub fn parse() -> Result<RunArgs> {
    let args = Args::parse();
    args.into_run_args()
}

impl Args {
    fn into_run_args(self) -> Result<RunArgs> {
        if self.tick_step == 0 {
            bail!("--tick-step must be at least 1; the world clock never runs backwards or stalls");
        }
        if let Some(missing) = self.scripts.iter().find(|path| !path.is_file()) {
            bail!("script {} does not exist", missing.display());
        }

        Ok(RunArgs {
            scripts: self.scripts,
            calls: self.calls,
            frames: self.frames,
            tick_step: self.tick_step,
            start_tick: self.start_tick,
            config: self.config,
            report_json: self.report_json,
            verbose: self.verbose,
        })
    }
}
