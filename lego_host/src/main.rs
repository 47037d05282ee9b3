mod cli;
mod clock;
mod lua_vm;
mod memory;
mod report;
mod runtime;

use anyhow::Result;

fn main() -> Result<()> {
    let args = cli::parse()?;
    runtime::execute(args)
}
