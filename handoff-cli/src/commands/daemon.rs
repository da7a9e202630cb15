//! `handoff daemon`: foreground config watcher.

use anyhow::{Context, Result};
use clap::Subcommand;

use handoff_daemon::start_blocking;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Watch unit settings files and deliver config-changed events.
    Start,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home()?;
    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
    }
    Ok(())
}
