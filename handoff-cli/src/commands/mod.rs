pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod init;
pub mod plan;
pub mod relate;
pub mod status;
pub mod supervisor;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use handoff_daemon::{Delivery, Host};

pub fn home() -> Result<PathBuf> {
    handoff_core::config::home().context("could not determine home directory")
}

pub fn open_host() -> Result<Host> {
    let home = home()?;
    Host::open(&home).context("failed to load workload templates")
}

/// Print one line per delivered event; fail if any event failed.
pub fn report_deliveries(deliveries: &[Delivery]) -> Result<()> {
    for delivery in deliveries {
        match &delivery.outcome {
            Ok(report) => {
                let mut line = format!("{} {} -> {}", delivery.unit, delivery.event, report.status);
                let restarted = report.restarted();
                if !restarted.is_empty() {
                    line.push_str(&format!(" (restarted: {})", restarted.join(", ")));
                }
                if report.pending > 0 {
                    line.push_str(&format!(" [{} deferred]", report.pending));
                }
                println!("{} {line}", "ok".green());
            }
            Err(err) => {
                println!(
                    "{} {} {}: {err}",
                    "failed".red(),
                    delivery.unit,
                    delivery.event
                );
            }
        }
    }

    let failed = deliveries.iter().filter(|d| !d.is_ok()).count();
    if failed > 0 {
        bail!("{failed} of {} event(s) failed", deliveries.len());
    }
    Ok(())
}
