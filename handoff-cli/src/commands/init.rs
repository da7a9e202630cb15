//! `handoff init`: create a unit.

use anyhow::{bail, Context, Result};
use clap::Args;

use handoff_core::UnitName;
use handoff_daemon::{paths::unit_dir, UnitManifest};

use crate::WorkloadKindArg;

/// Arguments for `handoff init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Unit name, `<app>/<n>`.
    pub unit: String,

    /// Workload the unit runs: key-value-store or web-frontend.
    #[arg(long)]
    pub kind: WorkloadKindArg,

    /// Address the unit serves on. Without it, network.yaml is consulted.
    #[arg(long)]
    pub bind_address: Option<String>,

    /// Relation endpoint name.
    #[arg(long, default_value = "db")]
    pub endpoint: String,

    /// Initialize as a non-leader unit.
    #[arg(long)]
    pub follower: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        if !self.unit.contains('/') {
            bail!("unit name '{}' must look like <app>/<n>", self.unit);
        }
        let host = super::open_host()?;
        let name = UnitName::from(self.unit.as_str());

        let mut manifest = UnitManifest::new(name.clone(), self.kind.into());
        manifest.bind_address = self.bind_address;
        manifest.endpoint = self.endpoint;
        manifest.leader = !self.follower;
        host.init_unit(&manifest)
            .with_context(|| format!("failed to initialize '{name}'"))?;

        println!(
            "initialized {name} ({}) at {}",
            manifest.kind,
            unit_dir(host.home(), &name).display()
        );
        Ok(())
    }
}
