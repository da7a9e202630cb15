//! `handoff config`: show or change a unit's configuration.

use anyhow::{Context, Result};
use clap::Args;

use handoff_core::{config, UnitName};
use handoff_daemon::paths::config_path;

/// Arguments for `handoff config`.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    pub unit: String,

    /// Option to set, e.g. `port`, `appendonly`, `requirepass`, `webserver-key`.
    #[arg(requires = "value")]
    pub option: Option<String>,

    pub value: Option<String>,
}

impl ConfigArgs {
    pub fn run(self) -> Result<()> {
        let host = super::open_host()?;
        let name = UnitName::from(self.unit.as_str());

        let (Some(option), Some(value)) = (self.option, self.value) else {
            let manifest = host.unit(&name)?;
            let current = config::load_at(&config_path(host.home(), &name), manifest.kind)
                .with_context(|| format!("failed to load config of '{name}'"))?;
            print!("{}", current.to_yaml().context("failed to render config")?);
            return Ok(());
        };

        let deliveries = host
            .set_config(&name, &option, &value)
            .with_context(|| format!("failed to set '{option}' on '{name}'"))?;
        super::report_deliveries(&deliveries)
    }
}
