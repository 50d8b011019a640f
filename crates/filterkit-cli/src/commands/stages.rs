//! Stage type listing command

use super::discovery::DiscoveryArgs;
use anyhow::Result;
use clap::Args;
use filterkit_core::HostConfig;

#[derive(Args)]
pub struct StagesCommand {
    #[command(flatten)]
    discovery: DiscoveryArgs,

    /// Only list types offering this capability (e.g. "stage-list-provider")
    #[arg(long)]
    capability: Option<String>,
}

impl StagesCommand {
    pub async fn execute(self, mut config: HostConfig) -> Result<()> {
        self.discovery.apply(&mut config);
        let registry = self.discovery.build_registry(&config)?;

        println!("Available stage types:");
        for descriptor in registry.iter() {
            if let Some(capability) = &self.capability {
                if !descriptor.implements(capability) {
                    continue;
                }
            }
            println!("\n{}", descriptor.name);
            if !descriptor.description.is_empty() {
                println!("  Description: {}", descriptor.description);
            }
            println!("  Capabilities: {}", descriptor.capabilities.join(", "));
            println!(
                "  Default constructible: {}",
                descriptor.default_constructible
            );
            if !descriptor.constructor_args.is_empty() {
                println!(
                    "  Constructor args: {}",
                    descriptor.constructor_args.join(", ")
                );
            }
            println!("  Fingerprint: {}", descriptor.fingerprint);
        }

        Ok(())
    }
}
