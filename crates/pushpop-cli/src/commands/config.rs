//! Config command implementation.

use anyhow::{Context, Result};

use pushpop_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = super::load_config();
            let rendered = config
                .to_toml()
                .context("Failed to render configuration")?;
            println!("# {}", Config::config_path().display());
            print!("{}", rendered);
        }
        ConfigAction::Path => println!("{}", Config::config_path().display()),
    }
    Ok(())
}
