use crate::config::HostConfig;
use crate::prelude::*;
use clap::{Args, Subcommand};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration as YAML
    Show,
    /// Write the effective configuration to the configuration file, filling in every default
    Init,
}

pub fn run(args: ConfigArgs, config: &HostConfig, config_name: Option<&str>) -> Result<()> {
    match args.command {
        ConfigCommands::Show => {
            print!("{}", serde_yaml::to_string(config)?);
        }
        ConfigCommands::Init => {
            config.persist(config_name)?;
            info!("Configuration written");
        }
    }
    Ok(())
}
