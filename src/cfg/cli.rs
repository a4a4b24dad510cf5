// SPDX-License-Identifier: GPL-3.0-or-later

//! Command-line surface: just enough to point at a config file and to
//! override the handful of flags an operator most commonly wants to flip
//! without editing YAML (foreground vs. daemonized, listen address).

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

use super::config::Config;

#[derive(Debug, Parser)]
#[command(name = "l4proxyd", about = "Transparent layer-4 TCP proxy")]
pub struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long, default_value = "/etc/l4proxy/l4proxy.yaml")]
    pub config: PathBuf,

    /// Overrides `listen` from the config file.
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Stay in the foreground even if the config file requests
    /// daemonization.
    #[arg(short, long)]
    pub foreground: bool,
}

impl Cli {
    /// Loads the config file named on the command line, then applies any
    /// CLI overrides on top of it.
    pub fn load_config(&self) -> Result<Config, super::config::ConfigError> {
        let mut config = Config::load(&self.config)?;
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if self.foreground {
            config.daemon.daemonize = false;
        }
        Ok(config)
    }
}
