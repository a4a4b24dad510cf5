// SPDX-License-Identifier: GPL-3.0-or-later

//! Configuration surface: CLI flags, the YAML config file they point at,
//! and logger setup driven by it.

pub mod cli;
pub mod config;
pub mod logger;

pub use cli::Cli;
pub use config::{Config, ConfigError};
