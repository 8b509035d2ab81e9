// SPDX-License-Identifier: GPL-3.0-only
//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::apply::{MAX_LEVEL, Targets};
use crate::config::{Config, Mode};

/// Command-line interface for the `easy-brightness` binary
#[derive(Parser, Debug)]
#[command(
    name = "easy-brightness",
    about = "Apply brightness, contrast and blue level to external monitors",
    version
)]
pub struct Cli {
    /// Settings file instead of `$XDG_CONFIG_HOME/easy-brightness/config.json`
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Helper binary instead of the one named in the settings
    #[arg(long, global = true, value_name = "PATH")]
    pub helper: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the displays reported by the helper
    Detect,
    /// Apply one set of values once and print the per-display results
    Apply(ApplyArgs),
    /// Stay running, apply the saved mode and serve requests
    Daemon,
}

/// Arguments for the `apply` subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct ApplyArgs {
    /// Mode whose saved values are applied; defaults to the active mode
    #[arg(long, value_name = "MODE")]
    pub mode: Option<Mode>,

    /// Override the brightness percentage
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=MAX_LEVEL as i64))]
    pub brightness: Option<u8>,

    /// Override the contrast percentage
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=MAX_LEVEL as i64))]
    pub contrast: Option<u8>,

    /// Override the blue level percentage
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=MAX_LEVEL as i64))]
    pub blue: Option<u8>,
}

impl ApplyArgs {
    /// Saved values for the selected mode with any overrides on top
    pub fn resolve(&self, config: &Config) -> Targets {
        let base = config.targets(self.mode.unwrap_or(config.mode));
        Targets::new(
            self.brightness.unwrap_or(base.brightness),
            self.contrast.unwrap_or(base.contrast),
            self.blue.unwrap_or(base.blue),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_arguments() {
        let cli = Cli::try_parse_from([
            "easy-brightness",
            "apply",
            "--mode",
            "night",
            "--blue",
            "5",
            "--helper",
            "/opt/helper",
        ])
        .unwrap();

        assert_eq!(cli.helper, Some(PathBuf::from("/opt/helper")));
        let Commands::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        let night = Config::default().night;
        assert_eq!(
            args.resolve(&Config::default()),
            Targets::new(night.brightness, night.contrast, 5)
        );
    }

    #[test]
    fn test_apply_defaults_to_active_mode() {
        let config = Config {
            mode: Mode::Custom,
            ..Config::default()
        };
        assert_eq!(ApplyArgs::default().resolve(&config), config.custom);
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(Cli::try_parse_from(["easy-brightness", "apply", "--contrast", "101"]).is_err());
        assert!(Cli::try_parse_from(["easy-brightness", "apply", "--mode", "dusk"]).is_err());
    }
}
