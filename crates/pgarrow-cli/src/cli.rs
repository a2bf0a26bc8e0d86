use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pgarrow_config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "pgarrow")]
#[command(about = "Stream Postgres logical replication through a message channel and replay it as SQL")]
#[command(version)]
pub struct Cli {
    /// Path to the pgarrow.toml config file
    #[arg(short, long, global = true, env = "PGARROW_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Environment to load (loads .env.{ENV} instead of .env)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture changes from the source database and publish them to the channel
    Publish,

    /// Consume records from the channel and apply them to the target database
    Replay,

    /// Publish and replay in one process, from the configured database into TARGET
    Mirror {
        /// Connection string of the database to apply changes to
        #[arg(long, env = "PGARROW_TARGET_DSN")]
        target: String,
    },

    /// Show replication slot, publication and channel settings
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from(["pgarrow", "replay", "--debug", "-c", "other.toml"]).unwrap();
        assert!(cli.debug);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(matches!(cli.command, Commands::Replay));
    }

    #[test]
    fn test_mirror_requires_target() {
        std::env::remove_var("PGARROW_TARGET_DSN");
        assert!(Cli::try_parse_from(["pgarrow", "mirror"]).is_err());
        let cli = Cli::try_parse_from(["pgarrow", "mirror", "--target", "host=replica"]).unwrap();
        assert!(matches!(cli.command, Commands::Mirror { target } if target == "host=replica"));
    }
}
