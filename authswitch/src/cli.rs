use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "authswitch",
    version,
    about = "Switch the signed-in account of the Antigravity editor",
    long_about = None
)]
pub struct Args {
    /// Configuration file (default: <config dir>/authswitch/config.toml)
    #[arg(short, long, global = true, env = "AUTHSWITCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List stored accounts
    List,

    /// Show the current account, its quota and any pending switch
    Status,

    /// Switch to an account by id or email
    Switch {
        /// Account id or email
        target: String,
    },

    /// Show the best account by remaining quota
    Best {
        /// Switch to it if it is not already current
        #[arg(long)]
        switch: bool,
    },

    /// Report what startup recovery did with a pending switch
    Recover,

    /// Show the credentials currently stored in the host's state database
    Inspect,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    Pretty,
    /// Pretty-printed JSON
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_switch() {
        let args = Args::parse_from(["authswitch", "-v", "switch", "a@example.com", "-o", "json"]);
        assert!(args.verbose);
        assert_eq!(args.output, OutputFormat::Json);
        assert!(matches!(args.command, Commands::Switch { target } if target == "a@example.com"));
    }

    #[test]
    fn test_parse_best() {
        let args = Args::parse_from(["authswitch", "best", "--switch"]);
        assert!(matches!(args.command, Commands::Best { switch: true }));
    }
}
