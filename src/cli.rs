//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Policy-enforcing reverse proxy for agent access to data endpoints
#[derive(Parser, Debug)]
#[command(name = "armoriq-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "ARMORIQ_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "ARMORIQ_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "ARMORIQ_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "ARMORIQ_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "ARMORIQ_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default)
    Serve,

    /// Print an Argon2 hash of a shared secret for `endpoints[].api_key_hash`
    HashSecret {
        /// The plaintext shared secret
        #[arg(required = true)]
        secret: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_server_mode() {
        let cli = Cli::try_parse_from(["armoriq-proxy"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn parses_overrides_and_hash_secret() {
        let cli = Cli::try_parse_from([
            "armoriq-proxy",
            "--port",
            "9443",
            "--log-format",
            "json",
            "hash-secret",
            "s3cret",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(9443));
        assert_eq!(cli.log_format.as_deref(), Some("json"));
        match cli.command {
            Some(Command::HashSecret { secret }) => assert_eq!(secret, "s3cret"),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
