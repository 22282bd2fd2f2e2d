use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::bus::ModuleType;

/// Eventgate CLI - authenticated event bus with multi-engine persistence
#[derive(Parser, Debug)]
#[command(name = "eventgate")]
#[command(about = "Authenticated event bus with multi-engine persistence dispatch")]
#[command(version)]
pub struct CliArgs {
    /// JSON configuration file merged over the defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gate and serve the HTTP binding until Ctrl+C
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Emit one event and print the handler's result
    Emit {
        /// Event name, e.g. "settings.get"
        #[arg(value_name = "EVENT")]
        event: String,

        /// JSON object payload
        #[arg(value_name = "PAYLOAD", default_value = "{}")]
        payload: String,

        /// Act as this module (a token is minted for it)
        #[arg(short, long)]
        module: Option<String>,

        /// Type of the acting module
        #[arg(long, value_parser = parse_module_type, default_value = "community")]
        module_type: ModuleType,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Compare command and structure sets across the three engine adapters
    Parity {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Mint a token for a module
    Token {
        #[arg(short, long)]
        module: String,

        #[arg(long, value_parser = parse_module_type, default_value = "community")]
        module_type: ModuleType,
    },
}

fn parse_module_type(raw: &str) -> Result<ModuleType, String> {
    raw.parse()
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Formatted table output
    Table,
    /// JSON output
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
