use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Requirements traceability matrix generator for Azure DevOps")]
pub struct Cli {
    /// Path to the connection registry database
    #[clap(long, global = true)]
    pub db: Option<PathBuf>,

    /// Path to a YAML configuration file
    #[clap(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Connection to use (defaults to the registry default)
    #[clap(long, short = 'C', global = true)]
    pub connection: Option<String>,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    pub log_json: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage backend connections
    #[clap(subcommand)]
    Connection(ConnectionCommand),

    /// List the sprints of the connection's project
    Sprints,

    /// Generate the traceability matrix
    Generate {
        /// Comma-separated requirement ids
        #[clap(
            long,
            value_delimiter = ',',
            conflicts_with = "sprint",
            required_unless_present = "sprint"
        )]
        ids: Vec<u64>,

        /// Sprint name or iteration path
        #[clap(long)]
        sprint: Option<String>,

        /// Output format
        #[clap(long, short = 'f', value_enum, default_value = "table")]
        format: OutputFormat,

        /// Write the output to a file instead of stdout
        #[clap(long, short = 'o')]
        output: Option<PathBuf>,

        /// Maximum number of requirements processed at once
        #[clap(long)]
        concurrency: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConnectionCommand {
    /// Add a new connection
    Add {
        /// Name of the connection
        #[clap(long)]
        name: Option<String>,

        /// Organization URL, e.g. https://dev.azure.com/contoso
        #[clap(long)]
        org_url: Option<String>,

        /// Project name
        #[clap(long)]
        project: Option<String>,

        /// Personal access token (prompted for when omitted)
        #[clap(long)]
        token: Option<String>,

        /// Make this the default connection
        #[clap(long)]
        default: bool,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },

    /// List all connections
    List,

    /// Show details for a connection
    Show {
        /// Name of the connection
        name: String,
    },

    /// Change an existing connection
    Update {
        /// Name of the connection
        name: String,

        #[clap(long)]
        org_url: Option<String>,

        #[clap(long)]
        project: Option<String>,

        #[clap(long)]
        token: Option<String>,
    },

    /// Remove a connection
    Remove {
        /// Name of the connection
        name: String,

        /// Skip the confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Set the default connection
    Default {
        /// Name of the connection
        name: String,
    },

    /// Check that a connection can reach its project
    Test {
        /// Name of the connection (defaults to the default connection)
        name: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Colored table with a KPI summary
    Table,
    /// Matrix, statistics and diagnostics as JSON
    Json,
    /// CSV workbook
    Csv,
    /// Markdown summary
    Markdown,
}
