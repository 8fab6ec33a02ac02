use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "nexus",
    about = "Nexus data layer maintenance: schema enforcement and configuration",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run schema enforcement and linking over JSON fixtures
    Migrate(MigrateArgs),
    /// Print the effective configuration (file plus environment)
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct MigrateArgs {
    /// JSON array of user documents
    #[arg(long)]
    pub users: Option<PathBuf>,
    /// JSON array of organization documents
    #[arg(long)]
    pub orgs: Option<PathBuf>,
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory to write the migrated collections to
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Keep organizations in the secondary database
    #[arg(long)]
    pub secondary: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}
