use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "autocam",
    version,
    about = "Keeps fabrication parts, categories and CAD files in sync with Jira"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Reconcile forever, sleeping between cycles (default if no subcommand given).
    Run,

    /// Run a single reconciliation cycle and print its summary as JSON.
    Once,

    /// Create the parts and part_categories tables if they do not exist.
    Migrate,

    /// Print current configuration (redacted secrets).
    Config,
}
