//! CLI argument parsing for `qpack`.
//!
//! The CLI only routes arguments; behavior lives in the library.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "qpack",
    version,
    about = "Pack, unpack, and verify osquery query packs",
    after_help = "Examples:\n  qpack pack queries/ --output incident-response.conf\n  qpack unpack incident-response.conf --output queries/\n  qpack verify queries/\n  qpack verify incident-response.conf --platform darwin",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    Pack(PackArgs),
    Unpack(UnpackArgs),
    Verify(VerifyArgs),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Pack(_) => "pack",
            Command::Unpack(_) => "unpack",
            Command::Verify(_) => "verify",
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Combine a directory of .sql query files into a pack")]
pub struct PackArgs {
    /// Directory of query source files
    #[arg(value_name = "DIR")]
    pub source: PathBuf,

    /// Write the pack here instead of stdout
    #[arg(long, short, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Query names to leave out
    #[arg(long, value_name = "NAME", value_delimiter = ',')]
    pub exclude: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Split a pack into one .sql file per query")]
pub struct UnpackArgs {
    /// Pack manifest to split
    #[arg(value_name = "PACK")]
    pub pack: PathBuf,

    /// Destination directory
    #[arg(long, short, value_name = "DIR", default_value = ".")]
    pub output: PathBuf,
}

#[derive(Parser, Debug)]
#[command(about = "Run every query through osqueryi and report failures")]
pub struct VerifyArgs {
    /// Query directory, .conf pack, or single .sql file
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Verification config file (JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Query runner executable
    #[arg(long, value_name = "BIN")]
    pub osqueryi: Option<PathBuf>,

    /// Extra runner flags, shell-quoted
    #[arg(long, value_name = "ARGS", allow_hyphen_values = true)]
    pub runner_args: Option<String>,

    /// Per-query deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Queries to run concurrently
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Verify as if running on this platform
    #[arg(long, value_name = "PLATFORM")]
    pub platform: Option<String>,

    /// Query names to leave out
    #[arg(long, value_name = "NAME", value_delimiter = ',')]
    pub exclude: Vec<String>,
}
