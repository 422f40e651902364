use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cairn",
    about = "Cairn: an append-only log with views kept consistent by replay",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log file to operate on
    #[arg(short, long, global = true, default_value = "cairn.log")]
    pub log: PathBuf,

    /// TOML file with instance configuration
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Fsync after every append
    #[arg(long, global = true)]
    pub sync: bool,

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
    /// Append values to the log
    Append(AppendArgs),
    /// Read one value by sequence number
    Get(GetArgs),
    /// Print log entries
    Dump(DumpArgs),
    /// Count entries through a replayed view
    Count,
    /// Latest value per key, through a replayed view
    Latest(LatestArgs),
    /// Destroy and replay every view
    Rebuild,
    /// Show call counters and watermarks
    Meta,
}

impl Command {
    /// Subcommand name, as typed on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Append(_) => "append",
            Command::Get(_) => "get",
            Command::Dump(_) => "dump",
            Command::Count => "count",
            Command::Latest(_) => "latest",
            Command::Rebuild => "rebuild",
            Command::Meta => "meta",
        }
    }
}

#[derive(Args)]
pub struct AppendArgs {
    /// Values to append; anything that is not valid JSON is stored as a string
    #[arg(required = true)]
    pub values: Vec<String>,
}

#[derive(Args)]
pub struct GetArgs {
    pub seq: i64,
    /// Uppercase string values on the way out
    #[arg(long)]
    pub upper: bool,
}

#[derive(Args)]
pub struct DumpArgs {
    /// Only entries after this sequence number
    #[arg(long)]
    pub gt: Option<i64>,
    /// Keep following the log for new entries
    #[arg(long)]
    pub live: bool,
    /// Print values without sequence numbers
    #[arg(long)]
    pub values_only: bool,
    /// Uppercase string values on the way out
    #[arg(long)]
    pub upper: bool,
}

#[derive(Args)]
pub struct LatestArgs {
    /// Field of each object value used as its key
    #[arg(short, long, default_value = "id")]
    pub field: String,
    /// Key to look up; lists all keys when omitted
    pub key: Option<String>,
}
