use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use krushr_realtime::telemetry::LogLevel;
use krushr_realtime::SortOrder;

#[derive(Parser, Debug)]
#[command(
    name = "krushr-sync",
    version,
    about = "Drive a Krushr realtime session from the terminal"
)]
pub struct Cli {
    /// User the session signs in as.
    #[arg(long, env = "KRUSHR_USER_ID")]
    pub user: String,

    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,

    /// Also write logs to this file (defaults to KRUSHR_LOG_PATH).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect and log every decoded event until interrupted.
    Tail(TailArgs),
    /// Print a task's threaded comments, optionally following live changes.
    Comments(CommentsArgs),
}

#[derive(Args, Debug)]
pub struct TailArgs {
    /// Join these task rooms.
    #[arg(long = "task")]
    pub tasks: Vec<String>,

    /// Join these workspace rooms.
    #[arg(long = "workspace")]
    pub workspaces: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CommentsArgs {
    #[arg(long)]
    pub task: String,

    #[arg(long, value_enum, default_value_t = Order::Asc)]
    pub order: Order,

    /// Keep running and reprint whenever the thread changes.
    #[arg(long)]
    pub follow: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Order {
    Asc,
    Desc,
}

impl From<Order> for SortOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Asc => SortOrder::Ascending,
            Order::Desc => SortOrder::Descending,
        }
    }
}
