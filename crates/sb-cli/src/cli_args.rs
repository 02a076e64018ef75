use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sb-cli")]
#[command(about = "Runs scripts against a demo host through the script bridge")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Run(RunArgs),
    Functions(FunctionsArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("script").required(true).args(["file", "eval"])))]
pub(crate) struct RunArgs {
    #[arg(long = "file")]
    pub(crate) file: Option<PathBuf>,
    #[arg(long = "eval")]
    pub(crate) eval: Option<String>,
    #[arg(long = "fixture")]
    pub(crate) fixture: Option<PathBuf>,
    #[arg(long = "config")]
    pub(crate) config: Option<PathBuf>,
    #[arg(long = "batch")]
    pub(crate) batch: bool,
    #[arg(long = "reply")]
    pub(crate) reply: bool,
    #[arg(long = "timeout-ms")]
    pub(crate) timeout_ms: Option<u64>,
    #[arg(last = true)]
    pub(crate) args: Vec<String>,
}

#[derive(Debug, Args)]
pub(crate) struct FunctionsArgs {
    #[arg(long = "fixture")]
    pub(crate) fixture: Option<PathBuf>,
    #[arg(long = "config")]
    pub(crate) config: Option<PathBuf>,
}
