use std::path::PathBuf;

use clap::Parser;

/// IMAP granular access proxy command line (spec.md §6 CLI surface, trimmed
/// from the teacher's `opts.rs` of daemon/systemd/control-socket
/// machinery which is out of scope here).
#[derive(Debug, Parser)]
#[command(name = "gap", disable_version_flag = true)]
pub struct ProcArgs {
    /// Config file path. Required unless `--version` is given.
    #[arg(short = 'c', long = "config", value_name = "CONFIG FILE")]
    pub config_file: Option<PathBuf>,

    /// Override the first listener's bind host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Override the first listener's bind port.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Show version and exit.
    #[arg(short = 'V', long = "version", action = clap::ArgAction::SetTrue)]
    pub version: bool,
}

pub fn parse() -> ProcArgs {
    ProcArgs::parse()
}
