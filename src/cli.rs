use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(about, version, author)]
pub struct Cli {
    /// Config file; `invoker.toml` is used when present
    #[clap(short, long)]
    pub config: Option<PathBuf>,
}
