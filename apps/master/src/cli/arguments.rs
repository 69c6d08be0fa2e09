use std::path::PathBuf;

use clap::Args;

#[derive(Args)]
pub struct Run {
    /// Path to the master configuration file.
    #[clap(short, long)]
    pub config: PathBuf,
}
