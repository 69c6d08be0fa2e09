use eyre::Result;

mod cli;
pub(crate) mod config;
mod control;
mod launch;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
