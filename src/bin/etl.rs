//! Loads the staging tables and populates the star schema.

use clap::Parser;
use dwh::{
    cli::{self, CliArgs},
    pipeline::Stage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run(&Stage::ETL, CliArgs::parse()).await
}
