//! Drops and recreates the warehouse schema.

use clap::Parser;
use dwh::{
    cli::{self, CliArgs},
    pipeline::Stage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run(&Stage::CREATE_TABLES, CliArgs::parse()).await
}
