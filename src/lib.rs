//! # Warehouse ETL Library
//!
//! Builds a star schema in Amazon Redshift: creates the tables, bulk-loads
//! the raw JSON logs into staging tables and derives the fact and dimension
//! tables from them. A SQLite dialect mirrors the warehouse for local runs.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod telemetry;
pub mod transform;
pub use star_schema;
