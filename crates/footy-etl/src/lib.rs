//! Footy ETL Library
//!
//! Batch ETL for football open data: competitions, matches, lineups, events
//! and 360 frames are fetched from a JSON API, flattened into tables, kept as
//! Parquet snapshots and loaded into MySQL.
//!
//! # Stages
//!
//! - **extract**: bounded-concurrency fetches, one snapshot partition per key
//! - **reconcile**: in update mode, only seasons and matches whose
//!   last-modified marker changed are refetched
//! - **transform**: partitions are combined per entity and cleaned
//! - **load**: tables are appended (or, for competitions in update mode,
//!   replaced) through the [`load::Loader`] seam
//!
//! # Example
//!
//! ```no_run
//! use footy_etl::{config::EtlConfig, models::RunMode, pipeline::Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::load()?;
//!     let report = Pipeline::from_config(config)?.run(RunMode::Update).await?;
//!     println!("{} matches refreshed", report.match_ids.len());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod extract;
pub mod flatten;
pub mod load;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod pool;
pub mod reconcile;
pub mod snapshot;
pub mod source;
pub mod transform;

pub use error::{EtlError, Result};
