//! Footy Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the footy-etl workspace.
//!
//! # Overview
//!
//! - **Table**: the in-memory tabular model every pipeline stage exchanges
//! - **Error Handling**: shared error and result types
//! - **Logging**: centralized `tracing` subscriber setup
//!
//! # Example
//!
//! ```
//! use footy_common::Table;
//! use serde_json::json;
//!
//! let table = Table::from_records(&[json!({"match_id": 1, "home_team": {"name": "A"}})]);
//! assert_eq!(table.columns(), ["match_id", "home_team.name"]);
//! ```

pub mod error;
pub mod logging;
pub mod table;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use table::Table;
