//! Shared domain types and column names

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Match identifier as published by the source API.
pub type MatchId = i64;

/// Column names the pipeline relies on (after `.` → `_` sanitising).
pub mod columns {
    pub const COMPETITION_ID: &str = "competition_id";
    pub const SEASON_ID: &str = "season_id";
    pub const MATCH_UPDATED: &str = "match_updated";
    pub const MATCH_AVAILABLE: &str = "match_available";
    pub const MATCH_ID: &str = "match_id";
    pub const MATCH_STATUS: &str = "match_status";
    pub const LAST_UPDATED: &str = "last_updated";

    /// `match_status` value of matches whose data is published.
    pub const STATUS_AVAILABLE: &str = "available";
}

/// Competition × season partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompetitionSeason {
    pub competition_id: i64,
    pub season_id: i64,
}

impl CompetitionSeason {
    pub fn new(competition_id: i64, season_id: i64) -> Self {
        Self {
            competition_id,
            season_id,
        }
    }
}

impl fmt::Display for CompetitionSeason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.competition_id, self.season_id)
    }
}

/// Extraction mode selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Extract and load everything in the configured scope
    Full,
    /// Only refresh what changed since the last run
    Update,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Full => write!(f, "full"),
            RunMode::Update => write!(f, "update"),
        }
    }
}

/// How the run reacts to failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPolicy {
    /// Log, record and carry on
    #[default]
    Lenient,
    /// Stop at the first failure and return it
    Strict,
}

impl RunPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            RunPolicy::Strict
        } else {
            RunPolicy::Lenient
        }
    }
}

/// A failure that was logged and skipped under [`RunPolicy::Lenient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub stage: String,
    pub key: String,
    pub message: String,
}

impl Failure {
    pub fn new(stage: impl Into<String>, key: impl ToString, message: impl ToString) -> Self {
        Self {
            stage: stage.into(),
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.key, self.message)
    }
}

/// Read an integer id from a cell, accepting integral floats and numeric strings.
pub fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_as_id_accepts_numeric_shapes() {
        assert_eq!(as_id(&json!(7)), Some(7));
        assert_eq!(as_id(&json!(235.0)), Some(235));
        assert_eq!(as_id(&json!("3788741")), Some(3788741));
        assert_eq!(as_id(&json!(1.5)), None);
        assert_eq!(as_id(&Value::Null), None);
    }

    #[test]
    fn test_competition_season_display() {
        assert_eq!(CompetitionSeason::new(7, 235).to_string(), "7_235");
    }
}
