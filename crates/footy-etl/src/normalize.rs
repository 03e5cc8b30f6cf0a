//! Coordinate and clock normalization
//!
//! Pure, row-set level cleaning applied between flattening and loading:
//! composite `[x, y(, z)]` arrays become scalar columns and `M:S` match
//! clocks become times of day.

use chrono::NaiveTime;
use footy_common::Table;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::{EtlError, Result};
use crate::flatten::explode;

/// The only coordinate field that carries a height component.
pub const SHOT_END_LOCATION: &str = "shot_end_location";

/// Lineup columns holding `M:S` match clocks.
pub const LINEUP_CLOCK_COLUMNS: &[&str] = &[
    "lineup_cards_time",
    "lineup_positions_from",
    "lineup_positions_to",
];

/// Event columns holding `[x, y(, z)]` pitch coordinates.
pub const EVENT_COORDINATE_COLUMNS: &[&str] = &[
    "location",
    "carry_end_location",
    "goalkeeper_end_location",
    SHOT_END_LOCATION,
    "pass_end_location",
    "shot_freeze_frame_location",
];

/// 360 frame columns holding pitch coordinates.
pub const FRAME_COORDINATE_COLUMNS: &[&str] = &["freeze_frame_location"];

/// Event columns renamed because their names are reserved words in SQL.
pub const EVENT_RENAMES: &[(&str, &str)] = &[("index", "index_event"), ("out", "out_event")];

pub const TACTICS_FORMATION: &str = "tactics_formation";
pub const RELATED_EVENTS: &str = "related_events";

const TIME_FORMAT: &str = "%H:%M:%S";

fn clock_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let pattern = Regex::new(r"^\s*(\d+):(\d+)\s*$")?;
    Ok(PATTERN.get_or_init(|| pattern))
}

/// Split `column` into `<column>_x`, `<column>_y` (and `<column>_z` for
/// [`SHOT_END_LOCATION`]) and drop it.
///
/// Null or non-array cells give null derived cells, as does a missing
/// column. A shot array with fewer than three elements gives a null `_z`.
pub fn separate_coordinates(table: &mut Table, column: &str) -> Result<()> {
    let mut axes = vec!["x", "y"];
    if column == SHOT_END_LOCATION {
        axes.push("z");
    }

    let source = if table.has_column(column) {
        table.drop_column(column)?
    } else {
        vec![Value::Null; table.len()]
    };

    for (i, axis) in axes.iter().enumerate() {
        let values = source
            .iter()
            .map(|cell| match cell {
                Value::Array(items) => items.get(i).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })
            .collect();
        table.add_column(&format!("{column}_{axis}"), values)?;
    }
    Ok(())
}

/// Convert an `M:S` match clock into `HH:MM:SS`.
///
/// Minutes may exceed 59: `"95:30"` becomes `"01:35:30"`.
pub fn minutes_to_hours(value: &str) -> Result<String> {
    let caps = clock_pattern()?
        .captures(value)
        .ok_or_else(|| EtlError::MalformedTimeValue(value.to_string()))?;

    let parse = |i: usize| -> Result<u64> {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(|| EtlError::MalformedTimeValue(value.to_string()))
    };
    let minutes = parse(1)?;
    let seconds = parse(2)?;

    Ok(format!("{:02}:{:02}:{:02}", minutes / 60, minutes % 60, seconds))
}

/// Parse a match clock into a time of day; anything unparseable is `None`.
pub fn clock_to_time(value: &str) -> Option<NaiveTime> {
    let hms = minutes_to_hours(value).ok()?;
    NaiveTime::parse_from_str(&hms, TIME_FORMAT).ok()
}

/// Replace every non-null clock in `column` with an `HH:MM:SS` string,
/// nulling malformed values. Returns how many values were coerced to null.
pub fn normalize_clock_column(table: &mut Table, column: &str) -> Result<usize> {
    if !table.has_column(column) {
        return Ok(0);
    }

    let mut coerced = 0;
    table.map_column(column, |cell| match cell {
        Value::Null => Value::Null,
        Value::String(s) => match clock_to_time(s) {
            Some(t) => Value::String(t.format(TIME_FORMAT).to_string()),
            None => {
                coerced += 1;
                Value::Null
            },
        },
        _ => {
            coerced += 1;
            Value::Null
        },
    })?;

    if coerced > 0 {
        debug!(column, coerced, "Coerced malformed clock values to null");
    }
    Ok(coerced)
}

/// Normalize a tactical formation code such as `442` or `4231.0` to text.
fn formation_to_text(cell: &Value) -> Value {
    match cell {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Value::String(i.to_string()),
            None => n
                .as_f64()
                .map(|f| Value::String(format!("{}", f.trunc() as i64)))
                .unwrap_or(Value::Null),
        },
        other => other.clone(),
    }
}

pub fn clean_lineups(table: &mut Table) -> Result<()> {
    for column in LINEUP_CLOCK_COLUMNS {
        normalize_clock_column(table, column)?;
    }
    Ok(())
}

/// Rename reserved columns, stringify formations, explode related events
/// and split coordinates.
pub fn clean_events(table: Table) -> Result<Table> {
    let mut table = table;
    for (from, to) in EVENT_RENAMES {
        table.rename_column(from, to)?;
    }

    if table.has_column(TACTICS_FORMATION) {
        table.map_column(TACTICS_FORMATION, formation_to_text)?;
    }

    let mut table = explode(&table, RELATED_EVENTS)?;
    for column in EVENT_COORDINATE_COLUMNS {
        separate_coordinates(&mut table, column)?;
    }
    Ok(table)
}

pub fn clean_frames(table: &mut Table) -> Result<()> {
    for column in FRAME_COORDINATE_COLUMNS {
        separate_coordinates(table, column)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minutes_to_hours() {
        assert_eq!(minutes_to_hours("95:30").unwrap(), "01:35:30");
        assert_eq!(minutes_to_hours("45:00").unwrap(), "00:45:00");
        assert_eq!(minutes_to_hours("5:03").unwrap(), "00:05:03");
        assert_eq!(minutes_to_hours("120:00").unwrap(), "02:00:00");
    }

    #[test]
    fn test_minutes_to_hours_rejects_garbage() {
        for bad in ["", "45", "ab:cd", "45:", ":30", "1:2:3"] {
            assert!(
                matches!(minutes_to_hours(bad), Err(EtlError::MalformedTimeValue(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_clock_to_time() {
        assert_eq!(clock_to_time("95:30"), NaiveTime::from_hms_opt(1, 35, 30));
        assert_eq!(clock_to_time("12:75"), None);
        assert_eq!(clock_to_time("1500:00"), None);
        assert_eq!(clock_to_time("n/a"), None);
    }

    #[test]
    fn test_normalize_clock_column_coerces_malformed() {
        let mut table = Table::from_records(&[
            json!({"lineup_cards_time": "95:30"}),
            json!({"lineup_cards_time": null}),
            json!({"lineup_cards_time": "broken"}),
        ]);

        let coerced = normalize_clock_column(&mut table, "lineup_cards_time").unwrap();

        assert_eq!(coerced, 1);
        assert_eq!(table.cell(0, "lineup_cards_time").unwrap(), &json!("01:35:30"));
        assert!(table.cell(1, "lineup_cards_time").unwrap().is_null());
        assert!(table.cell(2, "lineup_cards_time").unwrap().is_null());
    }

    #[test]
    fn test_separate_coordinates_pair() {
        let mut table = Table::from_records(&[
            json!({"id": 1, "location": [10.0, 20.0]}),
            json!({"id": 2, "location": null}),
        ]);

        separate_coordinates(&mut table, "location").unwrap();

        assert_eq!(table.columns(), ["id", "location_x", "location_y"]);
        assert_eq!(table.cell(0, "location_x").unwrap(), &json!(10.0));
        assert_eq!(table.cell(0, "location_y").unwrap(), &json!(20.0));
        assert!(table.cell(1, "location_x").unwrap().is_null());
    }

    #[test]
    fn test_separate_coordinates_shot_height() {
        let mut table = Table::from_records(&[
            json!({"shot_end_location": [1, 2, 3]}),
            json!({"shot_end_location": [120.0, 40.0]}),
        ]);

        separate_coordinates(&mut table, SHOT_END_LOCATION).unwrap();

        assert_eq!(table.cell(0, "shot_end_location_z").unwrap(), &json!(3));
        assert!(table.cell(1, "shot_end_location_z").unwrap().is_null());
        assert!(!table.has_column(SHOT_END_LOCATION));
    }

    #[test]
    fn test_separate_coordinates_missing_column() {
        let mut table = Table::from_records(&[json!({"id": 1})]);
        separate_coordinates(&mut table, "carry_end_location").unwrap();

        assert!(table.cell(0, "carry_end_location_x").unwrap().is_null());
        assert!(table.cell(0, "carry_end_location_y").unwrap().is_null());
    }

    #[test]
    fn test_clean_events() {
        let table = Table::from_records(&[
            json!({"id": "a", "index": 1, "out": true, "tactics_formation": 442, "related_events": ["b", "c"], "location": [1.0, 2.0]}),
            json!({"id": "b", "index": 2, "tactics_formation": 4231.0, "related_events": ["a"]}),
        ]);

        let table = clean_events(table).unwrap();

        assert!(table.has_column("index_event"));
        assert!(table.has_column("out_event"));
        assert!(!table.has_column("index"));
        assert_eq!(table.len(), 3);
        assert_eq!(table.cell(0, TACTICS_FORMATION).unwrap(), &json!("442"));
        assert_eq!(table.cell(2, TACTICS_FORMATION).unwrap(), &json!("4231"));
        assert_eq!(table.cell(1, "location_x").unwrap(), &json!(1.0));
        assert!(table.has_column("shot_end_location_z"));
    }

    #[test]
    fn test_clean_frames() {
        let mut table = Table::from_records(&[json!({"event_uuid": "x", "freeze_frame_location": [50.5, 12.0]})]);
        clean_frames(&mut table).unwrap();
        assert_eq!(table.cell(0, "freeze_frame_location_x").unwrap(), &json!(50.5));
    }
}
