//! Nested JSON flattening
//!
//! Payloads from the source API are lists of deeply nested records. They are
//! turned into flat rows in three steps:
//!
//! 1. [`normalize_records`] flattens nested objects into `parent.child`
//!    columns and keeps lists as cell values.
//! 2. [`explode_nested`] is applied once per list-valued column, in the fixed
//!    order of the entity's [`FlattenPlan`]. Each explode changes the row set
//!    the next one works on, so the order matters (`lineup` before
//!    `lineup.cards`).
//! 3. [`sanitize_column_names`] rewrites the remaining `.` separators to `_`.
//!
//! Explodes never drop a parent row: a null, missing or empty list keeps one
//! row whose derived columns are null.

use footy_common::table::{flatten_object, PATH_SEPARATOR};
use footy_common::Table;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;
use crate::models::{columns, MatchId};
use crate::snapshot::Entity;

/// Delimiter that replaces [`PATH_SEPARATOR`] in stored column names.
pub const SAFE_DELIMITER: &str = "_";

/// Ordered list of nested columns to explode for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlattenPlan {
    pub explode: &'static [&'static str],
}

impl FlattenPlan {
    pub fn for_entity(entity: Entity) -> Self {
        let explode: &'static [&'static str] = match entity {
            Entity::Competitions => &[],
            Entity::Matches => &["home_team.managers", "away_team.managers"],
            Entity::Lineups => &["lineup", "lineup.cards", "lineup.positions"],
            Entity::Events => &["tactics.lineup", "shot.freeze_frame"],
            Entity::Frames => &["freeze_frame"],
        };
        Self { explode }
    }
}

/// Flatten nested objects of every record into columns.
pub fn normalize_records(records: &[Value]) -> Table {
    Table::from_records(records)
}

/// Explode `column` into one row per list element, keeping the column name.
///
/// Non-list values are kept as they are. A null or empty list keeps the row
/// with a null cell. Missing columns leave the table unchanged.
pub fn explode(table: &Table, column: &str) -> Result<Table> {
    let Some(idx) = table.column_index(column) else {
        return Ok(table.clone());
    };

    let mut rows = Vec::with_capacity(table.len());
    for row in table.rows() {
        match &row[idx] {
            Value::Array(items) if !items.is_empty() => {
                for item in items {
                    let mut new_row = row.clone();
                    new_row[idx] = item.clone();
                    rows.push(new_row);
                }
            },
            Value::Array(_) => {
                let mut new_row = row.clone();
                new_row[idx] = Value::Null;
                rows.push(new_row);
            },
            _ => rows.push(row.clone()),
        }
    }

    Ok(Table::from_rows(table.columns().iter().cloned(), rows)?)
}

/// Explode `column` and project each element's fields into
/// `<column>.`-prefixed columns, dropping `column` itself.
///
/// Nested objects inside the elements are flattened recursively; lists inside
/// them stay as cells so a later step can explode them. Elements that are not
/// objects contribute null derived cells.
pub fn explode_nested(table: &Table, column: &str) -> Result<Table> {
    if !table.has_column(column) {
        return Ok(table.clone());
    }

    let exploded = explode(table, column)?;
    let Some(idx) = exploded.column_index(column) else {
        return Ok(exploded);
    };

    let mut derived: Vec<String> = Vec::new();
    let mut derived_index: HashMap<String, usize> = HashMap::new();
    let mut element_cells: Vec<Vec<(usize, Value)>> = Vec::with_capacity(exploded.len());

    for row in exploded.rows() {
        let mut cells = Vec::new();
        if let Value::Object(map) = &row[idx] {
            let mut pairs = Vec::new();
            flatten_object("", map, &mut pairs);
            for (key, value) in pairs {
                let name = format!("{column}{PATH_SEPARATOR}{key}");
                let pos = match derived_index.get(&name) {
                    Some(&pos) => pos,
                    None => {
                        derived_index.insert(name.clone(), derived.len());
                        derived.push(name);
                        derived.len() - 1
                    },
                };
                cells.push((pos, value));
            }
        }
        element_cells.push(cells);
    }

    let base: Vec<String> = exploded
        .columns()
        .iter()
        .filter(|c| c.as_str() != column)
        .cloned()
        .collect();

    let mut derived_values = vec![Vec::with_capacity(exploded.len()); derived.len()];
    let mut rows = Vec::with_capacity(exploded.len());
    for (row, cells) in exploded.into_rows().into_iter().zip(element_cells) {
        let mut extra = vec![Value::Null; derived.len()];
        for (pos, value) in cells {
            extra[pos] = value;
        }
        for (values, value) in derived_values.iter_mut().zip(extra) {
            values.push(value);
        }
        let mut row = row;
        row.remove(idx);
        rows.push(row);
    }

    // add_column replaces a same-named base column, so a derived value wins
    let mut out = Table::from_rows(base, rows)?;
    for (name, values) in derived.iter().zip(derived_values) {
        out.add_column(name, values)?;
    }
    Ok(out)
}

/// Replace every `.` in column names with [`SAFE_DELIMITER`].
pub fn sanitize_column_names(table: &mut Table) -> Result<()> {
    table.rename_columns(|c| c.replace(PATH_SEPARATOR, SAFE_DELIMITER))?;
    Ok(())
}

/// Run the entity's flatten plan over a raw payload.
///
/// For per-match entities `match_id` is attached as the first column; the
/// payloads of those endpoints carry no match id of their own.
pub fn flatten_payload(entity: Entity, records: &[Value], match_id: Option<MatchId>) -> Result<Table> {
    let mut table = normalize_records(records);
    for column in FlattenPlan::for_entity(entity).explode {
        table = explode_nested(&table, column)?;
    }
    sanitize_column_names(&mut table)?;

    if let Some(id) = match_id {
        table = attach_join_key(table, id)?;
    }
    Ok(table)
}

/// Put `match_id` in front of every row.
fn attach_join_key(table: Table, match_id: MatchId) -> Result<Table> {
    if table.has_column(columns::MATCH_ID) {
        let mut table = table;
        table.add_column(columns::MATCH_ID, vec![Value::from(match_id); table.len()])?;
        return Ok(table);
    }

    let columns = std::iter::once(columns::MATCH_ID.to_string())
        .chain(table.columns().iter().cloned())
        .collect::<Vec<_>>();
    let rows = table
        .into_rows()
        .into_iter()
        .map(|row| std::iter::once(Value::from(match_id)).chain(row).collect())
        .collect();
    Ok(Table::from_rows(columns, rows)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lineup_payload() -> Vec<Value> {
        vec![
            json!({
                "team_id": 914,
                "team_name": "Italy",
                "lineup": [
                    {
                        "player_id": 1,
                        "player_name": "A",
                        "country": {"id": 112, "name": "Italy"},
                        "cards": [{"time": "12:00", "card_type": "Yellow Card"}, {"time": "80:10", "card_type": "Second Yellow"}],
                        "positions": [{"position": "Goalkeeper", "from": "00:00", "to": null}]
                    },
                    {
                        "player_id": 2,
                        "player_name": "B",
                        "country": {"id": 112, "name": "Italy"},
                        "cards": [],
                        "positions": []
                    }
                ]
            }),
            json!({"team_id": 768, "team_name": "England", "lineup": []}),
        ]
    }

    #[test]
    fn test_explode_nested_cardinality() {
        let table = Table::from_records(&[
            json!({"id": 1, "kids": [{"a": 1}, {"a": 2}, {"a": 3}]}),
            json!({"id": 2, "kids": []}),
            json!({"id": 3, "kids": null}),
            json!({"id": 4}),
        ]);

        let out = explode_nested(&table, "kids").unwrap();

        assert_eq!(out.columns(), ["id", "kids.a"]);
        let ids: Vec<_> = out.iter().map(|row| row.value("id").clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(1), json!(1), json!(2), json!(3), json!(4)]);
        assert!(out.cell(3, "kids.a").unwrap().is_null());
        assert!(out.cell(4, "kids.a").unwrap().is_null());
    }

    #[test]
    fn test_explode_nested_flattens_element_objects() {
        let table = Table::from_records(&[json!({
            "id": 1,
            "managers": [{"id": 10, "country": {"name": "Spain"}}]
        })]);

        let out = explode_nested(&table, "managers").unwrap();

        assert_eq!(out.columns(), ["id", "managers.id", "managers.country.name"]);
        assert_eq!(out.cell(0, "managers.country.name").unwrap(), &json!("Spain"));
    }

    #[test]
    fn test_explode_nested_scalar_elements_yield_nulls() {
        let table = Table::from_records(&[json!({"id": 1, "xs": [1, {"a": 2}]})]);
        let out = explode_nested(&table, "xs").unwrap();

        assert_eq!(out.len(), 2);
        assert!(out.cell(0, "xs.a").unwrap().is_null());
        assert_eq!(out.cell(1, "xs.a").unwrap(), &json!(2));
    }

    #[test]
    fn test_explode_nested_missing_column_is_noop() {
        let table = Table::from_records(&[json!({"id": 1})]);
        assert_eq!(explode_nested(&table, "nope").unwrap(), table);
    }

    #[test]
    fn test_plain_explode_keeps_column_name() {
        let table = Table::from_records(&[
            json!({"id": "e1", "related_events": ["e2", "e3"]}),
            json!({"id": "e2", "related_events": []}),
            json!({"id": "e3"}),
        ]);

        let out = explode(&table, "related_events").unwrap();

        assert_eq!(out.columns(), ["id", "related_events"]);
        assert_eq!(out.len(), 4);
        assert_eq!(out.cell(1, "related_events").unwrap(), &json!("e3"));
        assert!(out.cell(2, "related_events").unwrap().is_null());
    }

    #[test]
    fn test_lineup_plan_produces_one_row_per_leaf() {
        let table = flatten_payload(Entity::Lineups, &lineup_payload(), Some(3788741)).unwrap();

        // player A: 2 cards x 1 position, player B: 1 row, England: 1 row
        assert_eq!(table.len(), 4);
        assert_eq!(table.columns()[0], "match_id");
        assert!(table.has_column("lineup_cards_time"));
        assert!(table.has_column("lineup_positions_from"));
        assert!(table.has_column("lineup_country_name"));
        assert!(table.columns().iter().all(|c| !c.contains('.')));

        let england = table.row(3).unwrap();
        assert_eq!(england.value("team_name"), &json!("England"));
        assert!(england.value("lineup_player_id").is_null());
        assert!(table.iter().all(|r| r.value("match_id") == &json!(3788741)));
    }

    #[test]
    fn test_events_plan_explodes_freeze_frames() {
        let events = vec![
            json!({"id": "e1", "type": {"name": "Pass"}, "location": [10.0, 20.0]}),
            json!({
                "id": "e2",
                "type": {"name": "Shot"},
                "shot": {
                    "end_location": [120.0, 40.0, 1.5],
                    "freeze_frame": [
                        {"location": [100.0, 30.0], "teammate": true},
                        {"location": [110.0, 35.0], "teammate": false}
                    ]
                }
            }),
        ];

        let table = flatten_payload(Entity::Events, &events, Some(1)).unwrap();

        assert_eq!(table.len(), 3);
        assert!(table.has_column("shot_freeze_frame_location"));
        assert!(table.has_column("shot_end_location"));
        assert!(table.has_column("type_name"));
        assert!(!table.has_column("shot_freeze_frame"));
    }

    #[test]
    fn test_matches_plan_has_no_join_key_added() {
        let matches = vec![json!({
            "match_id": 10,
            "home_team": {"home_team_id": 1, "managers": [{"id": 5}, {"id": 6}]},
            "away_team": {"away_team_id": 2, "managers": null},
            "last_updated": "2023-01-01T00:00:00"
        })];

        let table = flatten_payload(Entity::Matches, &matches, None).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.columns()[0], "match_id");
        assert!(table.has_column("home_team_managers_id"));
        assert!(!table.has_column("away_team_managers_id"));
    }

    #[test]
    fn test_attach_join_key_overwrites_existing_column() {
        let table = Table::from_records(&[json!({"match_id": "stale", "x": 1})]);
        let out = attach_join_key(table, 42).unwrap();
        assert_eq!(out.cell(0, "match_id").unwrap(), &json!(42));
        assert_eq!(out.num_columns(), 2);
    }
}
