//! Incremental-update reconciliation
//!
//! Compares a freshly fetched snapshot with the last stored one and returns
//! the keys whose staleness marker changed:
//!
//! | level        | key                           | marker           | row filter                   |
//! |--------------|-------------------------------|------------------|------------------------------|
//! | competitions | `(competition_id, season_id)` | `match_updated`  | in scope, `match_available` set |
//! | matches      | `match_id`                    | `last_updated`   | `match_status == "available"` |
//!
//! The comparison is a left join of current onto stored. A key is stale
//! unless both sides carry a marker and the markers are equal, so a key with
//! no stored counterpart is always stale. The pure functions here do the
//! comparison; [`Reconciler`] wires them to the fetcher and the snapshot
//! store and persists the current snapshots unconditionally.

use footy_common::table::RowRef;
use footy_common::Table;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

use crate::error::Result;
use crate::extract::Extractor;
use crate::models::{as_id, columns, CompetitionSeason, Failure, MatchId};
use crate::pool::{run_blocking, settle};
use crate::snapshot::{Entity, PartitionKey};

/// Allowed competition and season ids.
///
/// Membership is checked per id: a row passes when its competition id is
/// allowed and its season id is allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonFilter {
    competition_ids: BTreeSet<i64>,
    season_ids: BTreeSet<i64>,
}

impl SeasonFilter {
    pub fn new(
        competition_ids: impl IntoIterator<Item = i64>,
        season_ids: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            competition_ids: competition_ids.into_iter().collect(),
            season_ids: season_ids.into_iter().collect(),
        }
    }

    pub fn allows(&self, competition_id: i64, season_id: i64) -> bool {
        self.competition_ids.contains(&competition_id) && self.season_ids.contains(&season_id)
    }

    fn allows_row(&self, row: RowRef<'_>) -> Option<CompetitionSeason> {
        let key = season_key(row)?;
        self.allows(key.competition_id, key.season_id).then_some(key)
    }
}

fn season_key(row: RowRef<'_>) -> Option<CompetitionSeason> {
    Some(CompetitionSeason::new(
        as_id(row.value(columns::COMPETITION_ID))?,
        as_id(row.value(columns::SEASON_ID))?,
    ))
}

fn is_published(row: RowRef<'_>) -> bool {
    !row.value(columns::MATCH_AVAILABLE).is_null()
}

fn is_available(row: RowRef<'_>) -> bool {
    row.value(columns::MATCH_STATUS).as_str() == Some(columns::STATUS_AVAILABLE)
}

/// `current` is fresh unless both markers are present and equal.
fn is_stale(current: &Value, old: Option<&Value>) -> bool {
    match old {
        Some(old) if !old.is_null() && !current.is_null() => current != old,
        _ => true,
    }
}

/// Keep the first occurrence of each item.
fn dedup<T: Clone + Eq + std::hash::Hash>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Competition seasons in scope whose data is published, in fetch order.
pub fn seasons_in_scope(current: &Table, filter: &SeasonFilter) -> Vec<CompetitionSeason> {
    dedup(
        current
            .iter()
            .filter(|row| is_published(*row))
            .filter_map(|row| filter.allows_row(row)),
    )
}

/// Competition seasons whose `match_updated` changed since `stored`.
pub fn stale_competitions(
    current: &Table,
    stored: Option<&Table>,
    filter: &SeasonFilter,
) -> Vec<CompetitionSeason> {
    let mut old: HashMap<CompetitionSeason, &Value> = HashMap::new();
    if let Some(stored) = stored {
        for row in stored.iter().filter(|row| is_published(*row)) {
            if let Some(key) = filter.allows_row(row) {
                old.entry(key).or_insert_with(|| row.value(columns::MATCH_UPDATED));
            }
        }
    }

    dedup(
        current
            .iter()
            .filter(|row| is_published(*row))
            .filter_map(|row| {
                let key = filter.allows_row(row)?;
                let stale = is_stale(row.value(columns::MATCH_UPDATED), old.get(&key).copied());
                stale.then_some(key)
            }),
    )
}

/// Available matches whose `last_updated` changed since `stored`.
pub fn stale_matches(current: &Table, stored: Option<&Table>) -> Vec<MatchId> {
    let mut old: HashMap<MatchId, &Value> = HashMap::new();
    if let Some(stored) = stored {
        for row in stored.iter().filter(|row| is_available(*row)) {
            if let Some(id) = as_id(row.value(columns::MATCH_ID)) {
                old.entry(id).or_insert_with(|| row.value(columns::LAST_UPDATED));
            }
        }
    }

    dedup(
        current
            .iter()
            .filter(|row| is_available(*row))
            .filter_map(|row| {
                let id = as_id(row.value(columns::MATCH_ID))?;
                is_stale(row.value(columns::LAST_UPDATED), old.get(&id).copied()).then_some(id)
            }),
    )
}

/// Available match ids of a matches table, in row order.
pub fn available_matches(matches: &Table) -> Vec<MatchId> {
    dedup(
        matches
            .iter()
            .filter(|row| is_available(*row))
            .filter_map(|row| as_id(row.value(columns::MATCH_ID))),
    )
}

/// Update-mode driver around an [`Extractor`].
pub struct Reconciler<'a> {
    extractor: &'a Extractor,
}

impl<'a> Reconciler<'a> {
    pub fn new(extractor: &'a Extractor) -> Self {
        Self { extractor }
    }

    /// Fetch competitions, return the stale in-scope seasons and overwrite
    /// the stored competitions snapshot.
    pub async fn update_competitions(&self) -> Result<Vec<CompetitionSeason>> {
        let store = self.extractor.store();
        let current = self.extractor.fetch_competitions().await?;
        let stored = store.read_optional(Entity::Competitions, &PartitionKey::Whole)?;
        if stored.is_none() {
            info!("No stored competitions snapshot, every season in scope is new");
        }

        let stale = stale_competitions(&current, stored.as_ref(), self.extractor.filter());
        store.write(Entity::Competitions, &PartitionKey::Whole, &current)?;

        info!(
            fetched = current.len(),
            stale = stale.len(),
            "Reconciled competitions"
        );
        Ok(stale)
    }

    /// Refetch matches of every stale season and return the stale match ids.
    ///
    /// Each season's stored partition is read before it is overwritten with
    /// the freshly fetched matches. An empty payload keeps the stored
    /// partition.
    pub async fn update_matches(
        &self,
        seasons: &[CompetitionSeason],
        failures: &mut Vec<Failure>,
    ) -> Result<Vec<MatchId>> {
        let outcomes = self
            .extractor
            .pool()
            .run("update_matches", seasons.to_vec(), |season| {
                let extractor = self.extractor.clone();
                async move {
                    let key = PartitionKey::Season(season);
                    let store = extractor.store().clone();
                    let stored = run_blocking("read_matches", move || {
                        store.read_optional(Entity::Matches, &key)
                    })
                    .await?;
                    let current = extractor.fetch_matches(season).await?;
                    if current.num_columns() == 0 {
                        debug!(season = %season, "No matches returned, keeping stored partition");
                        return Ok(Vec::new());
                    }

                    let store = extractor.store().clone();
                    run_blocking("write_matches", move || {
                        let stale = stale_matches(&current, stored.as_ref());
                        store.write(Entity::Matches, &key, &current)?;
                        debug!(season = %season, matches = current.len(), stale = stale.len(), "Reconciled season");
                        Ok(stale)
                    })
                    .await
                }
            })
            .await;

        let settled = settle("update_matches", outcomes, self.extractor.policy(), failures)?;
        let stale = dedup(settled.into_iter().flat_map(|(_, ids)| ids));
        info!(seasons = seasons.len(), stale = stale.len(), "Reconciled matches");
        Ok(stale)
    }
}
