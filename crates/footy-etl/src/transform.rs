//! Transform stage
//!
//! Reads every stored partition back, combines them into one table per
//! entity and applies the column cleaning of [`crate::normalize`].

use footy_common::Table;
use std::collections::HashSet;
use tracing::info;

use crate::error::Result;
use crate::models::{as_id, columns, MatchId};
use crate::normalize::{clean_events, clean_frames, clean_lineups};
use crate::snapshot::{Entity, SnapshotStore};

/// One cleaned table per entity, ready for loading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub competition: Table,
    pub matches: Table,
    pub lineups: Table,
    pub events: Table,
    pub frames: Table,
}

impl Dataset {
    pub fn table(&self, entity: Entity) -> &Table {
        match entity {
            Entity::Competitions => &self.competition,
            Entity::Matches => &self.matches,
            Entity::Lineups => &self.lineups,
            Entity::Events => &self.events,
            Entity::Frames => &self.frames,
        }
    }

    /// Keep only the rows of `match_ids` in the match-keyed tables.
    /// The competition table is left whole.
    pub fn restrict_to(self, match_ids: &[MatchId]) -> Self {
        let keep: HashSet<MatchId> = match_ids.iter().copied().collect();
        let only = |table: Table| {
            table.filter(|row| as_id(row.value(columns::MATCH_ID)).is_some_and(|id| keep.contains(&id)))
        };

        Self {
            competition: self.competition,
            matches: only(self.matches),
            lineups: only(self.lineups),
            events: only(self.events),
            frames: only(self.frames),
        }
    }
}

pub struct Transformer<'a> {
    store: &'a SnapshotStore,
}

impl<'a> Transformer<'a> {
    pub fn new(store: &'a SnapshotStore) -> Self {
        Self { store }
    }

    pub fn transform(&self) -> Result<Dataset> {
        let competition = self.store.read_all(Entity::Competitions)?;
        let matches = self.store.read_all(Entity::Matches)?;

        let mut lineups = self.store.read_all(Entity::Lineups)?;
        clean_lineups(&mut lineups)?;

        let events = clean_events(self.store.read_all(Entity::Events)?)?;

        let mut frames = self.store.read_all(Entity::Frames)?;
        clean_frames(&mut frames)?;

        info!(
            competition = competition.len(),
            matches = matches.len(),
            lineups = lineups.len(),
            events = events.len(),
            frames = frames.len(),
            "Transformed snapshots"
        );

        Ok(Dataset {
            competition,
            matches,
            lineups,
            events,
            frames,
        })
    }
}
