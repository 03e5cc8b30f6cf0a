//! Fetch orchestration
//!
//! Fetches competitions, per-season matches and per-match lineups, events and
//! 360 frames, flattens every payload and writes it to its own snapshot
//! partition. Per-key work runs on the [`WorkerPool`] with flattening and
//! file writes on the blocking pool; the calls return only when every
//! dispatched fetch has finished.

use footy_common::Table;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::flatten::flatten_payload;
use crate::models::{CompetitionSeason, Failure, MatchId, RunPolicy};
use crate::pool::{run_blocking, settle, WorkerPool};
use crate::reconcile::{available_matches, seasons_in_scope, SeasonFilter};
use crate::snapshot::{Entity, PartitionKey, SnapshotStore};
use crate::source::{Endpoints, ResourceFetcher};

/// Per-match entities fetched for every selected match.
pub const MATCH_DETAIL_ENTITIES: [Entity; 3] = [Entity::Lineups, Entity::Events, Entity::Frames];

/// One per-match resource, e.g. `events/3788741`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchResource {
    pub entity: Entity,
    pub match_id: MatchId,
}

impl fmt::Display for MatchResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity.folder(), self.match_id)
    }
}

#[derive(Clone)]
pub struct Extractor {
    fetcher: Arc<dyn ResourceFetcher>,
    endpoints: Endpoints,
    store: SnapshotStore,
    filter: SeasonFilter,
    pool: WorkerPool,
    policy: RunPolicy,
}

impl Extractor {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        endpoints: Endpoints,
        store: SnapshotStore,
        filter: SeasonFilter,
        pool: WorkerPool,
        policy: RunPolicy,
    ) -> Self {
        Self {
            fetcher,
            endpoints,
            store,
            filter,
            pool,
            policy,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn filter(&self) -> &SeasonFilter {
        &self.filter
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn policy(&self) -> RunPolicy {
        self.policy
    }

    /// Fetch and flatten the competitions list.
    ///
    /// An empty payload is an error: writing it would wipe the stored
    /// snapshot that update runs compare against.
    pub async fn fetch_competitions(&self) -> Result<Table> {
        let records = self.fetcher.fetch(&self.endpoints.competitions()).await?;
        if records.is_empty() {
            return Err(EtlError::EmptyPayload(Entity::Competitions));
        }
        flatten_payload(Entity::Competitions, &records, None)
    }

    /// Full mode: store the competitions snapshot and return the seasons in
    /// scope.
    pub async fn extract_competitions(&self) -> Result<Vec<CompetitionSeason>> {
        let table = self.fetch_competitions().await?;
        self.store.write(Entity::Competitions, &PartitionKey::Whole, &table)?;

        let seasons = seasons_in_scope(&table, &self.filter);
        info!(fetched = table.len(), in_scope = seasons.len(), "Extracted competitions");
        Ok(seasons)
    }

    /// Fetch and flatten the matches of one season.
    pub async fn fetch_matches(&self, season: CompetitionSeason) -> Result<Table> {
        let records = self.fetcher.fetch(&self.endpoints.matches(season)).await?;
        run_blocking("flatten_matches", move || flatten_payload(Entity::Matches, &records, None)).await
    }

    /// Full mode: store each season's matches and return every available
    /// match id.
    pub async fn extract_matches(
        &self,
        seasons: &[CompetitionSeason],
        failures: &mut Vec<Failure>,
    ) -> Result<Vec<MatchId>> {
        let outcomes = self
            .pool
            .run("extract_matches", seasons.to_vec(), |season| {
                let this = self.clone();
                async move {
                    let table = this.fetch_matches(season).await?;
                    if table.num_columns() == 0 {
                        debug!(season = %season, "No matches returned");
                        return Ok(Vec::new());
                    }
                    let store = this.store.clone();
                    run_blocking("write_matches", move || {
                        store.write(Entity::Matches, &PartitionKey::Season(season), &table)?;
                        Ok(available_matches(&table))
                    })
                    .await
                }
            })
            .await;

        let settled = settle("extract_matches", outcomes, self.policy, failures)?;
        let mut match_ids: Vec<MatchId> = settled.into_iter().flat_map(|(_, ids)| ids).collect();
        match_ids.sort_unstable();
        match_ids.dedup();

        info!(seasons = seasons.len(), matches = match_ids.len(), "Extracted matches");
        Ok(match_ids)
    }

    /// Fetch, flatten and store one per-match resource. Returns the number of
    /// rows written; an empty payload writes nothing.
    pub async fn extract_match_resource(&self, resource: MatchResource) -> Result<usize> {
        let url = self
            .endpoints
            .match_resource(resource.entity, resource.match_id)
            .ok_or_else(|| EtlError::Config(format!("{} is not a per-match entity", resource.entity)))?;

        let records = self.fetcher.fetch(&url).await?;
        if records.is_empty() {
            debug!(resource = %resource, "Empty payload, nothing stored");
            return Ok(0);
        }

        let store = self.store.clone();
        run_blocking("store_match_resource", move || {
            let table = flatten_payload(resource.entity, &records, Some(resource.match_id))?;
            store.write(resource.entity, &PartitionKey::Match(resource.match_id), &table)?;
            Ok(table.len())
        })
        .await
    }

    /// Lineups, events and 360 frames of every match id.
    pub async fn extract_match_details(
        &self,
        match_ids: &[MatchId],
        failures: &mut Vec<Failure>,
    ) -> Result<usize> {
        let resources: Vec<MatchResource> = match_ids
            .iter()
            .flat_map(|&match_id| {
                MATCH_DETAIL_ENTITIES
                    .iter()
                    .map(move |&entity| MatchResource { entity, match_id })
            })
            .collect();

        let outcomes = self
            .pool
            .run("extract_match_details", resources, |resource| {
                let this = self.clone();
                async move { this.extract_match_resource(resource).await }
            })
            .await;

        let settled = settle("extract_match_details", outcomes, self.policy, failures)?;
        let rows: usize = settled.iter().map(|(_, rows)| rows).sum();
        info!(matches = match_ids.len(), rows, "Extracted match details");
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct StaticFetcher {
        responses: HashMap<String, Vec<Value>>,
    }

    #[async_trait]
    impl ResourceFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<Value>> {
            match self.responses.get(url) {
                Some(records) => Ok(records.clone()),
                None if url.contains("boom") => Err(EtlError::fetch(url, "connection reset")),
                None => Ok(Vec::new()),
            }
        }
    }

    fn extractor(dir: &TempDir, responses: Vec<(String, Value)>, policy: RunPolicy) -> Extractor {
        let responses = responses
            .into_iter()
            .map(|(url, body)| (url, crate::source::into_records(body)))
            .collect();
        let store = SnapshotStore::new(dir.path());
        store.ensure_layout().unwrap();
        Extractor::new(
            Arc::new(StaticFetcher { responses }),
            Endpoints::new("http://api"),
            store,
            SeasonFilter::new([7], [235]),
            WorkerPool::new(2),
            policy,
        )
    }

    #[tokio::test]
    async fn test_empty_competitions_payload_is_an_error() {
        let dir = TempDir::new().unwrap();
        let extractor = extractor(&dir, vec![], RunPolicy::Lenient);

        let err = extractor.extract_competitions().await.unwrap_err();
        assert!(matches!(err, EtlError::EmptyPayload(Entity::Competitions)));
        assert!(extractor
            .store()
            .read_optional(Entity::Competitions, &PartitionKey::Whole)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_extract_matches_stores_partition() {
        let dir = TempDir::new().unwrap();
        let extractor = extractor(
            &dir,
            vec![(
                "http://api/matches/7/235.json".into(),
                json!([
                    {"match_id": 1, "match_status": "available", "last_updated": "x"},
                    {"match_id": 2, "match_status": "scheduled", "last_updated": "x"}
                ]),
            )],
            RunPolicy::Lenient,
        );

        let mut failures = Vec::new();
        let ids = extractor
            .extract_matches(&[CompetitionSeason::new(7, 235)], &mut failures)
            .await
            .unwrap();

        assert_eq!(ids, vec![1]);
        let stored = extractor
            .store()
            .read(Entity::Matches, &PartitionKey::Season(CompetitionSeason::new(7, 235)))
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_match_details_attach_join_key_and_skip_missing() {
        let dir = TempDir::new().unwrap();
        let extractor = extractor(
            &dir,
            vec![
                (
                    "http://api/lineups/10.json".into(),
                    json!([{"team_id": 1, "lineup": [{"player_id": 5, "cards": [], "positions": []}]}]),
                ),
                ("http://api/events/10.json".into(), json!([{"id": "e1", "index": 1}])),
            ],
            RunPolicy::Lenient,
        );

        let mut failures = Vec::new();
        extractor.extract_match_details(&[10], &mut failures).await.unwrap();

        assert!(failures.is_empty());
        let events = extractor.store().read(Entity::Events, &PartitionKey::Match(10)).unwrap();
        assert_eq!(events.cell(0, "match_id").unwrap(), &json!(10));
        assert!(extractor
            .store()
            .read_optional(Entity::Frames, &PartitionKey::Match(10))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_policy() {
        let dir = TempDir::new().unwrap();
        let mut lenient = extractor(&dir, vec![], RunPolicy::Lenient);
        lenient.endpoints = Endpoints::new("http://boom");

        let mut failures = Vec::new();
        let rows = lenient.extract_match_details(&[1, 2], &mut failures).await.unwrap();
        assert_eq!(rows, 0);
        assert_eq!(failures.len(), 6);
        assert_eq!(failures[0].stage, "extract_match_details");

        let mut strict = extractor(&dir, vec![], RunPolicy::Strict);
        strict.endpoints = Endpoints::new("http://boom");
        assert!(strict.extract_match_details(&[1], &mut Vec::new()).await.is_err());
    }
}
