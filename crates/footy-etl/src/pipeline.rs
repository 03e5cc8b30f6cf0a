//! End-to-end ETL run
//!
//! setup → extract (reconcile first in update mode) → transform → load.
//!
//! Under [`RunPolicy::Lenient`] a failing phase is logged at error level with
//! `critical = true`, recorded in [`RunReport::failures`] and ends the run
//! with `Ok`; a failed database setup is recorded and the run carries on.
//! Under [`RunPolicy::Strict`] the first failure is returned.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::EtlConfig;
use crate::error::Result;
use crate::extract::Extractor;
use crate::load::{LoadOrchestrator, LoadReport, Loader, MySqlLoader};
use crate::models::{Failure, MatchId, RunMode, RunPolicy};
use crate::pool::WorkerPool;
use crate::reconcile::Reconciler;
use crate::snapshot::SnapshotStore;
use crate::source::{Endpoints, HttpFetcher, ResourceFetcher};
use crate::transform::Transformer;

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: RunMode,
    /// Competition seasons whose matches were (re)fetched
    pub seasons: usize,
    /// Matches whose details were (re)fetched
    pub match_ids: Vec<MatchId>,
    pub rows_loaded: LoadReport,
    pub failures: Vec<Failure>,
    /// Whether every phase ran
    pub completed: bool,
    pub duration_secs: f64,
}

impl RunReport {
    fn new(run_id: Uuid, mode: RunMode) -> Self {
        Self {
            run_id,
            mode,
            seasons: 0,
            match_ids: Vec::new(),
            rows_loaded: LoadReport::new(),
            failures: Vec::new(),
            completed: false,
            duration_secs: 0.0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.completed && self.failures.is_empty()
    }
}

pub struct Pipeline {
    fetcher: Arc<dyn ResourceFetcher>,
    loader: Arc<dyn Loader>,
    endpoints: Endpoints,
    store: SnapshotStore,
    config: EtlConfig,
    policy: RunPolicy,
}

impl Pipeline {
    pub fn new(config: EtlConfig, fetcher: Arc<dyn ResourceFetcher>, loader: Arc<dyn Loader>) -> Self {
        Self {
            fetcher,
            loader,
            endpoints: Endpoints::new(config.api.base_url.clone()),
            store: SnapshotStore::new(config.data_dir.clone()),
            policy: RunPolicy::from_strict(config.strict),
            config,
        }
    }

    /// Pipeline against the configured HTTP source and MySQL database.
    pub fn from_config(config: EtlConfig) -> Result<Self> {
        let fetcher = HttpFetcher::from_config(&config.api)?;
        let loader = MySqlLoader::new(&config.database);
        Ok(Self::new(config, Arc::new(fetcher), Arc::new(loader)))
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub async fn run(&self, mode: RunMode) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("etl_run", %run_id, %mode);
        self.run_inner(run_id, mode).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, mode: RunMode) -> Result<RunReport> {
        let start = Instant::now();
        let mut report = RunReport::new(run_id, mode);
        info!(policy = ?self.policy, workers = self.config.workers, "ETL run started");

        self.store.ensure_layout()?;

        info!("Setting up database");
        if let Err(e) = self.loader.setup().await {
            if self.policy == RunPolicy::Strict {
                return Err(e);
            }
            error!(critical = true, error = %e, "Database setup failed, continuing");
            report.failures.push(Failure::new("setup", "database", &e));
        }

        let pool = WorkerPool::new(self.config.workers);
        let extractor = Extractor::new(
            self.fetcher.clone(),
            self.endpoints.clone(),
            self.store.clone(),
            self.config.scope.season_filter(),
            pool,
            self.policy,
        );

        info!("Extracting data");
        let extracted = self.extract(&extractor, mode, &mut report).await;
        let Some(match_ids) = self.phase("extract", extracted, &mut report)? else {
            return Ok(self.finish(report, start));
        };
        report.match_ids = match_ids;

        info!("Transforming data");
        let transformed = Transformer::new(&self.store).transform();
        let Some(dataset) = self.phase("transform", transformed, &mut report)? else {
            return Ok(self.finish(report, start));
        };

        info!("Loading data");
        let orchestrator = LoadOrchestrator::new(self.loader.clone(), pool, self.policy);
        let mut failures = Vec::new();
        let loaded = orchestrator
            .load(dataset, mode, &report.match_ids, &mut failures)
            .await;
        report.failures.extend(failures);
        let Some(rows) = self.phase("load", loaded, &mut report)? else {
            return Ok(self.finish(report, start));
        };
        report.rows_loaded = rows;
        report.completed = true;

        Ok(self.finish(report, start))
    }

    /// Returns the match ids whose details were fetched.
    async fn extract(
        &self,
        extractor: &Extractor,
        mode: RunMode,
        report: &mut RunReport,
    ) -> Result<Vec<MatchId>> {
        let match_ids = match mode {
            RunMode::Full => {
                let seasons = extractor.extract_competitions().await?;
                report.seasons = seasons.len();
                extractor.extract_matches(&seasons, &mut report.failures).await?
            },
            RunMode::Update => {
                let reconciler = Reconciler::new(extractor);
                let seasons = reconciler.update_competitions().await?;
                report.seasons = seasons.len();
                reconciler.update_matches(&seasons, &mut report.failures).await?
            },
        };

        extractor
            .extract_match_details(&match_ids, &mut report.failures)
            .await?;
        Ok(match_ids)
    }

    /// `Some` on success; `None` after recording a lenient failure.
    fn phase<T>(&self, stage: &str, result: Result<T>, report: &mut RunReport) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.policy == RunPolicy::Strict => Err(e),
            Err(e) => {
                error!(critical = true, stage, error = %e, "Phase failed, ending run");
                report.failures.push(Failure::new(stage, "-", &e));
                Ok(None)
            },
        }
    }

    fn finish(&self, mut report: RunReport, start: Instant) -> RunReport {
        report.duration_secs = start.elapsed().as_secs_f64();
        info!(
            completed = report.completed,
            seasons = report.seasons,
            matches = report.match_ids.len(),
            failures = report.failures.len(),
            duration_secs = report.duration_secs,
            "ETL run finished"
        );
        report
    }
}
