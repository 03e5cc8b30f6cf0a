//! Load stage
//!
//! [`LoadOrchestrator`] turns a [`Dataset`] into database writes through the
//! [`Loader`] seam:
//!
//! 1. schema work (`CREATE TABLE`, added columns, the competition replace)
//!    runs first, one table at a time;
//! 2. matches and lineups are appended whole;
//! 3. events and frames are split by `match_id` and appended on the worker
//!    pool.
//!
//! Update runs restrict the match-keyed tables to the stale match ids and
//! replace the competition table with an explicit column schema.

use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime};
use footy_common::Table;
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions};
use sqlx::query_builder::Separated;
use sqlx::{Connection, QueryBuilder};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{EtlError, Result};
use crate::models::{as_id, columns, Failure, MatchId, RunMode, RunPolicy};
use crate::normalize::LINEUP_CLOCK_COLUMNS;
use crate::pool::{settle, WorkerPool};
use crate::snapshot::Entity;
use crate::transform::Dataset;

/// Rows per insert statement.
pub const APPEND_CHUNK_ROWS: usize = 10_000;

/// Bind parameters allowed in one MySQL prepared statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Rows per insert for a table of `num_columns` columns.
pub fn chunk_size(num_columns: usize) -> usize {
    (MAX_BIND_PARAMS / num_columns.max(1)).clamp(1, APPEND_CHUNK_ROWS)
}

// ============================================================================
// Column schema
// ============================================================================

/// SQL column type declared at the loader boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    BigInt,
    Double,
    Boolean,
    Varchar(u16),
    Text,
    DateTime,
    Time,
    Json,
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Integer => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Varchar(n) => format!("VARCHAR({n})"),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::DateTime => "DATETIME(3)".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::Json => "JSON".to_string(),
        }
    }

    /// Type of a column from its non-null cells.
    fn infer<'a>(cells: impl Iterator<Item = &'a Value>) -> Self {
        let mut inferred: Option<ColumnType> = None;
        for cell in cells {
            let kind = match cell {
                Value::Null => continue,
                Value::Bool(_) => ColumnType::Boolean,
                Value::Number(n) if n.is_i64() => ColumnType::BigInt,
                Value::Number(_) => ColumnType::Double,
                Value::String(_) => ColumnType::Text,
                Value::Array(_) | Value::Object(_) => ColumnType::Json,
            };
            inferred = Some(match (inferred, kind) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(ColumnType::BigInt), ColumnType::Double)
                | (Some(ColumnType::Double), ColumnType::BigInt) => ColumnType::Double,
                (Some(ColumnType::Json), _) | (_, ColumnType::Json) => ColumnType::Json,
                _ => ColumnType::Text,
            });
        }
        inferred.unwrap_or(ColumnType::Text)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

/// Ordered column name → type pairs of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<(String, ColumnType)>,
}

impl TableSchema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        let mut schema = Self::default();
        for (name, ty) in columns {
            schema = schema.with_override(name, ty);
        }
        schema
    }

    /// One entry per column of `table`, typed from its values.
    pub fn infer(table: &Table) -> Self {
        let columns = table
            .columns()
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), ColumnType::infer(table.rows().iter().map(|r| &r[i]))))
            .collect();
        Self { columns }
    }

    /// Set the type of `column`, appending it if absent.
    pub fn with_override(mut self, column: impl Into<String>, ty: ColumnType) -> Self {
        let column = column.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(entry) => entry.1 = ty,
            None => self.columns.push((column, ty)),
        }
        self
    }

    /// Apply every entry of `other` as an override.
    pub fn with_overrides(self, other: &TableSchema) -> Self {
        other
            .columns
            .iter()
            .fold(self, |schema, (name, ty)| schema.with_override(name.clone(), *ty))
    }

    /// Declared types of the competition table.
    pub fn competition() -> Self {
        Self::new([
            (columns::COMPETITION_ID, ColumnType::Integer),
            (columns::SEASON_ID, ColumnType::Integer),
            ("country_name", ColumnType::Varchar(50)),
            ("competition_name", ColumnType::Varchar(50)),
            ("competition_gender", ColumnType::Varchar(50)),
            ("competition_youth", ColumnType::Boolean),
            ("competition_international", ColumnType::Boolean),
            ("season_name", ColumnType::Varchar(50)),
            (columns::MATCH_UPDATED, ColumnType::DateTime),
            ("match_updated_360", ColumnType::DateTime),
            ("match_available_360", ColumnType::DateTime),
            (columns::MATCH_AVAILABLE, ColumnType::DateTime),
        ])
    }

    /// Schema of an entity table: inferred, with the entity's fixed types.
    pub fn for_entity(entity: Entity, table: &Table) -> Self {
        let inferred = Self::infer(table);
        match entity {
            Entity::Competitions => inferred.with_overrides(&Self::competition()),
            Entity::Lineups => LINEUP_CLOCK_COLUMNS
                .iter()
                .filter(|c| table.has_column(c))
                .fold(inferred, |schema, c| schema.with_override(*c, ColumnType::Time)),
            Entity::Matches | Entity::Events | Entity::Frames => {
                if table.has_column(columns::MATCH_ID) {
                    inferred.with_override(columns::MATCH_ID, ColumnType::BigInt)
                } else {
                    inferred
                }
            },
        }
    }

    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<ColumnType> {
        self.columns.iter().find(|(name, _)| name == column).map(|(_, ty)| *ty)
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for `table_name`.
    pub fn create_table_sql(&self, table_name: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|(name, ty)| format!("{} {} NULL", quote_ident(name), ty.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS {} ({columns})", quote_ident(table_name))
    }
}

/// Backtick-quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

// ============================================================================
// Cell binding
// ============================================================================

/// A cell converted for binding to a column of a given type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d"];

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(s, fmt).ok().or_else(|| {
            chrono::NaiveDate::parse_from_str(s, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
    })
}

impl SqlValue {
    pub fn from_cell(cell: &Value, ty: ColumnType) -> Self {
        match (cell, ty) {
            (Value::Null, _) => SqlValue::Null,
            (Value::String(s), ColumnType::DateTime) => match parse_datetime(s) {
                Some(dt) => SqlValue::DateTime(dt),
                None => SqlValue::Text(s.clone()),
            },
            (Value::String(s), ColumnType::Time) => match NaiveTime::parse_from_str(s, "%H:%M:%S") {
                Ok(t) => SqlValue::Time(t),
                Err(_) => SqlValue::Text(s.clone()),
            },
            (Value::Bool(b), _) => SqlValue::Bool(*b),
            (Value::Number(n), _) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    SqlValue::UInt(u)
                } else {
                    n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Null)
                }
            },
            (Value::String(s), _) => SqlValue::Text(s.clone()),
            (other, _) => SqlValue::Text(other.to_string()),
        }
    }

    fn bind<Sep: fmt::Display>(self, b: &mut Separated<'_, '_, MySql, Sep>) {
        match self {
            SqlValue::Null => b.push_bind(None::<String>),
            SqlValue::Bool(v) => b.push_bind(v),
            SqlValue::Int(v) => b.push_bind(v),
            SqlValue::UInt(v) => b.push_bind(v),
            SqlValue::Float(v) => b.push_bind(v),
            SqlValue::Text(v) => b.push_bind(v),
            SqlValue::DateTime(v) => b.push_bind(v),
            SqlValue::Time(v) => b.push_bind(v),
        };
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Persists tables into the target database.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Create the database if it does not exist.
    async fn setup(&self) -> Result<()>;

    /// Create `table_name` if missing and add any columns it lacks.
    /// Alters the schema, so never call it from pool workers.
    async fn prepare(&self, table_name: &str, schema: &TableSchema) -> Result<()>;

    /// Bulk insert, keeping existing rows. Returns rows written.
    async fn append(&self, table: &Table, table_name: &str, schema: &TableSchema) -> Result<u64>;

    /// Drop and recreate `table_name` with `schema`, then insert `table`.
    async fn replace(&self, table: &Table, table_name: &str, schema: &TableSchema) -> Result<u64>;
}

/// sqlx MySQL loader
pub struct MySqlLoader {
    server: MySqlConnectOptions,
    database: String,
    pool: MySqlPool,
}

impl MySqlLoader {
    /// Build the loader; no connection is opened until first use.
    pub fn new(config: &DatabaseConfig) -> Self {
        let server = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy_with(server.clone().database(&config.name));

        Self {
            server,
            database: config.name.clone(),
            pool,
        }
    }

    async fn existing_columns(&self, table_name: &str) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT CAST(column_name AS CHAR) FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ?",
        )
        .bind(table_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }
}

#[async_trait]
impl Loader for MySqlLoader {
    async fn setup(&self) -> Result<()> {
        let mut conn = MySqlConnection::connect_with(&self.server)
            .await
            .map_err(|e| EtlError::Setup(format!("cannot connect to MySQL: {e}")))?;

        let sql = format!("CREATE DATABASE IF NOT EXISTS {}", quote_ident(&self.database));
        sqlx::query(&sql)
            .execute(&mut conn)
            .await
            .map_err(|e| EtlError::Setup(format!("cannot create database {}: {e}", self.database)))?;
        conn.close().await?;

        info!(database = %self.database, "Database ready");
        Ok(())
    }

    async fn prepare(&self, table_name: &str, schema: &TableSchema) -> Result<()> {
        if schema.is_empty() {
            return Ok(());
        }

        sqlx::query(&schema.create_table_sql(table_name))
            .execute(&self.pool)
            .await?;

        let existing = self.existing_columns(table_name).await?;
        let existing: std::collections::HashSet<String> =
            existing.into_iter().map(|c| c.to_lowercase()).collect();

        for (name, ty) in schema.columns() {
            if existing.contains(&name.to_lowercase()) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {} NULL",
                quote_ident(table_name),
                quote_ident(name),
                ty.sql()
            );
            sqlx::query(&sql).execute(&self.pool).await?;
            debug!(table = table_name, column = %name, column_type = %ty, "Added column");
        }
        Ok(())
    }

    async fn append(&self, table: &Table, table_name: &str, schema: &TableSchema) -> Result<u64> {
        if table.is_empty() || table.num_columns() == 0 {
            return Ok(0);
        }

        let types: Vec<ColumnType> = table
            .columns()
            .iter()
            .map(|c| schema.get(c).unwrap_or(ColumnType::Text))
            .collect();
        let column_list = table
            .columns()
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let rows_per_chunk = chunk_size(table.num_columns());
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for chunk in table.rows().chunks(rows_per_chunk) {
            let mut query_builder: QueryBuilder<MySql> =
                QueryBuilder::new(format!("INSERT INTO {} ({column_list}) ", quote_ident(table_name)));

            query_builder.push_values(chunk, |mut b, row| {
                for (cell, ty) in row.iter().zip(&types) {
                    SqlValue::from_cell(cell, *ty).bind(&mut b);
                }
            });

            let result = query_builder.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        debug!(table = table_name, rows = written, "Appended rows");
        Ok(written)
    }

    async fn replace(&self, table: &Table, table_name: &str, schema: &TableSchema) -> Result<u64> {
        let drop = format!("DROP TABLE IF EXISTS {}", quote_ident(table_name));
        sqlx::query(&drop).execute(&self.pool).await?;
        sqlx::query(&schema.create_table_sql(table_name))
            .execute(&self.pool)
            .await?;
        self.append(table, table_name, schema).await
    }
}

// ============================================================================
// Load orchestration
// ============================================================================

/// Split a table into one partition per `match_id`, in first-seen order.
/// Rows without a usable id are dropped with a warning.
pub fn partition_by_match(table: &Table) -> Result<Vec<(MatchId, Table)>> {
    let mut order: Vec<MatchId> = Vec::new();
    let mut groups: HashMap<MatchId, Vec<Vec<Value>>> = HashMap::new();
    let mut orphans = 0usize;

    for row in table.iter() {
        match as_id(row.value(columns::MATCH_ID)) {
            Some(id) => groups
                .entry(id)
                .or_insert_with(|| {
                    order.push(id);
                    Vec::new()
                })
                .push(row.cells().to_vec()),
            None => orphans += 1,
        }
    }
    if orphans > 0 {
        warn!(orphans, "Rows without match_id were not loaded");
    }

    let mut partitions = Vec::with_capacity(order.len());
    for id in order {
        let rows = groups.remove(&id).unwrap_or_default();
        partitions.push((id, Table::from_rows(table.columns().iter().cloned(), rows)?));
    }
    Ok(partitions)
}

/// Rows written per table.
pub type LoadReport = BTreeMap<String, u64>;

pub struct LoadOrchestrator {
    loader: Arc<dyn Loader>,
    pool: WorkerPool,
    policy: RunPolicy,
}

impl LoadOrchestrator {
    pub fn new(loader: Arc<dyn Loader>, pool: WorkerPool, policy: RunPolicy) -> Self {
        Self {
            loader,
            pool,
            policy,
        }
    }

    /// Load `dataset`. In update mode only `stale_ids` are loaded and the
    /// competition table is replaced wholesale.
    pub async fn load(
        &self,
        dataset: Dataset,
        mode: RunMode,
        stale_ids: &[MatchId],
        failures: &mut Vec<Failure>,
    ) -> Result<LoadReport> {
        let dataset = match mode {
            RunMode::Full => dataset,
            RunMode::Update => dataset.restrict_to(stale_ids),
        };
        let mut report = LoadReport::new();

        // Schema changes, one table at a time, before any concurrent insert.
        let mut schemas: HashMap<Entity, TableSchema> = HashMap::new();
        for entity in Entity::ALL {
            let table = dataset.table(entity);
            if table.is_empty() || table.num_columns() == 0 {
                debug!(table = entity.table_name(), "Nothing to load");
                continue;
            }
            let schema = TableSchema::for_entity(entity, table);

            if entity == Entity::Competitions && mode == RunMode::Update {
                let rows = self.loader.replace(table, entity.table_name(), &schema).await?;
                report.insert(entity.table_name().to_string(), rows);
                continue;
            }
            self.loader.prepare(entity.table_name(), &schema).await?;
            schemas.insert(entity, schema);
        }

        for entity in [Entity::Competitions, Entity::Matches, Entity::Lineups] {
            if let Some(schema) = schemas.get(&entity) {
                let rows = self
                    .loader
                    .append(dataset.table(entity), entity.table_name(), schema)
                    .await?;
                report.insert(entity.table_name().to_string(), rows);
            }
        }

        for entity in [Entity::Events, Entity::Frames] {
            if let Some(schema) = schemas.get(&entity) {
                let rows = self
                    .append_partitioned(entity, dataset.table(entity), schema, failures)
                    .await?;
                report.insert(entity.table_name().to_string(), rows);
            }
        }

        info!(?report, "Load complete");
        Ok(report)
    }

    async fn append_partitioned(
        &self,
        entity: Entity,
        table: &Table,
        schema: &TableSchema,
        failures: &mut Vec<Failure>,
    ) -> Result<u64> {
        let partitions: HashMap<MatchId, Table> = partition_by_match(table)?.into_iter().collect();
        let mut keys: Vec<MatchId> = partitions.keys().copied().collect();
        keys.sort_unstable();

        let stage = format!("load_{}", entity.table_name());
        let partitions = Arc::new(partitions);
        let schema = Arc::new(schema.clone());
        let outcomes = self
            .pool
            .run(&stage, keys, |match_id| {
                let loader = self.loader.clone();
                let partitions = partitions.clone();
                let schema = schema.clone();
                async move {
                    match partitions.get(&match_id) {
                        Some(part) => loader.append(part, entity.table_name(), &schema).await,
                        None => Ok(0),
                    }
                }
            })
            .await;

        let settled = settle(&stage, outcomes, self.policy, failures)?;
        Ok(settled.iter().map(|(_, rows)| rows).sum())
    }
}
