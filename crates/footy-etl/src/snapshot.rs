//! Columnar snapshot store
//!
//! Intermediate tables are persisted as Parquet files, one per entity
//! partition, under a fixed directory layout:
//!
//! ```text
//! <root>/competition/competition.parquet
//! <root>/matches/matches_{competition_id}_{season_id}.parquet
//! <root>/lineups/lineups_{match_id}.parquet
//! <root>/events/events_{match_id}.parquet
//! <root>/frames/frames_{match_id}.parquet
//! ```
//!
//! Column types are inferred per column from the JSON cells. Columns whose
//! cells are not all of one scalar JSON type (lists, objects, mixed numbers)
//! are stored as JSON text and tagged in the Arrow field metadata, so a read
//! gives back exactly the cells that were written.

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use footy_common::Table;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{EtlError, Result};
use crate::models::{CompetitionSeason, MatchId};

/// Field metadata key marking JSON-encoded columns.
const ENCODING_KEY: &str = "footy.encoding";
const JSON_ENCODING: &str = "json";
const EXTENSION: &str = "parquet";

/// Entity types handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Competitions,
    Matches,
    Lineups,
    Events,
    Frames,
}

impl Entity {
    pub const ALL: [Entity; 5] = [
        Entity::Competitions,
        Entity::Matches,
        Entity::Lineups,
        Entity::Events,
        Entity::Frames,
    ];

    /// Folder (and file prefix) of the entity's snapshots.
    pub fn folder(self) -> &'static str {
        match self {
            Entity::Competitions => "competition",
            Entity::Matches => "matches",
            Entity::Lineups => "lineups",
            Entity::Events => "events",
            Entity::Frames => "frames",
        }
    }

    /// Destination table in the relational database.
    pub fn table_name(self) -> &'static str {
        self.folder()
    }

    /// Whether the entity is partitioned by match id.
    pub fn per_match(self) -> bool {
        matches!(self, Entity::Lineups | Entity::Events | Entity::Frames)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

/// Partition of an entity's snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    /// Unpartitioned table (competitions)
    Whole,
    Season(CompetitionSeason),
    Match(MatchId),
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Whole => f.write_str("all"),
            PartitionKey::Season(season) => write!(f, "{season}"),
            PartitionKey::Match(id) => write!(f, "{id}"),
        }
    }
}

/// Parquet-backed snapshot store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the per-entity folders.
    pub fn ensure_layout(&self) -> Result<()> {
        for entity in Entity::ALL {
            std::fs::create_dir_all(self.root.join(entity.folder()))?;
        }
        Ok(())
    }

    /// File holding `entity` at `key`.
    pub fn path(&self, entity: Entity, key: &PartitionKey) -> Result<PathBuf> {
        let file = match (entity, key) {
            (Entity::Competitions, PartitionKey::Whole) => format!("competition.{EXTENSION}"),
            (Entity::Matches, PartitionKey::Season(season)) => {
                format!("matches_{season}.{EXTENSION}")
            },
            (e, PartitionKey::Match(id)) if e.per_match() => {
                format!("{}_{id}.{EXTENSION}", e.folder())
            },
            _ => {
                return Err(EtlError::Config(format!(
                    "{entity} snapshots are not partitioned by {key}"
                )))
            },
        };
        Ok(self.root.join(entity.folder()).join(file))
    }

    /// Persist `table` as the partition `key`, replacing any previous copy.
    pub fn write(&self, entity: Entity, key: &PartitionKey, table: &Table) -> Result<()> {
        if table.num_columns() == 0 {
            return Err(EtlError::EmptySnapshot(entity));
        }

        let path = self.path(entity, key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let batch = table_to_batch(table)?;
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        {
            let file = File::create(&tmp)?;
            let props = WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build();
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
            writer.write(&batch)?;
            writer.close()?;
        }
        std::fs::rename(&tmp, &path)?;

        debug!(
            entity = %entity,
            partition = %key,
            rows = table.len(),
            columns = table.num_columns(),
            "Snapshot written"
        );
        Ok(())
    }

    /// Last persisted copy of `entity` at `key`.
    pub fn read(&self, entity: Entity, key: &PartitionKey) -> Result<Table> {
        let path = self.path(entity, key)?;
        if !path.exists() {
            return Err(EtlError::SnapshotNotFound {
                entity,
                partition: key.to_string(),
            });
        }
        read_file(&path)
    }

    /// Like [`read`](Self::read) but a missing partition is `None`.
    pub fn read_optional(&self, entity: Entity, key: &PartitionKey) -> Result<Option<Table>> {
        match self.read(entity, key) {
            Ok(table) => Ok(Some(table)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every partition of `entity` combined, in file-name order.
    pub fn read_all(&self, entity: Entity) -> Result<Table> {
        if entity == Entity::Competitions {
            return Ok(self
                .read_optional(entity, &PartitionKey::Whole)?
                .unwrap_or_default());
        }

        let dir = self.root.join(entity.folder());
        if !dir.exists() {
            return Ok(Table::default());
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let tables = paths
            .iter()
            .map(|p| read_file(p))
            .collect::<Result<Vec<_>>>()?;

        debug!(entity = %entity, partitions = tables.len(), "Snapshots combined");
        Ok(Table::concat(tables))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Int64,
    Float64,
    Utf8,
    Json,
}

fn cell_kind(value: &Value) -> Option<ColumnKind> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(ColumnKind::Boolean),
        Value::Number(n) if n.is_i64() => Some(ColumnKind::Int64),
        Value::Number(n) if n.is_f64() => Some(ColumnKind::Float64),
        Value::String(_) => Some(ColumnKind::Utf8),
        _ => Some(ColumnKind::Json),
    }
}

/// Single scalar kind shared by every non-null cell, else JSON text.
fn infer_kind<'a>(values: impl Iterator<Item = &'a Value>) -> ColumnKind {
    let mut kind = None;
    for value in values {
        match (kind, cell_kind(value)) {
            (_, None) => {},
            (_, Some(ColumnKind::Json)) => return ColumnKind::Json,
            (None, Some(k)) => kind = Some(k),
            (Some(prev), Some(k)) if prev != k => return ColumnKind::Json,
            _ => {},
        }
    }
    kind.unwrap_or(ColumnKind::Json)
}

fn table_to_batch(table: &Table) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.num_columns());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.num_columns());

    for (i, name) in table.columns().iter().enumerate() {
        let cells = || table.rows().iter().map(move |r| &r[i]);
        let kind = infer_kind(cells());

        let (data_type, array): (DataType, ArrayRef) = match kind {
            ColumnKind::Boolean => (
                DataType::Boolean,
                Arc::new(BooleanArray::from(
                    cells().map(Value::as_bool).collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Int64 => (
                DataType::Int64,
                Arc::new(Int64Array::from(
                    cells().map(Value::as_i64).collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Float64 => (
                DataType::Float64,
                Arc::new(Float64Array::from(
                    cells().map(Value::as_f64).collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Utf8 => (
                DataType::Utf8,
                Arc::new(StringArray::from(
                    cells().map(Value::as_str).collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Json => {
                let encoded = cells()
                    .map(|v| match v {
                        Value::Null => Ok(None),
                        other => serde_json::to_string(other).map(Some),
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                (DataType::Utf8, Arc::new(StringArray::from(encoded)))
            },
        };

        let mut field = Field::new(name.as_str(), data_type, true);
        if kind == ColumnKind::Json {
            field = field.with_metadata(HashMap::from([(
                ENCODING_KEY.to_string(),
                JSON_ENCODING.to_string(),
            )]));
        }
        fields.push(field);
        arrays.push(array);
    }

    let schema: SchemaRef = Arc::new(Schema::new(fields));
    Ok(RecordBatch::try_new(schema, arrays)?)
}

fn read_file(path: &Path) -> Result<Table> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for batch in reader {
        let batch = batch?;
        let mut batch_rows = vec![Vec::with_capacity(schema.fields().len()); batch.num_rows()];
        for (field, array) in schema.fields().iter().zip(batch.columns()) {
            let values = column_values(field, array)?;
            for (row, value) in batch_rows.iter_mut().zip(values) {
                row.push(value);
            }
        }
        rows.extend(batch_rows);
    }

    let columns = schema.fields().iter().map(|f| f.name().clone());
    Ok(Table::from_rows(columns, rows)?)
}

fn column_values(field: &Field, array: &ArrayRef) -> Result<Vec<Value>> {
    let unsupported = || EtlError::UnsupportedColumn {
        column: field.name().clone(),
        data_type: field.data_type().to_string(),
    };
    let is_json = field.metadata().get(ENCODING_KEY).map(String::as_str) == Some(JSON_ENCODING);

    let values = match field.data_type() {
        DataType::Boolean => array
            .as_boolean_opt()
            .ok_or_else(unsupported)?
            .iter()
            .map(|v| v.map(Value::Bool).unwrap_or(Value::Null))
            .collect(),
        DataType::Int64 => array
            .as_primitive_opt::<Int64Type>()
            .ok_or_else(unsupported)?
            .iter()
            .map(|v| v.map(Value::from).unwrap_or(Value::Null))
            .collect(),
        DataType::Float64 => array
            .as_primitive_opt::<Float64Type>()
            .ok_or_else(unsupported)?
            .iter()
            .map(|v| v.map(Value::from).unwrap_or(Value::Null))
            .collect(),
        DataType::Utf8 => {
            let strings = array.as_string_opt::<i32>().ok_or_else(unsupported)?;
            let mut out = Vec::with_capacity(strings.len());
            for v in strings.iter() {
                out.push(match v {
                    None => Value::Null,
                    Some(s) if is_json => serde_json::from_str(s)?,
                    Some(s) => Value::String(s.to_string()),
                });
            }
            out
        },
        _ => return Err(unsupported()),
    };
    Ok(values)
}
