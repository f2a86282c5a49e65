//! DuckDB-backed store
//!
//! Keeps the change log, gaps and outgoing batches in DuckDB tables. Range
//! queries run on a cloned connection in a blocking task and stream rows
//! back through a bounded channel.

use super::types::{ChangeLogStore, GapSnapshot, PassCommit, RoutingStore, RowStream};
use crate::batch::{BatchStatus, OutgoingBatch};
use crate::cursor::ChangeRow;
use crate::error::{Error, Result};
use crate::gap::DataGap;
use crate::query::{render_sql, Projection, QuerySpec, RenderedQuery, SqlDialect, SqlParam};
use crate::types::{DataId, EventType, Timestamp};
use async_trait::async_trait;
use chrono::DateTime;
use duckdb::types::Value;
use duckdb::{params, params_from_iter, Connection, OptionalExt};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Rows buffered between the query thread and the cursor
const STREAM_BUFFER: usize = 256;

const SCHEMA: &str = r"
create sequence if not exists seq_data_id start 1;

create table if not exists sym_data (
    data_id bigint primary key,
    channel_id varchar not null,
    table_name varchar not null,
    event_type varchar not null,
    row_data varchar,
    pk_data varchar,
    old_data varchar,
    transaction_id varchar,
    source_node_id varchar,
    create_time timestamp not null
);

create table if not exists sym_data_gap (
    channel_id varchar not null,
    start_id bigint not null,
    end_id bigint not null,
    create_time timestamp not null,
    primary key (channel_id, start_id, end_id)
);

create table if not exists sym_data_gap_version (
    channel_id varchar primary key,
    version bigint not null,
    last_busy_expire timestamp
);

alter table sym_data_gap_version add column if not exists last_busy_expire timestamp;

create table if not exists sym_outgoing_batch (
    batch_id bigint primary key,
    channel_id varchar not null,
    node_id varchar not null,
    status varchar not null,
    data_count bigint not null,
    byte_count bigint not null,
    create_time timestamp not null
);

create table if not exists sym_data_event (
    batch_id bigint not null,
    seq integer not null,
    data_id bigint not null,
    primary key (batch_id, seq)
);
";

/// Store backed by a DuckDB database
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    dialect: SqlDialect,
    path: String,
}

impl std::fmt::Debug for DuckDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl DuckDbStore {
    /// Open (or create) a database file and ensure the schema exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            Error::config(format!("Failed to open DuckDB at {}: {e}", path.display()))
        })?;
        Self::with_connection(conn, path.display().to_string())
    }

    /// In-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::config(format!("Failed to create DuckDB connection: {e}")))?;
        Self::with_connection(conn, ":memory:".to_string())
    }

    fn with_connection(conn: Connection, path: String) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::config(format!("Failed to create routing schema: {e}")))?;
        info!(path = %path, "Opened DuckDB routing store");
        Ok(Self {
            conn: Mutex::new(conn),
            dialect: SqlDialect::duckdb(),
            path,
        })
    }

    /// SQL dialect used for change-log queries
    pub fn dialect(&self) -> &SqlDialect {
        &self.dialect
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::store("DuckDB connection lock poisoned"))
    }

    /// Reserve the next data id without writing a row
    pub fn reserve_data_id(&self) -> Result<DataId> {
        let conn = self.connection()?;
        Ok(conn.query_row("select nextval('seq_data_id')", [], |row| row.get(0))?)
    }

    /// Append a row under the next data id, returning the id
    pub fn append(&self, row: &ChangeRow) -> Result<DataId> {
        let id = self.reserve_data_id()?;
        self.insert_row(&ChangeRow {
            data_id: id,
            ..row.clone()
        })?;
        Ok(id)
    }

    /// Write a row under the id it already carries
    pub fn insert_row(&self, row: &ChangeRow) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "insert into sym_data (data_id, channel_id, table_name, event_type, row_data, \
             pk_data, old_data, transaction_id, source_node_id, create_time) \
             values (?, ?, ?, ?, ?, ?, ?, ?, ?, make_timestamp(?))",
            params![
                row.data_id,
                row.channel_id,
                row.table_name,
                row.event_type.code(),
                row.row_data,
                row.pk_data,
                row.old_data,
                row.transaction_id,
                row.source_node_id,
                row.create_time.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    /// Render the select a query would run
    pub fn render(&self, query: &QuerySpec) -> Result<RenderedQuery> {
        render_sql(query, &self.dialect)
    }

    fn count(&self, sql: &str, channel_id: &str, start: DataId, end: DataId) -> Result<u64> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(sql, params![channel_id, start, end], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn to_timestamp(micros: i64) -> Result<Timestamp> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::store(format!("Timestamp out of range: {micros}")))
}

fn to_value(param: &SqlParam) -> Value {
    match param {
        SqlParam::Text(text) => Value::Text(text.clone()),
        SqlParam::Id(id) => Value::BigInt(*id),
    }
}

/// Raw columns of one change-log row, in select order
struct RawRow {
    data_id: DataId,
    table_name: String,
    event_type: String,
    transaction_id: Option<String>,
    source_node_id: Option<String>,
    create_time_us: i64,
    payload: [Option<String>; 3],
}

fn read_raw(row: &duckdb::Row<'_>, projection: Projection) -> duckdb::Result<RawRow> {
    let mut raw = RawRow {
        data_id: row.get(0)?,
        table_name: row.get(1)?,
        event_type: row.get(2)?,
        transaction_id: row.get(3)?,
        source_node_id: row.get(4)?,
        create_time_us: row.get(5)?,
        payload: [None, None, None],
    };
    let mut idx = 6;
    for (slot, selected) in [projection.row_data, projection.pk_data, projection.old_data]
        .into_iter()
        .enumerate()
    {
        if selected {
            raw.payload[slot] = row.get(idx)?;
            idx += 1;
        }
    }
    Ok(raw)
}

fn into_change_row(raw: RawRow, channel_id: &str) -> Result<ChangeRow> {
    let event_type = EventType::from_code(&raw.event_type)
        .ok_or_else(|| Error::store(format!("Unknown event type '{}'", raw.event_type)))?;
    let [row_data, pk_data, old_data] = raw.payload;
    Ok(ChangeRow {
        data_id: raw.data_id,
        table_name: raw.table_name,
        event_type,
        row_data,
        pk_data,
        old_data,
        transaction_id: raw.transaction_id,
        channel_id: channel_id.to_string(),
        source_node_id: raw.source_node_id,
        create_time: to_timestamp(raw.create_time_us)?,
    })
}

/// Runs on a blocking thread; stops early once the receiver is dropped
fn stream_rows(
    conn: &Connection,
    rendered: &RenderedQuery,
    projection: Projection,
    channel_id: &str,
    tx: &mpsc::Sender<Result<ChangeRow>>,
) -> Result<()> {
    let mut stmt = conn.prepare(&rendered.sql)?;
    let mut rows = stmt.query(params_from_iter(rendered.params.iter().map(to_value)))?;
    while let Some(row) = rows.next()? {
        let change = into_change_row(read_raw(row, projection)?, channel_id)?;
        if tx.blocking_send(Ok(change)).is_err() {
            return Ok(());
        }
    }
    Ok(())
}

/// Rows streamed from a query thread
struct DuckDbRows {
    peeked: Option<ChangeRow>,
    rx: mpsc::Receiver<Result<ChangeRow>>,
}

#[async_trait]
impl RowStream for DuckDbRows {
    async fn next_row(&mut self) -> Result<Option<ChangeRow>> {
        if let Some(row) = self.peeked.take() {
            return Ok(Some(row));
        }
        self.rx.recv().await.transpose()
    }
}

#[async_trait]
impl ChangeLogStore for DuckDbStore {
    async fn execute_range_query(&self, query: &QuerySpec) -> Result<Box<dyn RowStream>> {
        let rendered = self.render(query)?;
        debug!(channel_id = %query.channel_id, sql = %rendered.sql, "Executing change-log query");

        let conn = self.connection()?.try_clone()?;
        let projection = query.projection;
        let channel_id = query.channel_id.clone();
        let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
        tokio::task::spawn_blocking(move || {
            let result = stream_rows(&conn, &rendered, projection, &channel_id, &tx);
            // release the connection before the stream reports its end
            drop(conn);
            if let Err(e) = result {
                let _ = tx.blocking_send(Err(e));
            }
        });

        // Failures to prepare or execute surface here so the caller can retry
        let peeked = match rx.recv().await {
            Some(Ok(row)) => Some(row),
            Some(Err(e)) => return Err(e),
            None => None,
        };
        Ok(Box::new(DuckDbRows { peeked, rx }))
    }

    async fn count_data_in_range(
        &self,
        channel_id: &str,
        start: DataId,
        end: DataId,
    ) -> Result<u64> {
        self.count(
            "select count(*) from sym_data where channel_id = ? and data_id between ? and ?",
            channel_id,
            start,
            end,
        )
    }

    async fn count_unrouted(&self, channel_id: &str, after: DataId) -> Result<u64> {
        self.count(
            "select count(*) from sym_data where channel_id = ? and data_id > ? and data_id <= ?",
            channel_id,
            after,
            DataId::MAX,
        )
    }
}

#[async_trait]
impl RoutingStore for DuckDbStore {
    async fn load_gaps(&self, channel_id: &str) -> Result<GapSnapshot> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "select start_id, end_id, epoch_us(create_time) from sym_data_gap \
             where channel_id = ? order by start_id, end_id",
        )?;
        let raw: Vec<(DataId, DataId, i64)> = stmt
            .query_map([channel_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<duckdb::Result<_>>()?;
        let gaps = raw
            .into_iter()
            .map(|(start, end, micros)| Ok(DataGap::new(start, end, to_timestamp(micros)?)))
            .collect::<Result<Vec<_>>>()?;

        let state: Option<(i64, Option<i64>)> = conn
            .query_row(
                "select version, epoch_us(last_busy_expire) from sym_data_gap_version \
                 where channel_id = ?",
                [channel_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (version, busy_micros) = state.unwrap_or((0, None));

        Ok(GapSnapshot {
            gaps,
            version: version.max(0) as u64,
            last_busy_expire: busy_micros.map(to_timestamp).transpose()?,
        })
    }

    async fn last_routed_data_id(&self, channel_id: &str) -> Result<Option<DataId>> {
        let conn = self.connection()?;
        Ok(conn.query_row(
            "select max(e.data_id) from sym_data_event e \
             join sym_outgoing_batch b on b.batch_id = e.batch_id where b.channel_id = ?",
            [channel_id],
            |row| row.get(0),
        )?)
    }

    async fn max_batch_id(&self) -> Result<i64> {
        let conn = self.connection()?;
        Ok(conn.query_row(
            "select coalesce(max(batch_id), 0) from sym_outgoing_batch",
            [],
            |row| row.get(0),
        )?)
    }

    async fn commit(&self, commit: PassCommit) -> Result<u64> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;

        let current: Option<i64> = tx
            .query_row(
                "select version from sym_data_gap_version where channel_id = ?",
                [&commit.channel_id],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.unwrap_or(0).max(0) as u64;
        if current != commit.expected_version {
            return Err(Error::gap_conflict(&commit.channel_id));
        }

        for gap in &commit.gap_delta.to_delete {
            tx.execute(
                "delete from sym_data_gap where channel_id = ? and start_id = ? and end_id = ?",
                params![commit.channel_id, gap.start_id, gap.end_id],
            )?;
        }
        for gap in &commit.gap_delta.to_insert {
            tx.execute(
                "insert or replace into sym_data_gap (channel_id, start_id, end_id, create_time) \
                 values (?, ?, ?, make_timestamp(?))",
                params![
                    commit.channel_id,
                    gap.start_id,
                    gap.end_id,
                    gap.create_time.timestamp_micros()
                ],
            )?;
        }

        for batch in &commit.batches {
            tx.execute(
                "insert into sym_outgoing_batch (batch_id, channel_id, node_id, status, \
                 data_count, byte_count, create_time) values (?, ?, ?, ?, ?, ?, make_timestamp(?))",
                params![
                    batch.batch_id,
                    batch.channel_id,
                    batch.node_id,
                    BatchStatus::New.code(),
                    batch.len() as i64,
                    batch.byte_count as i64,
                    batch.create_time.timestamp_micros()
                ],
            )?;
            let mut stmt = tx
                .prepare("insert into sym_data_event (batch_id, seq, data_id) values (?, ?, ?)")?;
            for (seq, data_id) in batch.data_ids.iter().enumerate() {
                stmt.execute(params![batch.batch_id, seq as i64, data_id])?;
            }
        }

        let new_version = current + 1;
        tx.execute(
            "insert or replace into sym_data_gap_version (channel_id, version, last_busy_expire) \
             values (?, ?, make_timestamp(?))",
            params![
                commit.channel_id,
                new_version as i64,
                commit.last_busy_expire.map(|at| at.timestamp_micros())
            ],
        )?;
        tx.commit()?;
        Ok(new_version)
    }

    async fn batches(&self, channel_id: &str) -> Result<Vec<OutgoingBatch>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "select batch_id, node_id, status, byte_count, epoch_us(create_time) \
             from sym_outgoing_batch where channel_id = ? order by batch_id",
        )?;
        let headers: Vec<(i64, String, String, i64, i64)> = stmt
            .query_map([channel_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<duckdb::Result<_>>()?;

        let mut events =
            conn.prepare("select data_id from sym_data_event where batch_id = ? order by seq")?;
        let mut batches = Vec::with_capacity(headers.len());
        for (batch_id, node_id, status, byte_count, micros) in headers {
            let data_ids = events
                .query_map([batch_id], |row| row.get(0))?
                .collect::<duckdb::Result<Vec<DataId>>>()?;
            batches.push(OutgoingBatch {
                batch_id,
                channel_id: channel_id.to_string(),
                node_id,
                data_ids,
                status: BatchStatus::from_code(&status).unwrap_or(BatchStatus::New),
                byte_count: byte_count.max(0) as u64,
                create_time: to_timestamp(micros)?,
            });
        }
        Ok(batches)
    }
}
