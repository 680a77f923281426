// SQLite Offline Store
//
// A single writer task owns the connection. Every operation is a message on
// an unbounded channel, so producers never wait on disk I/O; callers that
// need an answer await a oneshot reply.

use crate::connection::create_connection;
use crate::error::map_sqlx_error;
use crate::migration::run_migrations;
use async_trait::async_trait;
use outpost_core::domain::{ActivityId, OfflineRecord};
use outpost_core::error::{AppError, Result};
use outpost_core::port::OfflineStore;
use sqlx::{Connection, FromRow, QueryBuilder, Sqlite, SqliteConnection};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

enum StoreTask {
    Insert {
        record: OfflineRecord,
        reply: oneshot::Sender<bool>,
    },
    Select {
        limit: usize,
        reply: oneshot::Sender<Result<Vec<OfflineRecord>>>,
    },
    Delete {
        row_ids: Vec<i64>,
        activities: Vec<ActivityId>,
        reply: oneshot::Sender<Result<u64>>,
    },
    Truncate {
        keep_activities: Vec<ActivityId>,
        reply: oneshot::Sender<Result<u64>>,
    },
    Close,
}

#[derive(FromRow)]
struct DataRow {
    row_id: i64,
    activity: String,
    timestamp: i64,
    return_code: i64,
    output: Vec<u8>,
    metrics: Option<Vec<u8>>,
}

impl From<DataRow> for OfflineRecord {
    fn from(row: DataRow) -> Self {
        OfflineRecord {
            row_id: Some(row.row_id),
            activity: row.activity,
            timestamp: row.timestamp,
            return_code: row.return_code as i32,
            output: row.output,
            metrics: row.metrics,
        }
    }
}

pub struct SqliteOfflineStore {
    tx: mpsc::UnboundedSender<StoreTask>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl SqliteOfflineStore {
    /// Open (creating if needed) and migrate the database, then start the writer
    pub async fn open(database_url: &str) -> Result<Self> {
        let mut conn = create_connection(database_url).await?;
        run_migrations(&mut conn).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(writer_loop(conn, rx));
        info!(database = %database_url, "Offline store opened");

        Ok(Self {
            tx,
            writer: Mutex::new(Some(writer)),
        })
    }

    fn closed_error() -> AppError {
        AppError::Database("offline store closed".to_string())
    }
}

async fn writer_loop(mut conn: SqliteConnection, mut rx: mpsc::UnboundedReceiver<StoreTask>) {
    while let Some(task) = rx.recv().await {
        if matches!(task, StoreTask::Close) {
            break;
        }
        perform(&mut conn, task).await;
    }

    // No new work accepted; pending writes still land, pending reads are dropped
    rx.close();
    let mut drained = 0usize;
    while let Ok(task) = rx.try_recv() {
        match task {
            StoreTask::Select { .. } | StoreTask::Close => {}
            task => {
                perform(&mut conn, task).await;
                drained += 1;
            }
        }
    }

    if let Err(e) = conn.close().await {
        error!(error = %e, "Failed to close offline store connection");
    }
    info!(drained, "Offline store closed");
}

async fn perform(conn: &mut SqliteConnection, task: StoreTask) {
    match task {
        StoreTask::Insert { record, reply } => {
            let _ = reply.send(insert(conn, &record).await);
        }
        StoreTask::Select { limit, reply } => {
            let _ = reply.send(select(conn, limit).await);
        }
        StoreTask::Delete {
            row_ids,
            activities,
            reply,
        } => {
            let _ = reply.send(delete(conn, &row_ids, &activities).await);
        }
        StoreTask::Truncate {
            keep_activities,
            reply,
        } => {
            let _ = reply.send(truncate(conn, &keep_activities).await);
        }
        StoreTask::Close => {}
    }
}

async fn insert(conn: &mut SqliteConnection, record: &OfflineRecord) -> bool {
    let result = sqlx::query(
        "INSERT INTO data (activity, timestamp, return_code, output, metrics)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(record.activity.as_str())
    .bind(record.timestamp)
    .bind(record.return_code)
    .bind(record.output.as_slice())
    .bind(record.metrics.as_deref())
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error);

    match result {
        Ok(_) => true,
        Err(AppError::Conflict(_)) => {
            debug!(
                activity_id = %record.activity,
                timestamp = record.timestamp,
                "Duplicate offline record ignored"
            );
            false
        }
        Err(e) => {
            error!(activity_id = %record.activity, error = %e, "Failed to insert offline record");
            false
        }
    }
}

async fn select(conn: &mut SqliteConnection, limit: usize) -> Result<Vec<OfflineRecord>> {
    let rows: Vec<DataRow> = sqlx::query_as(
        "SELECT ROWID AS row_id, activity, timestamp, return_code, output, metrics
         FROM data ORDER BY timestamp ASC, ROWID ASC LIMIT ?",
    )
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(OfflineRecord::from).collect())
}

async fn delete(
    conn: &mut SqliteConnection,
    row_ids: &[i64],
    activities: &[ActivityId],
) -> Result<u64> {
    if row_ids.is_empty() && activities.is_empty() {
        return Ok(0);
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM data WHERE ");
    if !row_ids.is_empty() {
        builder.push("ROWID IN (");
        let mut separated = builder.separated(", ");
        for id in row_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
    }
    if !activities.is_empty() {
        if !row_ids.is_empty() {
            builder.push(" OR ");
        }
        builder.push("activity IN (");
        let mut separated = builder.separated(", ");
        for activity in activities {
            separated.push_bind(activity.as_str());
        }
        separated.push_unseparated(")");
    }

    let result = builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(result.rows_affected())
}

async fn truncate(conn: &mut SqliteConnection, keep_activities: &[ActivityId]) -> Result<u64> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM data");
    if !keep_activities.is_empty() {
        builder.push(" WHERE activity NOT IN (");
        let mut separated = builder.separated(", ");
        for activity in keep_activities {
            separated.push_bind(activity.as_str());
        }
        separated.push_unseparated(")");
    }

    let result = builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(result.rows_affected())
}

#[async_trait]
impl OfflineStore for SqliteOfflineStore {
    async fn insert(&self, record: OfflineRecord) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(StoreTask::Insert { record, reply }).is_err() {
            debug!("Offline store closed, record dropped");
            return false;
        }
        rx.await.unwrap_or(false)
    }

    async fn select(&self, limit: usize) -> Result<Vec<OfflineRecord>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreTask::Select { limit, reply })
            .map_err(|_| Self::closed_error())?;
        rx.await.map_err(|_| Self::closed_error())?
    }

    async fn delete(&self, row_ids: &[i64], activities: &[ActivityId]) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreTask::Delete {
                row_ids: row_ids.to_vec(),
                activities: activities.to_vec(),
                reply,
            })
            .map_err(|_| Self::closed_error())?;
        rx.await.map_err(|_| Self::closed_error())?
    }

    async fn truncate(&self, keep_activities: &[ActivityId]) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreTask::Truncate {
                keep_activities: keep_activities.to_vec(),
                reply,
            })
            .map_err(|_| Self::closed_error())?;
        rx.await.map_err(|_| Self::closed_error())?
    }

    async fn close(&self) {
        let _ = self.tx.send(StoreTask::Close);
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                error!(error = %e, "Offline store writer task failed");
            }
        }
    }
}
