//! libSQL backend: async `TreeStore` implementation.
//!
//! Stores a single connection that is reused for all operations.
//! `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
//! Partition transactions additionally take the domain's write lock and a
//! global writer lock, since SQLite allows one write transaction at a time.
//! Supports local file and in-memory databases.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Transaction, TransactionBehavior};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::queue::{PropagationJob, WorkQueue};
use crate::store::migrations;
use crate::store::traits::{PartitionTxn, TreeStore};
use crate::tasks::{ProgressMap, TaskId, TaskIndex, TaskNode};

/// libSQL tree store.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<libsql::Database>,
    conn: Connection,
    queue: Arc<dyn WorkQueue>,
    /// Per-domain write locks. The domain is the consistency partition;
    /// this lock is what serializes concurrent edits of one domain.
    domain_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Global writer lock: all transactions share one connection.
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path, queue: Arc<dyn WorkQueue>) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_db(db, queue).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn in_memory(queue: Arc<dyn WorkQueue>) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;
        Self::from_db(db, queue).await
    }

    async fn from_db(db: libsql::Database, queue: Arc<dyn WorkQueue>) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            queue,
            domain_locks: std::sync::Mutex::new(HashMap::new()),
            writer: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    fn domain_lock(&self, domain: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.domain_locks.lock().expect("domain lock map poisoned");
        locks
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Insert or update a user record (the display-name source).
    pub async fn upsert_user(&self, id: &str, name: &str) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO users (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![id, name],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert_user: {e}")))?;
        Ok(())
    }

    /// All domain identifiers that have at least one task.
    pub async fn domains(&self) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT DISTINCT domain FROM tasks ORDER BY domain", ())
            .await
            .map_err(|e| StoreError::Query(format!("domains: {e}")))?;

        let mut domains = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("domains: {e}")))?
        {
            domains.push(row.get::<String>(0).map_err(row_error("domains"))?);
        }
        Ok(domains)
    }

    /// Ids of all root tasks in a domain.
    pub async fn roots(&self, domain: &str) -> Result<Vec<TaskId>, StoreError> {
        self.ids(
            "SELECT id FROM tasks WHERE domain = ?1 AND parent_id IS NULL",
            domain,
            "roots",
        )
        .await
    }

    /// Ids of all leaf tasks (tasks with no children) in a domain.
    pub async fn leaves(&self, domain: &str) -> Result<Vec<TaskId>, StoreError> {
        self.ids(
            "SELECT id FROM tasks t WHERE t.domain = ?1 AND NOT EXISTS \
             (SELECT 1 FROM tasks c WHERE c.domain = t.domain AND c.parent_id = t.id)",
            domain,
            "leaves",
        )
        .await
    }

    async fn ids(
        &self,
        sql: &str,
        domain: &str,
        op: &'static str,
    ) -> Result<Vec<TaskId>, StoreError> {
        let mut rows = self
            .conn()
            .query(sql, params![domain])
            .await
            .map_err(|e| StoreError::Query(format!("{op}: {e}")))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("{op}: {e}")))?
        {
            let id: String = row.get(0).map_err(row_error(op))?;
            ids.push(parse_uuid(&id)?);
        }
        Ok(ids)
    }
}

#[async_trait]
impl TreeStore for LibSqlStore {
    async fn begin(&self, domain: &str) -> Result<Box<dyn PartitionTxn>, StoreError> {
        // Domain lock first, then the global writer lock. Everyone takes
        // them in this order.
        let domain_guard = self.domain_lock(domain).lock_owned().await;
        let writer_guard = self.writer.clone().lock_owned().await;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| StoreError::Query(format!("begin: {e}")))?;

        debug!(domain, "Partition transaction started");
        Ok(Box::new(LibSqlTxn {
            domain: domain.to_string(),
            tx,
            queue: self.queue.clone(),
            queued: Vec::new(),
            _domain_guard: domain_guard,
            _writer_guard: writer_guard,
        }))
    }

    async fn get_task(&self, domain: &str, id: TaskId) -> Result<Option<TaskNode>, StoreError> {
        query_task(self.conn(), domain, id).await
    }

    async fn direct_children(
        &self,
        domain: &str,
        id: TaskId,
    ) -> Result<Vec<TaskNode>, StoreError> {
        query_children(self.conn(), domain, id).await
    }

    async fn get_index(&self, domain: &str, id: TaskId) -> Result<Option<TaskIndex>, StoreError> {
        query_index(self.conn(), domain, id).await
    }

    async fn resolve_display_name(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT name FROM users WHERE id = ?1", params![user_id])
            .await
            .map_err(|e| StoreError::Query(format!("resolve_display_name: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("resolve_display_name: {e}")))?
        {
            Some(row) => Ok(Some(
                row.get::<String>(0)
                    .map_err(row_error("resolve_display_name"))?,
            )),
            None => Ok(None),
        }
    }
}

/// An open transaction on one domain.
///
/// Holds the domain and writer locks for its lifetime. Dropped without
/// commit, the underlying SQL transaction rolls back and buffered jobs
/// are discarded.
pub struct LibSqlTxn {
    domain: String,
    tx: Transaction,
    queue: Arc<dyn WorkQueue>,
    queued: Vec<PropagationJob>,
    _domain_guard: OwnedMutexGuard<()>,
    _writer_guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl PartitionTxn for LibSqlTxn {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn get_task(&mut self, id: TaskId) -> Result<Option<TaskNode>, StoreError> {
        query_task(&self.tx, &self.domain, id).await
    }

    async fn direct_children(&mut self, id: TaskId) -> Result<Vec<TaskNode>, StoreError> {
        query_children(&self.tx, &self.domain, id).await
    }

    async fn get_index(&mut self, id: TaskId) -> Result<Option<TaskIndex>, StoreError> {
        query_index(&self.tx, &self.domain, id).await
    }

    async fn put_task(&mut self, task: &TaskNode) -> Result<(), StoreError> {
        exec_put_task(&self.tx, task).await
    }

    async fn put_index(&mut self, index: &TaskIndex) -> Result<(), StoreError> {
        exec_put_index(&self.tx, index).await
    }

    fn enqueue(&mut self, job: PropagationJob) {
        self.queued.push(job);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx
            .commit()
            .await
            .map_err(|e| StoreError::Query(format!("commit: {e}")))?;

        // Flush buffered jobs only after the commit succeeded. A failure
        // here leaves committed state without its follow-up job; redelivery
        // of the triggering job (or a rebuild) re-derives and re-enqueues.
        for job in this.queued {
            this.queue
                .enqueue(job)
                .await
                .map_err(|e| StoreError::Query(format!("post-commit enqueue: {e}")))?;
        }
        debug!(domain = %this.domain, "Partition transaction committed");
        Ok(())
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

const TASK_COLUMNS: &str = "domain, id, parent_id, description, creator, assignee, completed, \
     created_at, derived_completed, derived_size, derived_atomic_count, derived_has_open_work, \
     derived_depth, derived_assignees";

const INDEX_COLUMNS: &str =
    "domain, task_id, path, depth, assignees, completed, atomic, has_open_work";

fn row_error(op: &'static str) -> impl Fn(libsql::Error) -> StoreError + Copy {
    move |e| StoreError::Query(format!("{op} row parse: {e}"))
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Serialization(format!("Bad uuid '{s}': {e}")))
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<String>` to a libsql Value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn row_to_task(row: &libsql::Row) -> Result<TaskNode, StoreError> {
    let err = row_error("task");
    let domain: String = row.get(0).map_err(err)?;
    let id: String = row.get(1).map_err(err)?;
    let parent_id: Option<String> = row.get(2).ok();
    let description: String = row.get(3).map_err(err)?;
    let creator: String = row.get(4).map_err(err)?;
    let assignee: Option<String> = row.get(5).ok();
    let completed: i64 = row.get(6).map_err(err)?;
    let created_str: String = row.get(7).map_err(err)?;
    let derived_completed: i64 = row.get(8).map_err(err)?;
    let derived_size: i64 = row.get(9).map_err(err)?;
    let derived_atomic_count: i64 = row.get(10).map_err(err)?;
    let derived_has_open_work: i64 = row.get(11).map_err(err)?;
    let derived_depth: i64 = row.get(12).map_err(err)?;
    let assignees_json: String = row.get(13).map_err(err)?;

    let derived_assignees: ProgressMap = serde_json::from_str(&assignees_json)
        .map_err(|e| StoreError::Serialization(format!("derived_assignees: {e}")))?;

    Ok(TaskNode {
        id: parse_uuid(&id)?,
        domain,
        parent_id: parent_id.as_deref().map(parse_uuid).transpose()?,
        description,
        creator,
        assignee,
        completed: completed != 0,
        created_at: parse_datetime(&created_str),
        derived_completed: derived_completed != 0,
        derived_size: derived_size as u64,
        derived_atomic_count: derived_atomic_count as u64,
        derived_has_open_work: derived_has_open_work != 0,
        derived_depth: derived_depth as u32,
        derived_assignees,
    })
}

fn row_to_index(row: &libsql::Row) -> Result<TaskIndex, StoreError> {
    let err = row_error("index");
    let domain: String = row.get(0).map_err(err)?;
    let task_id: String = row.get(1).map_err(err)?;
    let path_json: String = row.get(2).map_err(err)?;
    let depth: i64 = row.get(3).map_err(err)?;
    let assignees_json: String = row.get(4).map_err(err)?;
    let completed: i64 = row.get(5).map_err(err)?;
    let atomic: i64 = row.get(6).map_err(err)?;
    let has_open_work: i64 = row.get(7).map_err(err)?;

    let path: Vec<TaskId> = serde_json::from_str(&path_json)
        .map_err(|e| StoreError::Serialization(format!("index path: {e}")))?;
    let assignees: Vec<String> = serde_json::from_str(&assignees_json)
        .map_err(|e| StoreError::Serialization(format!("index assignees: {e}")))?;

    Ok(TaskIndex {
        task_id: parse_uuid(&task_id)?,
        domain,
        path,
        depth: depth as u32,
        assignees,
        completed: completed != 0,
        atomic: atomic != 0,
        has_open_work: has_open_work != 0,
    })
}

// ── Shared queries (used by both the store and open transactions) ───

async fn query_task(
    conn: &Connection,
    domain: &str,
    id: TaskId,
) -> Result<Option<TaskNode>, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE domain = ?1 AND id = ?2"),
            params![domain, id.to_string()],
        )
        .await
        .map_err(|e| StoreError::Query(format!("get_task: {e}")))?;

    match rows
        .next()
        .await
        .map_err(|e| StoreError::Query(format!("get_task: {e}")))?
    {
        Some(row) => Ok(Some(row_to_task(&row)?)),
        None => Ok(None),
    }
}

async fn query_children(
    conn: &Connection,
    domain: &str,
    id: TaskId,
) -> Result<Vec<TaskNode>, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE domain = ?1 AND parent_id = ?2"),
            params![domain, id.to_string()],
        )
        .await
        .map_err(|e| StoreError::Query(format!("direct_children: {e}")))?;

    let mut children = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| StoreError::Query(format!("direct_children: {e}")))?
    {
        children.push(row_to_task(&row)?);
    }
    Ok(children)
}

async fn query_index(
    conn: &Connection,
    domain: &str,
    id: TaskId,
) -> Result<Option<TaskIndex>, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {INDEX_COLUMNS} FROM task_index WHERE domain = ?1 AND task_id = ?2"),
            params![domain, id.to_string()],
        )
        .await
        .map_err(|e| StoreError::Query(format!("get_index: {e}")))?;

    match rows
        .next()
        .await
        .map_err(|e| StoreError::Query(format!("get_index: {e}")))?
    {
        Some(row) => Ok(Some(row_to_index(&row)?)),
        None => Ok(None),
    }
}

async fn exec_put_task(conn: &Connection, task: &TaskNode) -> Result<(), StoreError> {
    let assignees_json = serde_json::to_string(&task.derived_assignees)
        .map_err(|e| StoreError::Serialization(format!("derived_assignees: {e}")))?;

    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO tasks ({TASK_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            task.domain.as_str(),
            task.id.to_string(),
            opt_text(task.parent_id.map(|p| p.to_string())),
            task.description.as_str(),
            task.creator.as_str(),
            opt_text(task.assignee.clone()),
            task.completed as i64,
            task.created_at.to_rfc3339(),
            task.derived_completed as i64,
            task.derived_size as i64,
            task.derived_atomic_count as i64,
            task.derived_has_open_work as i64,
            task.derived_depth as i64,
            assignees_json,
        ],
    )
    .await
    .map_err(|e| StoreError::Query(format!("put_task: {e}")))?;
    Ok(())
}

async fn exec_put_index(conn: &Connection, index: &TaskIndex) -> Result<(), StoreError> {
    let path_json = serde_json::to_string(&index.path)
        .map_err(|e| StoreError::Serialization(format!("index path: {e}")))?;
    let assignees_json = serde_json::to_string(&index.assignees)
        .map_err(|e| StoreError::Serialization(format!("index assignees: {e}")))?;

    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO task_index ({INDEX_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            index.domain.as_str(),
            index.task_id.to_string(),
            path_json,
            index.depth as i64,
            assignees_json,
            index.completed as i64,
            index.atomic as i64,
            index.has_open_work as i64,
        ],
    )
    .await
    .map_err(|e| StoreError::Query(format!("put_index: {e}")))?;
    Ok(())
}
