//! SQLite backend for every runtime store.
//!
//! One connection behind a mutex; every call runs on the blocking pool so
//! the async caller never holds the lock across an await.

mod migrations;

pub use migrations::{Migration, MigrationEngine};

use async_trait::async_trait;
use loopwright_core::message::format_timestamp;
use loopwright_core::{
    ApprovalId, ApprovalStatus, ApprovalStore, Episode, EpisodeQuery, EpisodeStore, Message,
    MessageAck, MessageId, MessageRecord, MessageStore, PatternQuery, PatternStore, PendingApproval,
    Pattern, RunId, Span, SpanStore, StoreError, StoreResult,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

const MESSAGE_COLUMNS: &str = "id, from_agent, to_agent, message_type, priority, payload, status, \
     correlation_id, created_at, processed_at, response";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(backend)?;
        Self::configure(&conn, true)?;
        info!(path = %path.display(), "Opened SQLite store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Private in-memory database, mostly for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::configure(&conn, false)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn configure(conn: &Connection, wal_mode: bool) -> StoreResult<()> {
        let mut pragmas = Vec::new();
        if wal_mode {
            pragmas.push("PRAGMA journal_mode = WAL;");
        }
        pragmas.push("PRAGMA synchronous = NORMAL;");
        pragmas.push("PRAGMA busy_timeout = 5000;");
        conn.execute_batch(&pragmas.join("\n"))
            .map_err(|e| StoreError::Backend(format!("Failed to configure SQLite: {e}")))?;

        MigrationEngine::new().migrate(conn)
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("SQLite connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Blocking task failed: {e}")))?
    }
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Map unique-constraint failures to `Duplicate`
fn insert_error(entity: &'static str, id: &str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |err| match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::duplicate(entity, id)
        }
        _ => backend(err),
    }
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

fn decode_bodies<T: serde::de::DeserializeOwned>(bodies: Vec<String>) -> StoreResult<Vec<T>> {
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(StoreError::from))
        .collect()
}

fn query_bodies<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(sql).map_err(backend)?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(backend)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(backend)
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        from_agent: row.get(1)?,
        to_agent: row.get(2)?,
        message_type: row.get(3)?,
        priority: row.get(4)?,
        payload: row.get(5)?,
        status: row.get(6)?,
        correlation_id: row.get(7)?,
        created_at: row.get(8)?,
        processed_at: row.get(9)?,
        response: row.get(10)?,
    })
}

// ============================================================================
// Episodes / patterns
// ============================================================================

#[async_trait]
impl EpisodeStore for SqliteStore {
    async fn insert_episode(&self, episode: &Episode) -> StoreResult<()> {
        let body = serde_json::to_string(episode)?;
        let run_id = episode.run_id.to_string();
        let worker = episode.worker.clone();
        let success = episode.success;
        let started_at = format_timestamp(&episode.started_at);

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO episodes (run_id, worker, success, started_at, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![run_id, worker, success, started_at, body],
            )
            .map_err(insert_error("episode", &run_id))?;
            Ok(())
        })
        .await
    }

    async fn get_episode(&self, run_id: &RunId) -> StoreResult<Option<Episode>> {
        let run_id = run_id.to_string();
        let body: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT body FROM episodes WHERE run_id = ?1",
                    params![run_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)
            })
            .await?;
        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }

    async fn query_episodes(&self, query: &EpisodeQuery) -> StoreResult<Vec<Episode>> {
        let worker = query.worker.clone();
        let success = query.success;
        let limit = sql_limit(query.limit);

        let bodies = self
            .with_conn(move |conn| {
                query_bodies(
                    conn,
                    "SELECT body FROM episodes
                     WHERE (?1 IS NULL OR worker = ?1) AND (?2 IS NULL OR success = ?2)
                     ORDER BY seq DESC LIMIT ?3",
                    params![worker, success, limit],
                )
            })
            .await?;
        decode_bodies(bodies)
    }
}

#[async_trait]
impl PatternStore for SqliteStore {
    async fn insert_pattern(&self, pattern: &Pattern) -> StoreResult<()> {
        let body = serde_json::to_string(pattern)?;
        let id = pattern.id.to_string();
        let worker = pattern.worker.clone();
        let kind = pattern.kind.as_str();
        let confidence = pattern.confidence;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO patterns (id, worker, kind, confidence, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, worker, kind, confidence, body],
            )
            .map_err(insert_error("pattern", &id))?;
            Ok(())
        })
        .await
    }

    async fn query_patterns(&self, query: &PatternQuery) -> StoreResult<Vec<Pattern>> {
        let worker = query.worker.clone();
        let kind = query.kind.map(|k| k.as_str());
        let min_confidence = query.min_confidence;
        let limit = sql_limit(query.limit);

        let bodies = self
            .with_conn(move |conn| {
                query_bodies(
                    conn,
                    "SELECT body FROM patterns
                     WHERE (?1 IS NULL OR worker = ?1)
                       AND (?2 IS NULL OR kind = ?2)
                       AND (?3 IS NULL OR confidence >= ?3)
                     ORDER BY confidence DESC, seq DESC LIMIT ?4",
                    params![worker, kind, min_confidence, limit],
                )
            })
            .await?;
        decode_bodies(bodies)
    }
}

// ============================================================================
// Mailbox
// ============================================================================

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        let r = message.to_record();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    r.id,
                    r.from_agent,
                    r.to_agent,
                    r.message_type,
                    r.priority,
                    r.payload,
                    r.status,
                    r.correlation_id,
                    r.created_at,
                    r.processed_at,
                    r.response
                ],
            )
            .map_err(insert_error("message", &r.id))?;
            Ok(())
        })
        .await
    }

    async fn get_message(&self, id: &MessageId) -> StoreResult<Option<Message>> {
        let id = id.to_string();
        let record = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    params![id],
                    message_from_row,
                )
                .optional()
                .map_err(backend)
            })
            .await?;
        record.map(Message::from_record).transpose()
    }

    async fn pending_messages(&self, recipient: &str, limit: usize) -> StoreResult<Vec<Message>> {
        let recipient = recipient.to_string();
        let limit = sql_limit(Some(limit));
        let records = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare_cached(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE to_agent = ?1 AND status = 'pending'
                         ORDER BY priority DESC, created_at ASC, seq ASC
                         LIMIT ?2"
                    ))
                    .map_err(backend)?;
                let rows = stmt
                    .query_map(params![recipient, limit], message_from_row)
                    .map_err(backend)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(backend)
            })
            .await?;
        records.into_iter().map(Message::from_record).collect()
    }

    async fn acknowledge(&self, id: &MessageId, ack: MessageAck) -> StoreResult<bool> {
        let id = id.to_string();
        let status = ack.status.as_str();
        let processed_at = format_timestamp(&ack.processed_at);
        let response = ack.response.map(|r| r.to_string());

        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE messages
                     SET status = ?2, processed_at = ?3, response = COALESCE(?4, response)
                     WHERE id = ?1",
                    params![id, status, processed_at, response],
                )
                .map_err(backend)?;
            Ok(changed > 0)
        })
        .await
    }
}

// ============================================================================
// Approvals / spans
// ============================================================================

#[async_trait]
impl ApprovalStore for SqliteStore {
    async fn insert_approval(&self, approval: &PendingApproval) -> StoreResult<()> {
        let body = serde_json::to_string(approval)?;
        let id = approval.id.to_string();
        let worker = approval.worker.clone();
        let status = approval.status.as_str();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO approvals (id, worker, status, body) VALUES (?1, ?2, ?3, ?4)",
                params![id, worker, status, body],
            )
            .map_err(insert_error("approval", &id))?;
            Ok(())
        })
        .await
    }

    async fn get_approval(&self, id: &ApprovalId) -> StoreResult<Option<PendingApproval>> {
        let id = id.to_string();
        let body: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT body FROM approvals WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)
            })
            .await?;
        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }

    async fn update_approval(&self, approval: &PendingApproval) -> StoreResult<bool> {
        let body = serde_json::to_string(approval)?;
        let id = approval.id.to_string();
        let status = approval.status.as_str();

        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE approvals SET status = ?2, body = ?3 WHERE id = ?1",
                    params![id, status, body],
                )
                .map_err(backend)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        worker: Option<&str>,
    ) -> StoreResult<Vec<PendingApproval>> {
        let status = status.map(|s| s.as_str());
        let worker = worker.map(str::to_string);

        let bodies = self
            .with_conn(move |conn| {
                query_bodies(
                    conn,
                    "SELECT body FROM approvals
                     WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR worker = ?2)
                     ORDER BY seq ASC",
                    params![status, worker],
                )
            })
            .await?;
        decode_bodies(bodies)
    }
}

#[async_trait]
impl SpanStore for SqliteStore {
    async fn insert_spans(&self, spans: &[Span]) -> StoreResult<()> {
        let rows = spans
            .iter()
            .map(|span| {
                Ok((
                    span.run_id.to_string(),
                    span.span_id.get() as i64,
                    span.parent_id.map(|p| p.get() as i64),
                    span.name.clone(),
                    serde_json::to_string(span)?,
                ))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT OR REPLACE INTO spans (run_id, span_id, parent_id, name, body)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(backend)?;
                for (run_id, span_id, parent_id, name, body) in &rows {
                    stmt.execute(params![run_id, span_id, parent_id, name, body])
                        .map_err(backend)?;
                }
            }
            tx.commit().map_err(backend)
        })
        .await
    }

    async fn spans_for_run(&self, run_id: &RunId) -> StoreResult<Vec<Span>> {
        let run_id = run_id.to_string();
        let bodies = self
            .with_conn(move |conn| {
                query_bodies(
                    conn,
                    "SELECT body FROM spans WHERE run_id = ?1 ORDER BY seq ASC",
                    params![run_id],
                )
            })
            .await?;
        decode_bodies(bodies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopwright_core::{
        HookType, MessageStatus, MessageType, Objective, PatternCandidate, PatternKind, Priority,
        Resolution, RunResult, SpanId,
    };
    use serde_json::json;

    fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("loopwright.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn episodes_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let mut result = RunResult::new(RunId::new(), "research");
        result.success = true;
        let episode = Episode::from_result(&result, &Objective::new().with("topic", "sqlite"));

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_episode(&episode).await.unwrap();
            assert!(matches!(
                store.insert_episode(&episode).await,
                Err(StoreError::Duplicate { .. })
            ));
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(
            reopened.get_episode(&episode.run_id).await.unwrap(),
            Some(episode.clone())
        );
        let successes = reopened
            .query_episodes(&EpisodeQuery::new().for_worker("research").successful())
            .await
            .unwrap();
        assert_eq!(successes.len(), 1);
        let failures = reopened
            .query_episodes(&EpisodeQuery::new().failed())
            .await
            .unwrap();
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn episodes_newest_first_with_limit() {
        let (_dir, store) = store();
        let mut ids = Vec::new();
        for _ in 0..4 {
            let result = RunResult::new(RunId::new(), "research");
            ids.push(result.run_id.clone());
            store
                .insert_episode(&Episode::from_result(&result, &Objective::new()))
                .await
                .unwrap();
        }
        let recent = store
            .query_episodes(&EpisodeQuery::new().with_limit(2))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].run_id, ids[3]);
        assert_eq!(recent[1].run_id, ids[2]);
    }

    #[tokio::test]
    async fn patterns_filter_by_confidence() {
        let (_dir, store) = store();
        for confidence in [0.4, 0.75, 0.9] {
            let pattern = Pattern::from_candidate(
                PatternCandidate {
                    kind: PatternKind::Success,
                    description: "d".into(),
                    confidence,
                    applicable_contexts: vec!["x".into()],
                    recommendation: "r".into(),
                },
                "research",
                RunId::new(),
            );
            store.insert_pattern(&pattern).await.unwrap();
        }
        let found = store
            .query_patterns(&PatternQuery::new().for_worker("research").min_confidence(0.7))
            .await
            .unwrap();
        let confidences: Vec<f64> = found.iter().map(|p| p.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.75]);
    }

    #[tokio::test]
    async fn mailbox_orders_by_priority_then_send_order() {
        let (_dir, store) = store();
        let mut sent = Vec::new();
        for (i, priority) in [Priority::Normal, Priority::Normal, Priority::Urgent, Priority::Low]
            .into_iter()
            .enumerate()
        {
            let msg = Message::new("a", "content", MessageType::Request, json!({"n": i}))
                .with_priority(priority);
            store.insert_message(&msg).await.unwrap();
            sent.push(msg);
        }

        let pending = store.pending_messages("content", 10).await.unwrap();
        let order: Vec<_> = pending.iter().map(|m| m.payload["n"].clone()).collect();
        assert_eq!(order, vec![json!(2), json!(0), json!(1), json!(3)]);
        assert_eq!(pending[0].id, sent[2].id);

        let acked = store
            .acknowledge(
                &sent[2].id,
                MessageAck {
                    status: MessageStatus::Completed,
                    processed_at: chrono::Utc::now(),
                    response: Some(json!("done")),
                },
            )
            .await
            .unwrap();
        assert!(acked);
        let stored = store.get_message(&sent[2].id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Completed);
        assert_eq!(stored.response, Some(json!("done")));
        assert_eq!(store.pending_messages("content", 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn approvals_update_and_list() {
        let (_dir, store) = store();
        let mut approval = PendingApproval::new(HookType::BeforePublish, "content", json!({"title": "t"}));
        store.insert_approval(&approval).await.unwrap();

        let pending = store
            .list_approvals(Some(ApprovalStatus::Pending), Some("content"))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);

        approval.resolve(ApprovalStatus::Approved, Resolution::new("editor", None));
        assert!(store.update_approval(&approval).await.unwrap());
        let stored = store.get_approval(&approval.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Approved);
        assert!(
            store
                .list_approvals(Some(ApprovalStatus::Pending), None)
                .await
                .unwrap()
                .is_empty()
        );

        let unknown = PendingApproval::new(HookType::CostThreshold, "x", json!(null));
        assert!(!store.update_approval(&unknown).await.unwrap());
    }

    #[tokio::test]
    async fn spans_round_trip_per_run() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run = RunId::new();
        let spans = vec![
            Span::open(SpanId::new(1), "run", "w", run.clone(), None),
            Span::open(SpanId::new(2), "think", "w", run.clone(), Some(SpanId::new(1))),
        ];
        store.insert_spans(&spans).await.unwrap();
        store
            .insert_spans(&[Span::open(SpanId::new(1), "run", "w", RunId::new(), None)])
            .await
            .unwrap();

        let loaded = store.spans_for_run(&run).await.unwrap();
        assert_eq!(loaded, spans);
    }
}
