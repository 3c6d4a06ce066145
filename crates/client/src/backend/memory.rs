//! In-process backend used by tests and the demo binary.
//!
//! Tables are vectors of JSON rows behind one mutex. Each table has a
//! broadcast channel that carries its insert/update events, mirroring a
//! hosted realtime feed: every subscriber sees every event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use reelchat_shared::api::realtime::{RowEvent, RowOp};
use reelchat_shared::constants::{MESSAGES_TABLE, USER_PUBLIC_KEYS_TABLE};
use serde_json::Value;
use tokio::sync::broadcast;

use super::{Backend, BackendError, Filter, RowEventStream};

const TABLE_BROADCAST_CAPACITY: usize = 1000;

type Tables = HashMap<String, Vec<Value>>;

pub struct MemoryBackend {
    tables: Mutex<Tables>,
    /// Unique column per table, enforced on insert and used by upsert.
    unique_columns: HashMap<String, String>,
    channels: DashMap<String, broadcast::Sender<RowEvent>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackend {
    /// Backend with the messaging schema's unique columns registered.
    pub fn new() -> Self {
        Self::empty()
            .with_unique_column(USER_PUBLIC_KEYS_TABLE, "user_id")
            .with_unique_column(MESSAGES_TABLE, "id")
    }

    pub fn empty() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            unique_columns: HashMap::new(),
            channels: DashMap::new(),
            offline: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_unique_column(mut self, table: &str, column: &str) -> Self {
        self.unique_columns
            .insert(table.to_string(), column.to_string());
        self
    }

    /// Simulate losing connectivity: every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful write calls (insert, upsert, update).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of all rows in `table`.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .map(|tables| tables.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Emit a raw event, bypassing the tables. Lets tests inject rows the
    /// real backend could deliver, malformed ones included.
    pub fn emit_raw(&self, event: RowEvent) {
        let _ = self.sender(&event.table).send(event);
    }

    fn check_online(&self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("backend is offline".into()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, BackendError> {
        self.tables
            .lock()
            .map_err(|_| BackendError::Unavailable("table lock poisoned".into()))
    }

    fn sender(&self, table: &str) -> broadcast::Sender<RowEvent> {
        self.channels
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(TABLE_BROADCAST_CAPACITY).0)
            .clone()
    }

    fn publish(&self, table: &str, op: RowOp, record: &Value) {
        // No receivers is not an error: nobody is listening yet.
        let _ = self.sender(table).send(RowEvent {
            table: table.to_string(),
            op,
            record: record.clone(),
        });
    }

    fn position_of(rows: &[Value], column: &str, value: Option<&Value>) -> Option<usize> {
        let value = value?;
        rows.iter().position(|row| row.get(column) == Some(value))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn require_object(record: &Value) -> Result<(), BackendError> {
    if record.is_object() {
        Ok(())
    } else {
        Err(BackendError::Rejected("record must be a JSON object".into()))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn insert(&self, table: &str, record: Value) -> Result<Value, BackendError> {
        self.check_online()?;
        require_object(&record)?;
        {
            let mut tables = self.lock()?;
            let rows = tables.entry(table.to_string()).or_default();
            if let Some(column) = self.unique_columns.get(table) {
                if Self::position_of(rows, column, record.get(column)).is_some() {
                    return Err(BackendError::Conflict {
                        table: table.to_string(),
                        column: column.clone(),
                    });
                }
            }
            rows.push(record.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.publish(table, RowOp::Insert, &record);
        Ok(record)
    }

    async fn upsert(
        &self,
        table: &str,
        conflict_column: &str,
        record: Value,
    ) -> Result<Value, BackendError> {
        self.check_online()?;
        require_object(&record)?;
        let op = {
            let mut tables = self.lock()?;
            let rows = tables.entry(table.to_string()).or_default();
            match Self::position_of(rows, conflict_column, record.get(conflict_column)) {
                Some(idx) => {
                    rows[idx] = record.clone();
                    RowOp::Update
                }
                None => {
                    rows.push(record.clone());
                    RowOp::Insert
                }
            }
        };
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.publish(table, op, &record);
        Ok(record)
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, BackendError> {
        self.check_online()?;
        let tables = self.lock()?;
        Ok(tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: Value,
    ) -> Result<Vec<Value>, BackendError> {
        self.check_online()?;
        let patch = match patch {
            Value::Object(map) => map,
            _ => return Err(BackendError::Rejected("patch must be a JSON object".into())),
        };

        let updated: Vec<Value> = {
            let mut tables = self.lock()?;
            let Some(rows) = tables.get_mut(table) else {
                return Ok(Vec::new());
            };
            rows.iter_mut()
                .filter(|row| filter.matches(row))
                .map(|row| {
                    if let Value::Object(fields) = row {
                        for (k, v) in &patch {
                            fields.insert(k.clone(), v.clone());
                        }
                    }
                    row.clone()
                })
                .collect()
        };

        if !updated.is_empty() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        for row in &updated {
            self.publish(table, RowOp::Update, row);
        }
        Ok(updated)
    }

    async fn subscribe(&self, table: &str) -> Result<RowEventStream, BackendError> {
        self.check_online()?;
        let rx = self.sender(table).subscribe();
        let table = table.to_string();

        let stream = futures::stream::unfold(rx, move |mut rx| {
            let table = table.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => return Some((event, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(table = %table, skipped, "realtime subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_rejects_duplicate_unique_value() {
        let backend = MemoryBackend::new();
        backend
            .insert(USER_PUBLIC_KEYS_TABLE, json!({ "user_id": "u1", "public_key": "a" }))
            .await
            .unwrap();
        let result = backend
            .insert(USER_PUBLIC_KEYS_TABLE, json!({ "user_id": "u1", "public_key": "b" }))
            .await;
        assert!(matches!(result, Err(BackendError::Conflict { .. })));
        assert_eq!(backend.rows(USER_PUBLIC_KEYS_TABLE).len(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let backend = MemoryBackend::new();
        for key in ["a", "b"] {
            backend
                .upsert(USER_PUBLIC_KEYS_TABLE, "user_id", json!({ "user_id": "u1", "public_key": key }))
                .await
                .unwrap();
        }
        let rows = backend.rows(USER_PUBLIC_KEYS_TABLE);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["public_key"], "b");
        assert_eq!(backend.write_count(), 2);
    }

    #[tokio::test]
    async fn update_merges_patch_and_reports_rows() {
        let backend = MemoryBackend::new();
        backend
            .insert(MESSAGES_TABLE, json!({ "id": "m1", "status": "sent", "body": "x" }))
            .await
            .unwrap();

        let updated = backend
            .update(MESSAGES_TABLE, &Filter::eq("id", json!("m1")), json!({ "status": "read" }))
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["status"], "read");
        assert_eq!(updated[0]["body"], "x");
    }

    #[tokio::test]
    async fn update_with_no_match_is_not_a_write() {
        let backend = MemoryBackend::new();
        let updated = backend
            .update(MESSAGES_TABLE, &Filter::eq("id", json!("nope")), json!({ "status": "read" }))
            .await
            .unwrap();
        assert!(updated.is_empty());
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_see_inserts_and_updates() {
        let backend = MemoryBackend::new();
        let mut stream = backend.subscribe(MESSAGES_TABLE).await.unwrap();

        backend
            .insert(MESSAGES_TABLE, json!({ "id": "m1", "status": "sent" }))
            .await
            .unwrap();
        backend
            .update(MESSAGES_TABLE, &Filter::eq("id", json!("m1")), json!({ "status": "read" }))
            .await
            .unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.op, RowOp::Insert);
        let second = stream.next().await.unwrap();
        assert_eq!(second.op, RowOp::Update);
        assert_eq!(second.record["status"], "read");
    }

    #[tokio::test]
    async fn offline_backend_fails_every_call() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        assert!(matches!(
            backend.query(MESSAGES_TABLE, &Filter::eq("id", json!("x"))).await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(backend.subscribe(MESSAGES_TABLE).await.is_err());

        backend.set_offline(false);
        assert!(backend.query(MESSAGES_TABLE, &Filter::eq("id", json!("x"))).await.is_ok());
    }

    #[tokio::test]
    async fn non_object_records_are_rejected() {
        let backend = MemoryBackend::new();
        let result = backend.insert(MESSAGES_TABLE, json!([1, 2, 3])).await;
        assert!(matches!(result, Err(BackendError::Rejected(_))));
    }
}
