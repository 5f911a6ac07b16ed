use crate::core::{DocError, Result};
use crate::interface::{ChangeFeedRequest, DocumentContainer, Page, QueryRequest, StoredDocument};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    body: Value,
    etag: String,
    lsn: u64,
}

#[derive(Debug, Default)]
struct ContainerState {
    /// Keyed by (partition key, id).
    documents: BTreeMap<(String, String), Entry>,
    last_lsn: u64,
}

/// Successful operations performed against a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationStats {
    pub reads: usize,
    pub creates: usize,
    pub replaces: usize,
    pub deletes: usize,
    pub query_pages: usize,
    pub feed_reads: usize,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicUsize,
    creates: AtomicUsize,
    replaces: AtomicUsize,
    deletes: AtomicUsize,
    query_pages: AtomicUsize,
    feed_reads: AtomicUsize,
}

/// One container of a [`super::MemoryStore`].
pub struct MemoryContainer {
    database: String,
    name: String,
    state: Mutex<ContainerState>,
    counters: Counters,
    latency_micros: Arc<AtomicU64>,
}

impl MemoryContainer {
    pub(super) fn new(database: &str, name: &str, latency_micros: Arc<AtomicU64>) -> Self {
        Self {
            database: database.to_string(),
            name: name.to_string(),
            state: Mutex::new(ContainerState::default()),
            counters: Counters::default(),
            latency_micros,
        }
    }

    async fn round_trip(&self) {
        let micros = self.latency_micros.load(Ordering::SeqCst);
        if micros > 0 {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    /// Writes a document immediately, bypassing version checks.
    ///
    /// Simulates a writer outside this process.
    pub fn put_now(&self, id: &str, partition_key: &str, body: Value) -> Result<StoredDocument> {
        let mut state = self.state.lock()?;
        Ok(write_entry(&mut state, id, partition_key, body))
    }

    pub fn get_now(&self, id: &str, partition_key: &str) -> Result<Option<StoredDocument>> {
        let state = self.state.lock()?;
        Ok(state
            .documents
            .get(&(partition_key.to_string(), id.to_string()))
            .map(|entry| to_stored(partition_key, id, entry)))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.state.lock()?.documents.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> OperationStats {
        let c = &self.counters;
        OperationStats {
            reads: c.reads.load(Ordering::SeqCst),
            creates: c.creates.load(Ordering::SeqCst),
            replaces: c.replaces.load(Ordering::SeqCst),
            deletes: c.deletes.load(Ordering::SeqCst),
            query_pages: c.query_pages.load(Ordering::SeqCst),
            feed_reads: c.feed_reads.load(Ordering::SeqCst),
        }
    }
}

fn key(id: &str, partition_key: &str) -> (String, String) {
    (partition_key.to_string(), id.to_string())
}

fn to_stored(partition_key: &str, id: &str, entry: &Entry) -> StoredDocument {
    StoredDocument {
        id: id.to_string(),
        partition_key: partition_key.to_string(),
        body: entry.body.clone(),
        etag: entry.etag.clone(),
    }
}

fn write_entry(
    state: &mut ContainerState,
    id: &str,
    partition_key: &str,
    mut body: Value,
) -> StoredDocument {
    state.last_lsn += 1;
    let etag = uuid::Uuid::new_v4().to_string();
    if let Value::Object(map) = &mut body {
        map.insert("_etag".into(), Value::String(etag.clone()));
        map.insert("_ts".into(), Value::from(Utc::now().timestamp()));
    }
    let entry = Entry {
        body,
        etag,
        lsn: state.last_lsn,
    };
    let stored = to_stored(partition_key, id, &entry);
    state.documents.insert(key(id, partition_key), entry);
    stored
}

fn parse_token(token: Option<&str>) -> Result<u64> {
    match token {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| DocError::Internal(format!("Malformed continuation token '{raw}'"))),
    }
}

#[async_trait]
impl DocumentContainer for MemoryContainer {
    fn database(&self) -> &str {
        &self.database
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> Result<StoredDocument> {
        self.round_trip().await;
        let state = self.state.lock()?;
        let entry = state
            .documents
            .get(&key(id, partition_key))
            .ok_or_else(|| DocError::not_found(id, partition_key))?;
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        Ok(to_stored(partition_key, id, entry))
    }

    async fn create_item(
        &self,
        id: &str,
        partition_key: &str,
        body: Value,
    ) -> Result<StoredDocument> {
        self.round_trip().await;
        let mut state = self.state.lock()?;
        if state.documents.contains_key(&key(id, partition_key)) {
            return Err(DocError::already_exists(id, partition_key));
        }
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        Ok(write_entry(&mut state, id, partition_key, body))
    }

    async fn replace_item(
        &self,
        id: &str,
        partition_key: &str,
        body: Value,
        if_match: Option<&str>,
    ) -> Result<StoredDocument> {
        self.round_trip().await;
        let mut state = self.state.lock()?;
        let current = state
            .documents
            .get(&key(id, partition_key))
            .ok_or_else(|| DocError::not_found(id, partition_key))?;
        if if_match.is_some_and(|etag| etag != current.etag) {
            return Err(DocError::version_conflict(id, partition_key));
        }
        self.counters.replaces.fetch_add(1, Ordering::SeqCst);
        Ok(write_entry(&mut state, id, partition_key, body))
    }

    async fn delete_item(&self, id: &str, partition_key: &str) -> Result<()> {
        self.round_trip().await;
        let mut state = self.state.lock()?;
        state
            .documents
            .remove(&key(id, partition_key))
            .ok_or_else(|| DocError::not_found(id, partition_key))?;
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_items(&self, request: QueryRequest) -> Result<Page> {
        self.round_trip().await;
        let offset = parse_token(request.continuation.as_deref())? as usize;
        let state = self.state.lock()?;

        let mut matched: Vec<(&(String, String), &Entry)> = state
            .documents
            .iter()
            .filter(|((pk, _), _)| {
                request
                    .partition_key
                    .as_deref()
                    .is_none_or(|wanted| wanted == pk)
            })
            .filter(|(_, entry)| request.query.matches(&entry.body))
            .collect();

        if !request.query.order_by.is_empty() {
            matched.sort_by(|(_, a), (_, b)| request.query.compare(&a.body, &b.body));
        }

        let page_size = request.max_item_count.max(1);
        let items: Vec<StoredDocument> = matched
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|((pk, id), entry)| to_stored(pk, id, entry))
            .collect();
        let next = offset + items.len();
        let continuation = (next < matched.len()).then(|| next.to_string());

        self.counters.query_pages.fetch_add(1, Ordering::SeqCst);
        Ok(Page {
            items,
            continuation,
        })
    }

    async fn read_change_feed(&self, request: ChangeFeedRequest) -> Result<Page> {
        self.round_trip().await;
        let after = parse_token(request.continuation.as_deref())?;
        let state = self.state.lock()?;

        let mut changed: Vec<(&(String, String), &Entry)> = state
            .documents
            .iter()
            .filter(|(_, entry)| entry.lsn > after)
            .collect();
        changed.sort_by_key(|(_, entry)| entry.lsn);
        changed.truncate(request.max_item_count.max(1));

        let last = changed.last().map_or(after, |(_, entry)| entry.lsn);
        let items = changed
            .into_iter()
            .map(|((pk, id), entry)| to_stored(pk, id, entry))
            .collect();

        self.counters.feed_reads.fetch_add(1, Ordering::SeqCst);
        Ok(Page {
            items,
            continuation: Some(last.to_string()),
        })
    }
}
