use super::config::ConnectionOptions;
use super::diagnostics::diagnose;
use crate::core::{DocError, Result};
use crate::interface::{ClientFactory, DocumentClient, ExecutionMode};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OnceCell, RwLock};
use tracing::{Level, event};

type HandleSlot = Arc<OnceCell<Arc<dyn DocumentClient>>>;
type SlotMap = RwLock<HashMap<ConnectionOptions, HandleSlot>>;

fn disposed_error() -> DocError {
    DocError::Internal("Connection cache has been disposed".into())
}

/// Connection handle cache
///
/// Holds at most one live handle per distinct [`ConnectionOptions`] value and
/// execution mode. Construction happens once per key: concurrent callers for
/// the same key wait on the same slot and receive the same handle.
pub struct ConnectionCache {
    /// Builds handles on a cache miss
    factory: Arc<dyn ClientFactory>,
    /// Handles negotiated for point operations
    standard: SlotMap,
    /// Handles negotiated for batched writes
    bulk: SlotMap,
    disposed: AtomicBool,
}

impl ConnectionCache {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            standard: RwLock::new(HashMap::new()),
            bulk: RwLock::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    fn slots(&self, mode: ExecutionMode) -> &SlotMap {
        match mode {
            ExecutionMode::Standard => &self.standard,
            ExecutionMode::Bulk => &self.bulk,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(disposed_error());
        }
        Ok(())
    }

    async fn slot(&self, options: &ConnectionOptions, mode: ExecutionMode) -> Result<HandleSlot> {
        {
            let slots = self.slots(mode).read().await;
            if let Some(slot) = slots.get(options) {
                return Ok(Arc::clone(slot));
            }
        }

        let mut slots = self.slots(mode).write().await;
        self.ensure_live()?;
        Ok(Arc::clone(slots.entry(options.clone()).or_default()))
    }

    /// Get the handle for `options` in `mode`, connecting on first use.
    ///
    /// A failed connection attempt leaves the slot empty, so the next caller
    /// tries again.
    pub async fn get_handle(
        &self,
        options: &ConnectionOptions,
        mode: ExecutionMode,
    ) -> Result<Arc<dyn DocumentClient>> {
        self.ensure_live()?;
        let slot = self.slot(options, mode).await?;

        let handle = slot
            .get_or_try_init(|| async {
                // the slot may already have been drained by dispose_all
                self.ensure_live()?;
                options.validate()?;
                event!(
                    Level::INFO,
                    endpoint = %options.account_endpoint,
                    database = %options.database_name,
                    ?mode,
                    "creating connection handle"
                );
                self.factory
                    .connect(options, mode)
                    .await
                    .map_err(|err| diagnose(options, err))
            })
            .await?;

        // a handle finished while dispose_all was draining belongs to it
        self.ensure_live()?;
        Ok(Arc::clone(handle))
    }

    /// Number of live handles for `mode`.
    pub async fn cached_handles(&self, mode: ExecutionMode) -> usize {
        let slots = self.slots(mode).read().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }

    /// Disposes every cached handle. Later `get_handle` calls fail.
    ///
    /// Connections still being established are awaited and disposed with
    /// the rest.
    pub async fn dispose_all(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut slots = Vec::new();
        for mode in [ExecutionMode::Standard, ExecutionMode::Bulk] {
            let mut map = self.slots(mode).write().await;
            slots.extend(map.drain().map(|(_, slot)| slot));
        }

        let mut handles = Vec::new();
        for slot in slots {
            // waits out an in-flight connect; an idle slot stays empty
            let settled = slot
                .get_or_try_init(|| async { Err(disposed_error()) })
                .await;
            if let Ok(handle) = settled {
                handles.push(Arc::clone(handle));
            }
        }

        let mut errors = Vec::new();
        for handle in &handles {
            if let Err(err) = handle.dispose().await {
                event!(Level::ERROR, error = %err, "connection handle dispose failed");
                errors.push(err);
            }
        }
        event!(Level::INFO, disposed = handles.len(), "connection cache disposed");

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(DocError::Aggregate(errors)),
        }
    }
}
