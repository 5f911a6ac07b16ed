use super::handler::ChangeHandler;
use crate::core::{DocError, Resource};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

/// Result of dispatching one batch.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Handler invocations made
    pub invocations: usize,
    /// Partition keys whose invocation failed, with the failure
    pub failures: Vec<(String, DocError)>,
    /// False when cancellation stopped the batch before every group ran
    pub completed: bool,
}

/// Splits a batch by partition key, preserving arrival order within each
/// group. Keys compare ordinally, so `"A"` and `"a"` are distinct groups.
pub fn group_by_partition<T: Resource>(changes: Vec<T>) -> IndexMap<String, Vec<T>> {
    let mut groups: IndexMap<String, Vec<T>> = IndexMap::new();
    for change in changes {
        groups
            .entry(change.partition_key().to_string())
            .or_default()
            .push(change);
    }
    groups
}

/// Hands each partition group to `handler`, at most `max_parallel` at a time.
///
/// Groups run in chunks; a chunk finishes completely before the next one
/// starts. A failed or panicked invocation is recorded and does not stop the
/// rest of the batch. Cancellation is honoured between chunks.
pub async fn dispatch_batch<T: Resource>(
    handler: &Arc<dyn ChangeHandler<T>>,
    changes: Vec<T>,
    max_parallel: usize,
    cancel: &CancellationToken,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();
    let mut groups = group_by_partition(changes).into_iter();
    let max_parallel = max_parallel.max(1);

    loop {
        let chunk: Vec<(String, Vec<T>)> = groups.by_ref().take(max_parallel).collect();
        if chunk.is_empty() {
            outcome.completed = true;
            return outcome;
        }
        if cancel.is_cancelled() {
            return outcome;
        }

        let running: Vec<_> = chunk
            .into_iter()
            .map(|(partition_key, items)| {
                let handler = Arc::clone(handler);
                let cancel = cancel.clone();
                let key = partition_key.clone();
                let task =
                    tokio::spawn(async move { handler.handle(&key, items, &cancel).await });
                (partition_key, task)
            })
            .collect();
        outcome.invocations += running.len();

        for (partition_key, task) in running {
            let failure = match task.await {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join_err) => {
                    DocError::Internal(format!("change handler panicked: {join_err}"))
                }
            };
            event!(
                Level::WARN,
                partition_key = %partition_key,
                error = %failure,
                "change handler failed"
            );
            outcome.failures.push((partition_key, failure));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Result;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
        pk: String,
    }

    impl Resource for Item {
        fn document_id(&self) -> &str {
            &self.id
        }
        fn partition_key(&self) -> &str {
            &self.pk
        }
        fn version_token(&self) -> Option<&str> {
            None
        }
        fn set_version_token(&mut self, _: Option<String>) {}
    }

    fn item(id: &str, pk: &str) -> Item {
        Item {
            id: id.into(),
            pk: pk.into(),
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ChangeHandler<Item> for Recorder {
        async fn handle(
            &self,
            partition_key: &str,
            changes: Vec<Item>,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let ids = changes.into_iter().map(|c| c.id).collect();
            self.calls
                .lock()
                .unwrap()
                .push((partition_key.to_string(), ids));
            if partition_key == "bad" {
                return Err(DocError::Internal("boom".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_group_by_partition_keeps_order() {
        let groups = group_by_partition(vec![
            item("1", "A"),
            item("2", "B"),
            item("3", "a"),
            item("4", "A"),
        ]);
        let keys: Vec<&str> = groups.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["A", "B", "a"]);
        assert_eq!(groups["A"], vec![item("1", "A"), item("4", "A")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispatch_bounds_parallelism() {
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn ChangeHandler<Item>> = recorder.clone();
        let batch = vec![
            item("a1", "A"),
            item("b1", "B"),
            item("a2", "A"),
            item("c1", "C"),
            item("b2", "B"),
            item("b3", "B"),
        ];

        let outcome = dispatch_batch(&handler, batch, 2, &CancellationToken::new()).await;

        assert!(outcome.completed);
        assert_eq!(outcome.invocations, 3);
        assert!(outcome.failures.is_empty());
        assert!(recorder.peak.load(Ordering::SeqCst) <= 2);

        let mut calls = recorder.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("A".to_string(), vec!["a1".to_string(), "a2".to_string()]),
                ("B".to_string(), vec!["b1".into(), "b2".into(), "b3".into()]),
                ("C".to_string(), vec!["c1".to_string()]),
            ]
        );
    }

    /// Records start and end of each invocation; "A" runs much longer.
    #[derive(Default)]
    struct Timeline {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChangeHandler<Item> for Timeline {
        async fn handle(
            &self,
            partition_key: &str,
            _changes: Vec<Item>,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            self.events.lock().unwrap().push(format!("start {partition_key}"));
            let millis = if partition_key == "A" { 80 } else { 5 };
            tokio::time::sleep(Duration::from_millis(millis)).await;
            self.events.lock().unwrap().push(format!("end {partition_key}"));
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_next_chunk_waits_for_slowest_group() {
        let timeline = Arc::new(Timeline::default());
        let handler: Arc<dyn ChangeHandler<Item>> = timeline.clone();
        let batch = vec![item("a1", "A"), item("b1", "B"), item("c1", "C")];

        let outcome = dispatch_batch(&handler, batch, 2, &CancellationToken::new()).await;
        assert!(outcome.completed);

        let events = timeline.events.lock().unwrap().clone();
        let at = |event: &str| events.iter().position(|e| e == event).unwrap();
        // B finishes early but C still waits for A
        assert!(at("end B") < at("end A"));
        assert!(at("end A") < at("start C"));
        assert_eq!(events.len(), 6);
    }

    #[tokio::test]
    async fn test_failed_group_does_not_stop_batch() {
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn ChangeHandler<Item>> = recorder.clone();
        let batch = vec![item("1", "bad"), item("2", "good"), item("3", "other")];

        let outcome = dispatch_batch(&handler, batch, 1, &CancellationToken::new()).await;

        assert!(outcome.completed);
        assert_eq!(outcome.invocations, 3);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, "bad");
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn ChangeHandler<Item>> = recorder.clone();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = dispatch_batch(&handler, vec![item("1", "A")], 1, &cancel).await;
        assert!(!outcome.completed);
        assert_eq!(outcome.invocations, 0);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn ChangeHandler<Item>> = recorder.clone();
        let outcome = dispatch_batch(&handler, Vec::new(), 4, &CancellationToken::new()).await;
        assert!(outcome.completed);
        assert_eq!(outcome.invocations, 0);
    }
}
