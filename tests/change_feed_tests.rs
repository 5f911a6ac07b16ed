/// Change feed tests
///
/// Partition fan-out, bounded parallelism, lifecycle and lease resumption.
/// Run with: cargo test --test change_feed_tests

mod common;

use async_trait::async_trait;
use common::{Order, order_client};
use docbind::change_feed::handler_fn;
use docbind::memory::{MemoryContainer, MemoryStore};
use docbind::{
    ChangeFeedOptions, ChangeHandler, ConnectionOptions, DocClient, DocError, FeedErrorHandler,
    Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recorded {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Recorded {
    fn calls(&self) -> Vec<(String, Vec<String>)> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

struct RecordingHandler(Arc<Recorded>);

#[async_trait]
impl ChangeHandler<Order> for RecordingHandler {
    async fn handle(
        &self,
        partition_key: &str,
        changes: Vec<Order>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let now = self.0.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);

        let ids = changes.into_iter().map(|o| o.id).collect();
        self.0
            .calls
            .lock()
            .unwrap()
            .push((partition_key.to_string(), ids));
        if partition_key == "broken" {
            return Err(DocError::Internal("handler refused".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingErrors {
    seen: Mutex<Vec<(String, String)>>,
}

struct ErrorSink(Arc<RecordingErrors>);

#[async_trait]
impl FeedErrorHandler for ErrorSink {
    async fn on_error(&self, lease_token: &str, error: &DocError) {
        self.0
            .seen
            .lock()
            .unwrap()
            .push((lease_token.to_string(), error.to_string()));
    }
}

fn feed_options(instance: &str) -> ChangeFeedOptions {
    ChangeFeedOptions::new("orders-feed")
        .instance_name(instance)
        .feed_poll_delay(Duration::from_millis(10))
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn create_orders(client: &DocClient, orders: &[(&str, &str)]) {
    let writer = client.writer::<Order>();
    for (id, customer) in orders {
        writer.create(&Order::new(id, customer, 1)).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batch_fans_out_per_partition_with_bounded_parallelism() {
    let (client, _store) = order_client();
    create_orders(
        &client,
        &[
            ("a1", "A"),
            ("b1", "B"),
            ("a2", "A"),
            ("c1", "C"),
            ("b2", "B"),
            ("b3", "B"),
        ],
    )
    .await;

    let recorded = Arc::new(Recorded::default());
    let processor = client.change_feed(
        RecordingHandler(Arc::clone(&recorded)),
        feed_options("w1").max_degree_of_parallelism(2),
    );
    processor.start().await.unwrap();
    wait_until(|| recorded.call_count() >= 3).await;
    processor.stop().await.unwrap();

    assert_eq!(
        recorded.calls(),
        vec![
            ("A".to_string(), vec!["a1".to_string(), "a2".to_string()]),
            (
                "B".to_string(),
                vec!["b1".to_string(), "b2".to_string(), "b3".to_string()]
            ),
            ("C".to_string(), vec!["c1".to_string()]),
        ]
    );
    assert!(recorded.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let (client, _store) = order_client();
    let processor = client.change_feed(
        RecordingHandler(Arc::new(Recorded::default())),
        feed_options("w1"),
    );

    processor.start().await.unwrap();
    let err = processor.start().await.unwrap_err();
    assert!(matches!(err, DocError::AlreadyRunning(ref token) if token == "orders-feed.w1"));
    assert!(processor.is_running().await);

    processor.stop().await.unwrap();
    assert!(!processor.is_running().await);
}

#[tokio::test]
async fn test_stop_when_not_running_is_a_noop() {
    let (client, _store) = order_client();
    let processor = client.change_feed(
        RecordingHandler(Arc::new(Recorded::default())),
        feed_options("w1"),
    );

    processor.stop().await.unwrap();
    processor.start().await.unwrap();
    processor.stop().await.unwrap();
    processor.stop().await.unwrap();
    assert!(!processor.is_running().await);
}

#[tokio::test]
async fn test_start_for_unregistered_type_fails() {
    let store = MemoryStore::new();
    let client = DocClient::with_memory_store(&store, ConnectionOptions::emulator("k"));
    let processor = client.change_feed(
        RecordingHandler(Arc::new(Recorded::default())),
        feed_options("w1"),
    );

    let err = processor.start().await.unwrap_err();
    assert!(matches!(err, DocError::UnknownResource(_)));
    assert!(!processor.is_running().await);
}

#[tokio::test]
async fn test_restart_resumes_from_lease() {
    let (client, store) = order_client();
    create_orders(&client, &[("o1", "acme"), ("o2", "acme")]).await;

    let first = Arc::new(Recorded::default());
    let processor = client.change_feed(RecordingHandler(Arc::clone(&first)), feed_options("w1"));
    processor.start().await.unwrap();
    wait_until(|| first.call_count() >= 1).await;
    processor.stop().await.unwrap();

    create_orders(&client, &[("o3", "acme")]).await;

    let second = Arc::new(Recorded::default());
    let processor = client.change_feed(RecordingHandler(Arc::clone(&second)), feed_options("w1"));
    processor.start().await.unwrap();
    wait_until(|| second.call_count() >= 1).await;
    processor.stop().await.unwrap();

    assert_eq!(
        first.calls(),
        vec![("acme".to_string(), vec!["o1".to_string(), "o2".to_string()])]
    );
    assert_eq!(second.calls(), vec![("acme".to_string(), vec!["o3".to_string()])]);

    let lease = store
        .container("shop", "leases")
        .unwrap()
        .get_now("orders-feed.w1", "orders-feed")
        .unwrap()
        .unwrap();
    assert_eq!(lease.body["owner"], "w1");
}

#[tokio::test]
async fn test_new_instance_starts_from_beginning() {
    let (client, _store) = order_client();
    create_orders(&client, &[("o1", "acme")]).await;

    let first = Arc::new(Recorded::default());
    let processor = client.change_feed(RecordingHandler(Arc::clone(&first)), feed_options("w1"));
    processor.start().await.unwrap();
    wait_until(|| first.call_count() >= 1).await;
    processor.stop().await.unwrap();

    let other = Arc::new(Recorded::default());
    let processor = client.change_feed(RecordingHandler(Arc::clone(&other)), feed_options("w2"));
    processor.start().await.unwrap();
    wait_until(|| other.call_count() >= 1).await;
    processor.stop().await.unwrap();

    assert_eq!(other.calls(), vec![("acme".to_string(), vec!["o1".to_string()])]);
}

#[tokio::test]
async fn test_handler_failure_is_reported_and_skipped() {
    let (client, _store) = order_client();
    create_orders(&client, &[("x1", "broken"), ("g1", "good")]).await;

    let recorded = Arc::new(Recorded::default());
    let errors = Arc::new(RecordingErrors::default());
    let processor = client
        .change_feed(RecordingHandler(Arc::clone(&recorded)), feed_options("w1"))
        .with_error_handler(ErrorSink(Arc::clone(&errors)));
    processor.start().await.unwrap();
    wait_until(|| !errors.seen.lock().unwrap().is_empty()).await;
    wait_until(|| recorded.call_count() >= 2).await;

    create_orders(&client, &[("g2", "good")]).await;
    wait_until(|| recorded.call_count() >= 3).await;
    processor.stop().await.unwrap();

    let seen = errors.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, processor.lease_token());
    assert!(seen[0].1.contains("handler refused"));

    // the failed batch is not redelivered
    let broken_calls = recorded
        .calls()
        .into_iter()
        .filter(|(pk, _)| pk == "broken")
        .count();
    assert_eq!(broken_calls, 1);
}

#[tokio::test]
async fn test_handler_sees_latest_version_only() {
    let (client, _store) = order_client();
    let writer = client.writer::<Order>();
    writer.create(&Order::new("o1", "acme", 1)).await.unwrap();
    writer
        .update("o1", "acme", |o| o.total = 2, 0usize, &CancellationToken::new())
        .await
        .unwrap();

    let totals = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&totals);
    let processor = client.change_feed(
        handler_fn(move |_customer: String, orders: Vec<Order>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock()
                    .unwrap()
                    .extend(orders.into_iter().map(|o| o.total));
                Ok::<(), DocError>(())
            }
        }),
        feed_options("w1"),
    );
    processor.start().await.unwrap();
    wait_until(|| !totals.lock().unwrap().is_empty()).await;
    processor.stop().await.unwrap();

    assert_eq!(*totals.lock().unwrap(), vec![2]);
}

/// Notes the feed read count when each invocation starts and ends.
struct ReadCountHandler {
    orders: Arc<MemoryContainer>,
    spans: Arc<Mutex<Vec<(usize, usize)>>>,
}

#[async_trait]
impl ChangeHandler<Order> for ReadCountHandler {
    async fn handle(
        &self,
        _partition_key: &str,
        _changes: Vec<Order>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let before = self.orders.stats().feed_reads;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let after = self.orders.stats().feed_reads;
        self.spans.lock().unwrap().push((before, after));
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_feed_is_not_read_while_batch_is_in_flight() {
    let (client, store) = order_client();
    create_orders(&client, &[("a1", "A"), ("b1", "B"), ("c1", "C")]).await;

    let spans = Arc::new(Mutex::new(Vec::new()));
    let processor = client.change_feed(
        ReadCountHandler {
            orders: store.container("shop", "orders").unwrap(),
            spans: Arc::clone(&spans),
        },
        feed_options("w1").max_degree_of_parallelism(2),
    );
    processor.start().await.unwrap();
    wait_until(|| spans.lock().unwrap().len() >= 3).await;

    create_orders(&client, &[("a2", "A")]).await;
    wait_until(|| spans.lock().unwrap().len() >= 4).await;
    processor.stop().await.unwrap();

    let spans = spans.lock().unwrap().clone();
    assert!(spans.iter().all(|(before, after)| before == after));
}
