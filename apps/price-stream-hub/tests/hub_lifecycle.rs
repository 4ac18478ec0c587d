//! Hub Lifecycle Integration Tests
//!
//! Feed sharing, deduplication, replay and teardown through the public
//! `SubscriptionHub` API with a scripted upstream.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use price_stream_hub::{
    DeliveryError, EventReporter, FeedAdapter, FeedError, FeedEvent, HubConfig, HubError,
    PriceListener, PriceUpdate, ScriptedFeedAdapter, ScriptedSample, SubscriptionHub,
    Unsubscribed,
};

#[derive(Debug, Default)]
struct RecordingReporter {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingReporter {
    fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }
}

impl EventReporter for RecordingReporter {
    fn report(&self, event: FeedEvent) {
        self.events.lock().push(event.kind());
    }
}

fn setup() -> (
    Arc<SubscriptionHub>,
    Arc<ScriptedFeedAdapter>,
    Arc<RecordingReporter>,
) {
    let adapter = Arc::new(ScriptedFeedAdapter::new());
    let reporter = Arc::new(RecordingReporter::default());
    let hub = Arc::new(SubscriptionHub::new(
        Arc::clone(&adapter) as Arc<dyn FeedAdapter>,
        Arc::clone(&reporter) as Arc<dyn EventReporter>,
        HubConfig::default(),
    ));
    (hub, adapter, reporter)
}

fn recording() -> (PriceListener, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener: PriceListener = Arc::new(move |update: &PriceUpdate| {
        sink.lock().push(update.price.to_string());
        Ok(())
    });
    (listener, seen)
}

fn prices(steps: &[&str]) -> Vec<ScriptedSample> {
    steps.iter().map(|p| ScriptedSample::price(p)).collect()
}

/// Let `ticks` poll intervals elapse (the first sample lands one interval
/// after the feed opens).
async fn ticks(ticks: u32) {
    tokio::time::sleep(Duration::from_millis(500) * ticks + Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn test_shared_feed_end_to_end() {
    let (hub, adapter, _) = setup();
    adapter.script("BTCUSD", prices(&["42000.00"]));

    let (first, first_seen) = recording();
    let first_id = hub.subscribe("btcusd", first).await.unwrap();
    assert!(hub.is_active("BTCUSD"));
    assert!(first_seen.lock().is_empty());

    ticks(1).await;
    assert_eq!(*first_seen.lock(), vec!["42000.00"]);

    // Second client joins the running feed and gets the last price immediately
    let (second, second_seen) = recording();
    let second_id = hub.subscribe("BTCUSD", second).await.unwrap();
    assert_eq!(*second_seen.lock(), vec!["42000.00"]);
    assert_eq!(adapter.opens("BTCUSD"), 1);
    assert_eq!(hub.listener_count("btcusd"), 2);

    assert_eq!(hub.unsubscribe("BTCUSD", first_id).await, Unsubscribed::Removed);
    assert!(hub.is_active("BTCUSD"));
    assert_eq!(adapter.closes("BTCUSD"), 0);

    assert_eq!(
        hub.unsubscribe("btcusd", second_id).await,
        Unsubscribed::FeedStopped
    );
    assert!(!hub.is_active("BTCUSD"));
    assert_eq!(hub.last_price("BTCUSD"), None);
    assert_eq!(adapter.closes("BTCUSD"), 1);
    assert_eq!(adapter.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_prices_are_suppressed() {
    let (hub, adapter, _) = setup();
    adapter.script("BTCUSD", prices(&["100", "100", "101", "101", "100"]));

    let (listener, seen) = recording();
    hub.subscribe("BTCUSD", listener).await.unwrap();

    ticks(5).await;
    assert_eq!(*seen.lock(), vec!["100", "101", "100"]);

    // The script keeps repeating its last price
    ticks(3).await;
    assert_eq!(seen.lock().len(), 3);

    let stats = hub.stats();
    assert_eq!(stats.registry.samples_accepted, 3);
    assert!(stats.registry.samples_duplicate >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_empty_and_failed_samples_are_skipped() {
    let (hub, adapter, reporter) = setup();
    adapter.script(
        "ETHUSD",
        vec![
            ScriptedSample::price("3000"),
            ScriptedSample::Empty,
            ScriptedSample::Fail(FeedError::Status { status: 503 }),
            ScriptedSample::price("3000"),
            ScriptedSample::price("3001"),
        ],
    );

    let (listener, seen) = recording();
    hub.subscribe("ETHUSD", listener).await.unwrap();

    ticks(5).await;
    assert_eq!(*seen.lock(), vec!["3000", "3001"]);
    assert!(hub.is_active("ETHUSD"));
    assert_eq!(reporter.kinds(), vec!["sample_failed"]);
}

#[tokio::test(start_paused = true)]
async fn test_symbols_are_isolated() {
    let (hub, adapter, _) = setup();
    adapter.script("BTCUSD", prices(&["1"]));
    adapter.script("ETHUSD", prices(&["2"]));

    let (btc, btc_seen) = recording();
    let (eth, eth_seen) = recording();
    let btc_id = hub.subscribe("BTCUSD", btc).await.unwrap();
    hub.subscribe("ETHUSD", eth).await.unwrap();

    ticks(1).await;
    assert_eq!(*btc_seen.lock(), vec!["1"]);
    assert_eq!(*eth_seen.lock(), vec!["2"]);

    hub.unsubscribe("BTCUSD", btc_id).await;
    adapter.push("ETHUSD", ScriptedSample::price("3"));

    // The held "2" is sampled once more before "3"
    ticks(2).await;
    assert_eq!(*eth_seen.lock(), vec!["2", "3"]);
    assert_eq!(hub.active_symbols().len(), 1);
    assert_eq!(hub.active_symbols()[0].as_str(), "ETHUSD");
}

#[tokio::test(start_paused = true)]
async fn test_failing_listener_does_not_block_others() {
    let (hub, adapter, reporter) = setup();
    adapter.script("BTCUSD", prices(&["10", "11"]));

    let gone: PriceListener = Arc::new(|_: &PriceUpdate| Err(DeliveryError::SinkClosed));
    let (listener, seen) = recording();
    hub.subscribe("BTCUSD", gone).await.unwrap();
    hub.subscribe("BTCUSD", listener).await.unwrap();

    ticks(2).await;
    assert_eq!(*seen.lock(), vec!["10", "11"]);
    assert_eq!(
        reporter.kinds(),
        vec!["listener_failed", "listener_failed"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_panicking_listener_does_not_stall_feed() {
    let (hub, adapter, reporter) = setup();
    adapter.script("BTCUSD", prices(&["1", "2", "3"]));

    let broken: PriceListener = Arc::new(|_: &PriceUpdate| panic!("listener bug"));
    let (listener, seen) = recording();
    let broken_id = hub.subscribe("BTCUSD", broken).await.unwrap();
    let id = hub.subscribe("BTCUSD", listener).await.unwrap();

    ticks(3).await;
    assert_eq!(*seen.lock(), vec!["1", "2", "3"]);
    assert!(hub.is_active("BTCUSD"));
    assert_eq!(hub.stats().listener_failures, 3);

    // Poller is still alive: a new price keeps flowing
    adapter.push("BTCUSD", ScriptedSample::price("4"));
    ticks(2).await;
    assert_eq!(seen.lock().last().map(String::as_str), Some("4"));

    hub.unsubscribe("BTCUSD", broken_id).await;
    assert_eq!(hub.unsubscribe("BTCUSD", id).await, Unsubscribed::FeedStopped);
    assert_eq!(adapter.open_handles(), 0);
    assert_eq!(adapter.closes("BTCUSD"), 1);
    assert!(reporter.kinds().iter().all(|kind| *kind == "listener_failed"));
    assert_eq!(reporter.kinds().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_same_listener_twice_is_registered_once() {
    let (hub, adapter, _) = setup();
    adapter.script("BTCUSD", prices(&["1", "2"]));

    let (listener, seen) = recording();
    let first = hub.subscribe("BTCUSD", Arc::clone(&listener)).await.unwrap();
    let second = hub.subscribe("btcusd", Arc::clone(&listener)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(hub.listener_count("BTCUSD"), 1);

    ticks(2).await;
    assert_eq!(*seen.lock(), vec!["1", "2"]);

    // Re-registering with a known price does not replay either
    hub.subscribe("BTCUSD", listener).await.unwrap();
    assert_eq!(seen.lock().len(), 2);

    assert_eq!(
        hub.unsubscribe("BTCUSD", first).await,
        Unsubscribed::FeedStopped
    );
    assert!(!hub.is_active("BTCUSD"));
    assert_eq!(adapter.closes("BTCUSD"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_then_recovery() {
    let (hub, adapter, reporter) = setup();
    adapter.fail_open("BTCUSD");

    let (listener, _) = recording();
    let err = hub
        .subscribe("BTCUSD", Arc::clone(&listener))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::AdapterUnavailable { .. }));
    assert!(!hub.is_active("BTCUSD"));
    assert_eq!(reporter.kinds(), vec!["open_failed"]);

    adapter.allow_open("BTCUSD");
    hub.subscribe("BTCUSD", listener).await.unwrap();
    assert!(hub.is_active("BTCUSD"));
    assert_eq!(adapter.opens("BTCUSD"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_unsubscribe_is_noop() {
    let (hub, adapter, _) = setup();
    let (listener, _) = recording();

    let id = hub.subscribe("BTCUSD", listener).await.unwrap();

    assert_eq!(
        hub.unsubscribe("ETHUSD", id).await,
        Unsubscribed::NotRegistered
    );
    assert_eq!(hub.unsubscribe("", id).await, Unsubscribed::NotRegistered);
    assert_eq!(
        hub.unsubscribe("BTCUSD", id).await,
        Unsubscribed::FeedStopped
    );
    assert_eq!(
        hub.unsubscribe("BTCUSD", id).await,
        Unsubscribed::NotRegistered
    );
    assert_eq!(adapter.closes("BTCUSD"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_opens_fresh_feed() {
    let (hub, adapter, _) = setup();
    adapter.script("BTCUSD", prices(&["5"]));

    let (listener, seen) = recording();
    let id = hub.subscribe("BTCUSD", Arc::clone(&listener)).await.unwrap();
    ticks(1).await;
    hub.unsubscribe("BTCUSD", id).await;

    // No replay from the previous feed
    hub.subscribe("BTCUSD", listener).await.unwrap();
    assert_eq!(*seen.lock(), vec!["5"]);

    ticks(1).await;
    assert_eq!(*seen.lock(), vec!["5", "5"]);
    assert_eq!(adapter.opens("BTCUSD"), 2);
    assert_eq!(adapter.closes("BTCUSD"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_sample_after_unsubscribe_is_discarded() {
    let (hub, adapter, _) = setup();
    adapter.script("BTCUSD", prices(&["7"]));
    adapter.set_sample_delay(Duration::from_millis(300));

    let (listener, seen) = recording();
    let id = hub.subscribe("BTCUSD", listener).await.unwrap();

    // Unsubscribe while the first sample is in flight
    tokio::time::sleep(Duration::from_millis(600)).await;
    hub.unsubscribe("BTCUSD", id).await;

    ticks(2).await;
    assert!(seen.lock().is_empty());
    assert_eq!(adapter.open_handles(), 0);
    assert!(!hub.is_active("BTCUSD"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_every_feed() {
    let (hub, adapter, _) = setup();
    for symbol in ["BTCUSD", "ETHUSD", "SOLUSD"] {
        let (listener, _) = recording();
        hub.subscribe(symbol, listener).await.unwrap();
    }
    assert_eq!(adapter.open_handles(), 3);

    hub.shutdown().await;
    hub.shutdown().await;

    assert_eq!(adapter.open_handles(), 0);
    assert_eq!(adapter.total_opens(), 3);
    assert!(hub.active_symbols().is_empty());
    assert!(adapter.was_shut_down());

    let stats = hub.stats();
    assert_eq!(stats.feeds_opened, 3);
    assert_eq!(stats.feeds_closed, 3);
}
