use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc, oneshot};

use super::{
    BrokerRelay, ChannelListener, ChannelPublisher, Inbound, LoopbackNetwork, MAX_CHANNEL_BYTES,
    NOTIFY_PAYLOAD_LIMIT, RelayConnector, TransactionalRelay, envelope,
};
use crate::backend::PubSubBackend;
use crate::directory::{Handler, handler};
use crate::utils::error::PubSubError;

type Delivery = (String, Value);

fn forward(tx: mpsc::UnboundedSender<Delivery>) -> Handler {
    handler(move |topic, message| {
        let tx = tx.clone();
        async move {
            let _ = tx.send((topic, message));
            Ok(())
        }
    })
}

fn noop() -> Handler {
    handler(|_, _| async { Ok(()) })
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("channel closed")
}

async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<Delivery>) {
    let res = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(res.is_err(), "unexpected delivery: {res:?}");
}

async fn started_broker(network: &LoopbackNetwork) -> BrokerRelay {
    let relay = BrokerRelay::with_connector(network.clone(), "app:").unwrap();
    relay.start().await.unwrap();
    relay
}

async fn started_transactional(network: &LoopbackNetwork) -> TransactionalRelay {
    let relay = TransactionalRelay::with_connector(network.clone(), "app:").unwrap();
    relay.start().await.unwrap();
    relay
}

#[test]
fn test_empty_prefix_is_rejected() {
    let network = LoopbackNetwork::new();
    assert!(matches!(
        BrokerRelay::with_connector(network.clone(), ""),
        Err(PubSubError::InvalidPrefix)
    ));
    assert!(matches!(
        TransactionalRelay::with_connector(network, ""),
        Err(PubSubError::InvalidPrefix)
    ));
}

#[test]
fn test_channel_name_is_prefix_plus_topic() {
    let relay = BrokerRelay::with_connector(LoopbackNetwork::new(), "app:").unwrap();
    assert_eq!(relay.channel_for("orders"), "app:orders");
    assert_eq!(relay.prefix(), "app:");
}

#[tokio::test]
async fn test_start_opens_two_connections() {
    let network = LoopbackNetwork::new();
    let relay = started_broker(&network).await;

    let stats = network.stats();
    assert_eq!(stats.publisher_connections, 1);
    assert_eq!(stats.listener_connections, 1);
    assert!(relay.is_running().await);

    relay.stop().await.unwrap();
    assert!(!relay.is_running().await);
}

#[tokio::test]
async fn test_operations_require_running() {
    let network = LoopbackNetwork::new();
    let relay = BrokerRelay::with_connector(network.clone(), "app:").unwrap();

    let err = relay.subscribe_topic("s1", "orders", noop()).await.unwrap_err();
    assert!(matches!(err, PubSubError::NotRunning { operation: "subscribe_topic" }));
    let err = relay.broadcast("orders", json!(1)).await.unwrap_err();
    assert!(matches!(err, PubSubError::NotRunning { operation: "broadcast" }));
    assert!(matches!(
        relay.stop().await,
        Err(PubSubError::NotRunning { operation: "stop" })
    ));
    assert_eq!(network.stats().publisher_connections, 0);

    relay.start().await.unwrap();
    relay.stop().await.unwrap();

    let err = relay.unsubscribe_topic("s1", "orders").await.unwrap_err();
    assert!(matches!(err, PubSubError::NotRunning { operation: "unsubscribe_topic" }));
    let err = relay.unsubscribe_all("s1").await.unwrap_err();
    assert!(matches!(err, PubSubError::NotRunning { operation: "unsubscribe_all" }));
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let network = LoopbackNetwork::new();
    let relay = started_broker(&network).await;

    assert!(matches!(relay.start().await, Err(PubSubError::AlreadyRunning)));
    assert_eq!(network.stats().listener_connections, 1);
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_channel_registered_on_first_and_released_on_last() {
    let network = LoopbackNetwork::new();
    let relay = started_broker(&network).await;

    relay.subscribe_topic("s1", "orders", noop()).await.unwrap();
    relay.subscribe_topic("s2", "orders", noop()).await.unwrap();
    relay.subscribe_topic("s1", "orders", noop()).await.unwrap();
    assert_eq!(network.listen_calls("app:orders"), 1);

    relay.unsubscribe_topic("s1", "orders").await.unwrap();
    assert_eq!(network.unlisten_calls("app:orders"), 0);
    relay.unsubscribe_topic("s2", "orders").await.unwrap();
    assert_eq!(network.unlisten_calls("app:orders"), 1);

    relay.unsubscribe_topic("s2", "orders").await.unwrap();
    assert_eq!(network.unlisten_calls("app:orders"), 1);
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_all_releases_only_emptied_channels() {
    let network = LoopbackNetwork::new();
    let relay = started_broker(&network).await;

    relay.subscribe_topic("s1", "orders", noop()).await.unwrap();
    relay.subscribe_topic("s1", "inventory", noop()).await.unwrap();
    relay.subscribe_topic("s2", "inventory", noop()).await.unwrap();

    relay.unsubscribe_all("s1").await.unwrap();
    assert_eq!(network.unlisten_calls("app:orders"), 1);
    assert_eq!(network.unlisten_calls("app:inventory"), 0);
    assert!(relay.directory().topics_for("s1").is_empty());
    assert_eq!(relay.directory().subscriber_count("inventory"), 1);
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_reaches_every_instance_including_sender() {
    let network = LoopbackNetwork::new();
    let node_a = started_broker(&network).await;
    let node_b = started_broker(&network).await;

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    node_a.subscribe_topic("alice", "orders", forward(tx_a)).await.unwrap();
    node_b.subscribe_topic("bob", "orders", forward(tx_b)).await.unwrap();

    node_a.broadcast("orders", json!({"id": 7})).await.unwrap();

    assert_eq!(next(&mut rx_a).await, ("orders".to_string(), json!({"id": 7})));
    assert_eq!(next(&mut rx_b).await, ("orders".to_string(), json!({"id": 7})));
    assert_silent(&mut rx_a).await;
    assert_silent(&mut rx_b).await;

    let published = network.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].channel, "app:orders");

    node_a.stop().await.unwrap();
    node_b.stop().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_without_subscribers_still_publishes() {
    let network = LoopbackNetwork::new();
    let relay = started_broker(&network).await;

    relay.broadcast("nobody", json!("hello")).await.unwrap();
    assert_eq!(network.published().len(), 1);
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_payload_is_dropped_and_listener_survives() {
    let network = LoopbackNetwork::new();
    let relay = started_broker(&network).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    relay.subscribe_topic("s1", "orders", forward(tx)).await.unwrap();

    network.inject("app:orders", "not json");
    network.inject("app:orders", r#"{"message": 1}"#);
    network.inject("app:orders", r#"{"topic": "orders"}"#);
    assert_silent(&mut rx).await;

    relay.broadcast("orders", json!(2)).await.unwrap();
    assert_eq!(next(&mut rx).await, ("orders".to_string(), json!(2)));
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_topic_channel_mismatch_is_dropped() {
    let network = LoopbackNetwork::new();
    let relay = started_broker(&network).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    relay.subscribe_topic("s1", "orders", forward(tx.clone())).await.unwrap();
    relay.subscribe_topic("s1", "inventory", forward(tx)).await.unwrap();

    network.inject("app:orders", r#"{"topic": "inventory", "message": 1}"#);
    assert_silent(&mut rx).await;

    network.inject("app:orders", r#"{"topic": "orders", "message": null}"#);
    assert_eq!(next(&mut rx).await, ("orders".to_string(), Value::Null));
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_oversized_notification_is_rejected_before_sending() {
    let network = LoopbackNetwork::new();
    let relay = started_transactional(&network).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    relay.subscribe_topic("s1", "orders", forward(tx)).await.unwrap();

    let err = relay
        .broadcast("orders", json!("x".repeat(9000)))
        .await
        .unwrap_err();
    match err {
        PubSubError::PayloadTooLarge { size, limit } => {
            assert!(size > 9000);
            assert_eq!(limit, NOTIFY_PAYLOAD_LIMIT);
        }
        other => panic!("expected PayloadTooLarge, got {other:?}"),
    }
    assert!(network.published().is_empty());
    assert_silent(&mut rx).await;

    let small = json!("y".repeat(100));
    relay.broadcast("orders", small.clone()).await.unwrap();
    assert_eq!(next(&mut rx).await, ("orders".to_string(), small));
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_payload_limit_can_be_configured() {
    let network = LoopbackNetwork::new();
    let relay = TransactionalRelay::with_connector(network.clone(), "app:")
        .unwrap()
        .with_payload_limit(64);
    assert_eq!(relay.payload_limit(), 64);
    relay.start().await.unwrap();

    let err = relay.broadcast("orders", json!("z".repeat(100))).await.unwrap_err();
    assert!(matches!(err, PubSubError::PayloadTooLarge { limit: 64, .. }));
    relay.broadcast("orders", json!(1)).await.unwrap();
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_broker_relay_has_no_payload_ceiling() {
    let network = LoopbackNetwork::new();
    let relay = started_broker(&network).await;

    relay.broadcast("orders", json!("x".repeat(9000))).await.unwrap();
    assert_eq!(network.published().len(), 1);
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_overlong_channel_is_rejected() {
    let network = LoopbackNetwork::new();
    let relay = started_transactional(&network).await;
    let topic = "t".repeat(MAX_CHANNEL_BYTES);

    let err = relay.subscribe_topic("s1", &topic, noop()).await.unwrap_err();
    assert!(matches!(err, PubSubError::InvalidChannel { .. }));
    assert!(relay.directory().is_empty());
    assert!(network.stats().listens.is_empty());

    let err = relay.broadcast(&topic, json!(1)).await.unwrap_err();
    assert!(matches!(err, PubSubError::InvalidChannel { .. }));
    assert!(network.published().is_empty());
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_listens_on_existing_topics() {
    let network = LoopbackNetwork::new();
    let relay = started_broker(&network).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    relay.subscribe_topic("s1", "orders", forward(tx)).await.unwrap();

    relay.stop().await.unwrap();
    relay.start().await.unwrap();

    assert_eq!(network.listen_calls("app:orders"), 2);
    let stats = network.stats();
    assert_eq!(stats.publisher_connections, 2);
    assert_eq!(stats.listener_connections, 2);

    relay.broadcast("orders", json!("again")).await.unwrap();
    assert_eq!(next(&mut rx).await, ("orders".to_string(), json!("again")));
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_delivery_after_stop() {
    let network = LoopbackNetwork::new();
    let relay = started_broker(&network).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    relay.subscribe_topic("s1", "orders", forward(tx)).await.unwrap();
    relay.stop().await.unwrap();

    network.inject("app:orders", r#"{"topic": "orders", "message": 1}"#);
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn test_lost_listener_surfaces_as_unavailable() {
    let network = LoopbackNetwork::new();
    let relay = started_broker(&network).await;

    network.sever();
    // Let the listener task observe the closed connection and exit.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = relay.subscribe_topic("s1", "orders", noop()).await.unwrap_err();
    assert!(matches!(err, PubSubError::ListenerUnavailable));
    assert!(!relay.directory().has_topic("orders"));

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_fails_when_transport_is_down() {
    let network = LoopbackNetwork::new();
    network.sever();
    let relay = BrokerRelay::with_connector(network, "app:").unwrap();

    assert!(matches!(relay.start().await, Err(PubSubError::Transport(_))));
    assert!(!relay.is_running().await);
}

#[tokio::test]
async fn test_envelope_at_notify_limit_is_rejected() {
    let network = LoopbackNetwork::new();
    let relay = started_transactional(&network).await;
    let overhead = envelope::encode("orders", &json!("")).unwrap().len();

    let at_limit = json!("a".repeat(NOTIFY_PAYLOAD_LIMIT - overhead));
    assert_eq!(
        envelope::encode("orders", &at_limit).unwrap().len(),
        NOTIFY_PAYLOAD_LIMIT
    );
    let err = relay.broadcast("orders", at_limit).await.unwrap_err();
    assert!(matches!(
        err,
        PubSubError::PayloadTooLarge { size: NOTIFY_PAYLOAD_LIMIT, limit: NOTIFY_PAYLOAD_LIMIT }
    ));
    assert!(network.published().is_empty());

    let below_limit = json!("a".repeat(NOTIFY_PAYLOAD_LIMIT - overhead - 1));
    relay.broadcast("orders", below_limit).await.unwrap();
    assert_eq!(network.published()[0].payload.len(), NOTIFY_PAYLOAD_LIMIT - 1);
    relay.stop().await.unwrap();
}

/// Loopback transport whose first `listen` parks until released and then fails.
#[derive(Clone)]
struct StallingConnector {
    network: LoopbackNetwork,
    release: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
    entered: Arc<Notify>,
}

impl StallingConnector {
    fn new(network: LoopbackNetwork) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let connector = Self {
            network,
            release: Arc::new(Mutex::new(Some(rx))),
            entered: Arc::new(Notify::new()),
        };
        (connector, tx)
    }
}

#[async_trait]
impl RelayConnector for StallingConnector {
    async fn connect_publisher(&self) -> Result<Box<dyn ChannelPublisher>, PubSubError> {
        self.network.connect_publisher().await
    }

    async fn connect_listener(&self) -> Result<Box<dyn ChannelListener>, PubSubError> {
        Ok(Box::new(StallingListener {
            inner: self.network.connect_listener().await?,
            connector: self.clone(),
        }))
    }
}

struct StallingListener {
    inner: Box<dyn ChannelListener>,
    connector: StallingConnector,
}

#[async_trait]
impl ChannelListener for StallingListener {
    async fn listen(&mut self, channel: &str) -> Result<(), PubSubError> {
        let release = self.connector.release.lock().take();
        if let Some(release) = release {
            self.connector.entered.notify_one();
            let _ = release.await;
            return Err(PubSubError::Transport("transient".to_string()));
        }
        self.inner.listen(channel).await
    }

    async fn unlisten(&mut self, channel: &str) -> Result<(), PubSubError> {
        self.inner.unlisten(channel).await
    }

    async fn recv(&mut self) -> Result<Option<Inbound>, PubSubError> {
        self.inner.recv().await
    }
}

#[tokio::test]
async fn test_failed_first_listen_leaves_later_subscriber_registered() {
    let network = LoopbackNetwork::new();
    let (connector, release) = StallingConnector::new(network.clone());
    let entered = connector.entered.clone();
    let relay = Arc::new(BrokerRelay::with_connector(connector, "app:").unwrap());
    relay.start().await.unwrap();
    let peer = started_broker(&network).await;

    let first = tokio::spawn({
        let relay = relay.clone();
        async move { relay.subscribe_topic("alice", "orders", noop()).await }
    });
    entered.notified().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let second = tokio::spawn({
        let relay = relay.clone();
        async move { relay.subscribe_topic("bob", "orders", forward(tx)).await }
    });
    while relay.directory().subscriber_count("orders") < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    release.send(()).unwrap();
    let first = first.await.unwrap();
    let second = second.await.unwrap();

    assert!(matches!(first, Err(PubSubError::Transport(_))));
    assert!(second.is_ok());
    assert!(relay.directory().handler("bob", "orders").is_some());
    assert!(relay.directory().handler("alice", "orders").is_none());
    assert_eq!(network.listen_calls("app:orders"), 1);

    peer.broadcast("orders", json!("after retry")).await.unwrap();
    assert_eq!(next(&mut rx).await, ("orders".to_string(), json!("after retry")));

    peer.stop().await.unwrap();
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_sole_subscribe_leaves_no_channel() {
    let network = LoopbackNetwork::new();
    let (connector, release) = StallingConnector::new(network.clone());
    release.send(()).unwrap();
    let relay = BrokerRelay::with_connector(connector, "app:").unwrap();
    relay.start().await.unwrap();

    let err = relay.subscribe_topic("alice", "orders", noop()).await.unwrap_err();
    assert!(matches!(err, PubSubError::Transport(_)));
    assert!(!relay.directory().has_topic("orders"));
    assert_eq!(network.listen_calls("app:orders"), 0);

    relay.subscribe_topic("alice", "orders", noop()).await.unwrap();
    assert_eq!(network.listen_calls("app:orders"), 1);
    relay.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscribe_and_unsubscribe_settle_on_directory_state() {
    let network = LoopbackNetwork::new();
    let relay = Arc::new(started_broker(&network).await);

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            let session = format!("s{worker}");
            for round in 0..50 {
                relay.subscribe_topic(&session, "orders", noop()).await.unwrap();
                if (worker + round) % 3 != 0 {
                    relay.unsubscribe_topic(&session, "orders").await.unwrap();
                }
                tokio::task::yield_now().await;
            }
            if worker % 2 == 0 {
                relay.unsubscribe_all(&session).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let channel = relay.channel_for("orders");
    let registered = network.listen_calls(&channel) - network.unlisten_calls(&channel);
    assert_eq!(registered, relay.directory().has_topic("orders") as usize);
    relay.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_churn_ending_empty_releases_channel() {
    let network = LoopbackNetwork::new();
    let relay = Arc::new(started_broker(&network).await);

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            let session = format!("s{worker}");
            for _ in 0..50 {
                relay.subscribe_topic(&session, "orders", noop()).await.unwrap();
                relay.unsubscribe_topic(&session, "orders").await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(!relay.directory().has_topic("orders"));
    assert_eq!(
        network.listen_calls("app:orders"),
        network.unlisten_calls("app:orders")
    );
    relay.stop().await.unwrap();
}
