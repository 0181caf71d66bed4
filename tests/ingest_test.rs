//! Ingestion Loop Integration Tests
//!
//! Runs the loop against a scripted event source: each `subscribe` call
//! consumes the next scripted outcome, and once the script is exhausted the
//! source hands out a stream that never yields and signals the test.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use pollbot::channels::{
    ChannelError, ChannelResponse, EventSource, EventStream, InboundEvent, MessageSink, Post,
};
use pollbot::ingest::{IngestionConfig, IngestionLoop, IngestionState};
use pollbot::polls::PollStore;
use pollbot::router::{CommandRouter, RouterConfig};
use pollbot::store::MemoryConnection;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const CHANNEL: &str = "town-square";
const BOT: &str = "pollbot";

type Outcome = Result<Vec<InboundEvent>, ChannelError>;

struct ScriptedSource {
    script: Mutex<VecDeque<Outcome>>,
    exhausted: Notify,
}

impl ScriptedSource {
    fn new(script: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            exhausted: Notify::new(),
        })
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn subscribe(&self) -> Result<EventStream, ChannelError> {
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(events)) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
            Some(Err(e)) => Err(e),
            None => {
                self.exhausted.notify_one();
                Ok(stream::pending().boxed())
            }
        }
    }
}

/// Records replies after an optional delay and tracks peak concurrency
#[derive(Default)]
struct RecordingSink {
    delay: Duration,
    sent: Mutex<Vec<ChannelResponse>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingSink {
    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn replies_to(&self) -> Vec<Option<String>> {
        self.sent.lock().iter().map(|r| r.reply_to.clone()).collect()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, response: ChannelResponse) -> Result<String, ChannelError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.sent.lock().push(response);

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok("reply".to_string())
    }
}

fn command(id: &str, user: &str, message: &str) -> InboundEvent {
    InboundEvent::posted(Post::text(id, user, CHANNEL, message))
}

fn build(
    source: Arc<ScriptedSource>,
    sink: Arc<RecordingSink>,
    max_in_flight: usize,
) -> Arc<IngestionLoop> {
    build_with_backoff(source, sink, max_in_flight, Duration::from_millis(10))
}

fn build_with_backoff(
    source: Arc<ScriptedSource>,
    sink: Arc<RecordingSink>,
    max_in_flight: usize,
    reconnect_backoff: Duration,
) -> Arc<IngestionLoop> {
    let store = PollStore::new(Arc::new(MemoryConnection::new()));
    let router = CommandRouter::new(store, sink, RouterConfig::default());

    let mut config = IngestionConfig::new(CHANNEL, BOT);
    config.reconnect_backoff = reconnect_backoff;
    config.max_in_flight = max_in_flight;

    Arc::new(IngestionLoop::new(source, Arc::new(router), config))
}

/// Run the loop until the script is exhausted, then shut it down
async fn run_script(ingestion: Arc<IngestionLoop>, source: Arc<ScriptedSource>) {
    let shutdown = CancellationToken::new();
    let handle = {
        let ingestion = ingestion.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { ingestion.run(shutdown).await })
    };

    tokio::time::timeout(Duration::from_secs(5), source.exhausted.notified())
        .await
        .expect("script was not consumed");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ingestion.state(), IngestionState::Listening);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .unwrap();
    assert_eq!(ingestion.state(), IngestionState::Disconnected);
}

#[tokio::test]
async fn test_only_qualifying_posts_are_dispatched() {
    let source = ScriptedSource::new(vec![Ok(vec![
        command("p1", "alice", "/poll help"),
        command("p2", BOT, "/poll help"),
        InboundEvent::posted(Post::text("p3", "alice", "off-topic", "/poll help")),
        InboundEvent::other("typing", CHANNEL),
        command("p4", "bob", "just chatting"),
    ])]);
    let sink = RecordingSink::with_delay(Duration::ZERO);
    let ingestion = build(source.clone(), sink.clone(), 4);

    run_script(ingestion.clone(), source).await;

    assert_eq!(sink.replies_to(), vec![Some("p1".to_string())]);

    let stats = ingestion.stats();
    assert_eq!(stats.events_received.load(Ordering::Relaxed), 5);
    assert_eq!(stats.events_filtered.load(Ordering::Relaxed), 3);
    // Non-command posts are dispatched and produce no reply
    assert_eq!(stats.commands_dispatched.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_reconnects_after_failed_subscribes() {
    let source = ScriptedSource::new(vec![
        Err(ChannelError::ConnectionFailed("refused".to_string())),
        Err(ChannelError::AuthenticationFailed("expired".to_string())),
        Ok(vec![command("p1", "alice", "/poll help")]),
    ]);
    let sink = RecordingSink::with_delay(Duration::ZERO);
    let ingestion = build(source.clone(), sink.clone(), 4);

    run_script(ingestion.clone(), source).await;

    assert_eq!(sink.replies_to(), vec![Some("p1".to_string())]);
    let stats = ingestion.stats();
    assert_eq!(stats.subscribe_attempts.load(Ordering::Relaxed), 4);
    assert_eq!(stats.subscribe_failures.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_reconnects_after_stream_ends() {
    let source = ScriptedSource::new(vec![
        Ok(vec![command("p1", "alice", "/poll help")]),
        Ok(vec![]),
        Ok(vec![command("p2", "bob", "/poll help")]),
    ]);
    let sink = RecordingSink::with_delay(Duration::ZERO);
    let ingestion = build(source.clone(), sink.clone(), 4);

    run_script(ingestion.clone(), source).await;

    let mut replies = sink.replies_to();
    replies.sort();
    assert_eq!(replies, vec![Some("p1".to_string()), Some("p2".to_string())]);
    assert_eq!(ingestion.stats().subscribe_failures.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_shutdown_waits_for_running_commands() {
    let source = ScriptedSource::new(vec![Ok(vec![
        command("p1", "alice", "/poll help"),
        command("p2", "bob", "/poll help"),
    ])]);
    let sink = RecordingSink::with_delay(Duration::from_millis(200));
    let ingestion = build(source.clone(), sink.clone(), 4);

    run_script(ingestion.clone(), source).await;

    assert_eq!(sink.replies_to().len(), 2);
    assert_eq!(ingestion.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_commands_are_bounded() {
    let events = (0..6)
        .map(|i| command(&format!("p{}", i), "alice", "/poll help"))
        .collect();
    let source = ScriptedSource::new(vec![Ok(events)]);
    let sink = RecordingSink::with_delay(Duration::from_millis(30));
    let ingestion = build(source.clone(), sink.clone(), 2);

    run_script(ingestion.clone(), source).await;

    assert_eq!(sink.replies_to().len(), 6);
    assert!(sink.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_commands_reach_the_store() {
    let source = ScriptedSource::new(vec![Ok(vec![command(
        "p1",
        "alice",
        r#"/poll create "Lunch?" Pizza Sushi"#,
    )])]);
    let sink = RecordingSink::with_delay(Duration::ZERO);
    let ingestion = build(source.clone(), sink.clone(), 4);

    run_script(ingestion, source).await;

    let sent = sink.sent.lock();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].content.starts_with("Poll created! ID: "));
    assert_eq!(sent[0].channel_id, CHANNEL);
}

#[tokio::test]
async fn test_empty_sessions_back_off() {
    let source = ScriptedSource::new(vec![Ok(vec![]), Ok(vec![])]);
    let sink = RecordingSink::with_delay(Duration::ZERO);
    let backoff = Duration::from_millis(150);
    let ingestion = build_with_backoff(source.clone(), sink, 4, backoff);

    let started = std::time::Instant::now();
    run_script(ingestion.clone(), source).await;

    // Two empty sessions, each followed by a full backoff
    assert!(started.elapsed() >= backoff * 2);
    let stats = ingestion.stats();
    assert_eq!(stats.empty_sessions.load(Ordering::Relaxed), 2);
    assert_eq!(stats.subscribe_attempts.load(Ordering::Relaxed), 3);
    assert_eq!(stats.subscribe_failures.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_session_with_events_reconnects_immediately() {
    let source = ScriptedSource::new(vec![Ok(vec![command("p1", "alice", "/poll help")])]);
    let sink = RecordingSink::with_delay(Duration::ZERO);
    let ingestion = build_with_backoff(source.clone(), sink.clone(), 4, Duration::from_secs(30));

    run_script(ingestion.clone(), source).await;

    assert_eq!(sink.replies_to(), vec![Some("p1".to_string())]);
    assert_eq!(ingestion.stats().empty_sessions.load(Ordering::Relaxed), 0);
}
