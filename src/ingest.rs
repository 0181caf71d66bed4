//! Event Ingestion Loop
//!
//! Keeps a live event subscription open and feeds qualifying posts to the
//! command router:
//! - **Disconnected**: no subscription
//! - **Connecting**: opening a subscription, retried forever with a fixed
//!   backoff
//! - **Listening**: consuming events until the subscription drops; a
//!   session that ended without delivering any event also waits out the
//!   backoff before resubscribing
//!
//! Each qualifying post runs in its own task. In-flight tasks are bounded by
//! a semaphore; when it is exhausted the loop waits for a permit before
//! reading the next event, so bursts queue up instead of being dropped.

use crate::channels::{DynEventSource, EventKind, InboundEvent, Post};
use crate::router::CommandRouter;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Ingestion states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IngestionState {
    Disconnected = 0,
    Connecting = 1,
    Listening = 2,
}

impl From<u8> for IngestionState {
    fn from(v: u8) -> Self {
        match v {
            1 => IngestionState::Connecting,
            2 => IngestionState::Listening,
            _ => IngestionState::Disconnected,
        }
    }
}

/// Configuration for the ingestion loop
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Only events from this channel are handled
    pub channel_id: String,
    /// Posts by this user (the bot itself) are ignored
    pub bot_user_id: String,
    /// Delay after a failed subscription attempt or an empty session
    /// (default: 2s)
    pub reconnect_backoff: Duration,
    /// Maximum concurrently running command tasks (default: 32)
    pub max_in_flight: usize,
}

impl IngestionConfig {
    pub fn new(channel_id: &str, bot_user_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            bot_user_id: bot_user_id.to_string(),
            reconnect_backoff: Duration::from_secs(2),
            max_in_flight: 32,
        }
    }
}

/// Counters for monitoring
#[derive(Debug, Default)]
pub struct IngestionStats {
    pub subscribe_attempts: AtomicU64,
    pub subscribe_failures: AtomicU64,
    pub empty_sessions: AtomicU64,
    pub events_received: AtomicU64,
    pub events_filtered: AtomicU64,
    pub commands_dispatched: AtomicU64,
}

/// Subscription loop feeding the command router
pub struct IngestionLoop {
    source: DynEventSource,
    router: Arc<CommandRouter>,
    config: IngestionConfig,
    state: AtomicU8,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    stats: IngestionStats,
}

impl IngestionLoop {
    pub fn new(source: DynEventSource, router: Arc<CommandRouter>, config: IngestionConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));

        Self {
            source,
            router,
            config,
            state: AtomicU8::new(IngestionState::Disconnected as u8),
            permits,
            tasks: TaskTracker::new(),
            stats: IngestionStats::default(),
        }
    }

    /// Get current state
    pub fn state(&self) -> IngestionState {
        IngestionState::from(self.state.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> &IngestionStats {
        &self.stats
    }

    /// Command tasks currently running
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    fn transition_to(&self, new_state: IngestionState) {
        let old = IngestionState::from(self.state.swap(new_state as u8, Ordering::Relaxed));
        if old != new_state {
            debug!("Ingestion state: {:?} -> {:?}", old, new_state);
        }
    }

    /// Run until `shutdown` is cancelled, then close the subscription and
    /// wait for dispatched commands to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        'session: while !shutdown.is_cancelled() {
            self.transition_to(IngestionState::Connecting);
            self.stats.subscribe_attempts.fetch_add(1, Ordering::Relaxed);

            let subscription = tokio::select! {
                _ = shutdown.cancelled() => break 'session,
                result = self.source.subscribe() => result,
            };

            let mut events = match subscription {
                Ok(events) => events,
                Err(e) => {
                    self.stats.subscribe_failures.fetch_add(1, Ordering::Relaxed);
                    self.transition_to(IngestionState::Disconnected);
                    warn!(
                        "Event subscription failed, retrying in {:?}: {}",
                        self.config.reconnect_backoff, e
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break 'session,
                        _ = tokio::time::sleep(self.config.reconnect_backoff) => continue 'session,
                    }
                }
            };

            self.transition_to(IngestionState::Listening);
            info!("Event subscription connected");

            let mut delivered = 0u64;
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => break 'session,
                    next = events.next() => next,
                };

                match next {
                    Some(Ok(event)) => {
                        delivered += 1;
                        self.accept(event).await;
                    }
                    Some(Err(e)) => {
                        warn!("Event subscription lost, reconnecting: {}", e);
                        break;
                    }
                    None => {
                        warn!("Event subscription closed, reconnecting");
                        break;
                    }
                }
            }

            self.transition_to(IngestionState::Disconnected);

            // Empty session: back off before resubscribing
            if delivered == 0 {
                self.stats.empty_sessions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Subscription ended without events, waiting {:?}",
                    self.config.reconnect_backoff
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break 'session,
                    _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
                }
            }
        }

        self.transition_to(IngestionState::Disconnected);
        info!(in_flight = self.tasks.len(), "Ingestion stopped, waiting for running commands");
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Filter one event and spawn its command task
    async fn accept(&self, event: InboundEvent) {
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);

        let Some(post) = self.qualifying_post(event) else {
            self.stats.events_filtered.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(post_id = %post.id, "Command permits unavailable: {}", e);
                return;
            }
        };

        self.stats.commands_dispatched.fetch_add(1, Ordering::Relaxed);
        let router = self.router.clone();
        self.tasks.spawn(async move {
            router.dispatch(&post).await;
            drop(permit);
        });
    }

    /// The post to dispatch, or `None` for off-channel, non-post and
    /// self-authored events
    pub fn qualifying_post(&self, event: InboundEvent) -> Option<Post> {
        if event.channel_id != self.config.channel_id {
            return None;
        }
        if event.kind != EventKind::Posted {
            return None;
        }

        let Some(post) = event.post else {
            error!("Posted event without a post payload");
            return None;
        };

        if post.user_id == self.config.bot_user_id {
            return None;
        }

        Some(post)
    }
}
