//! Command Router Integration Tests
//!
//! Drives full `/poll` conversations through the router with a recording
//! sink and the in-process store.

use async_trait::async_trait;
use parking_lot::Mutex;
use pollbot::channels::{ChannelError, ChannelResponse, MessageSink, Post};
use pollbot::polls::PollStore;
use pollbot::router::{CommandRouter, RouterConfig};
use pollbot::store::MemoryConnection;
use std::sync::Arc;

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<ChannelResponse>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<ChannelResponse> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, response: ChannelResponse) -> Result<String, ChannelError> {
        let mut sent = self.sent.lock();
        sent.push(response);
        Ok(format!("reply-{}", sent.len()))
    }
}

struct Harness {
    router: CommandRouter,
    sink: Arc<RecordingSink>,
    conn: Arc<MemoryConnection>,
    next_post: Mutex<u32>,
}

impl Harness {
    fn new(config: RouterConfig) -> Self {
        let conn = Arc::new(MemoryConnection::new());
        let sink = Arc::new(RecordingSink::default());
        let router = CommandRouter::new(PollStore::new(conn.clone()), sink.clone(), config);
        Self {
            router,
            sink,
            conn,
            next_post: Mutex::new(0),
        }
    }

    /// Post `message` as `user` and return the single reply
    async fn say(&self, user: &str, message: &str) -> String {
        let post_id = {
            let mut next = self.next_post.lock();
            *next += 1;
            format!("post-{}", next)
        };
        let post = Post::text(&post_id, user, "town-square", message);
        self.router.dispatch(&post).await;

        let mut replies = self.sink.take();
        assert_eq!(replies.len(), 1, "expected exactly one reply to {:?}", message);
        let reply = replies.remove(0);
        assert_eq!(reply.channel_id, "town-square");
        assert_eq!(reply.reply_to.as_deref(), Some(post_id.as_str()));
        reply.content
    }

    async fn create(&self, user: &str, message: &str) -> String {
        let reply = self.say(user, message).await;
        reply
            .lines()
            .next()
            .and_then(|line| line.strip_prefix("Poll created! ID: "))
            .map(str::to_string)
            .unwrap_or_else(|| panic!("unexpected create reply: {}", reply))
    }
}

#[tokio::test]
async fn test_create_lists_options() {
    let h = Harness::new(RouterConfig::default());
    let reply = h
        .say("alice", r#"/poll create "Best language?" "Rust" "Go lang" C"#)
        .await;

    assert!(reply.starts_with("Poll created! ID: "));
    assert!(reply.contains("Question: Best language?"));
    assert!(reply.contains("1: Rust\n"));
    assert!(reply.contains("2: Go lang\n"));
    assert!(reply.contains("3: C\n"));
    assert_eq!(h.conn.len(), 1);
}

#[tokio::test]
async fn test_create_needs_two_options() {
    let h = Harness::new(RouterConfig::default());

    let reply = h.say("alice", r#"/poll create "Lonely question" "Only""#).await;
    assert!(reply.starts_with("Usage: /poll create"));

    let reply = h.say("alice", "/poll create").await;
    assert!(reply.starts_with("Usage: /poll create"));

    assert!(h.conn.is_empty());
}

#[tokio::test]
async fn test_vote_then_show() {
    let h = Harness::new(RouterConfig::default());
    let id = h.create("alice", r#"/poll create "Tabs?" Tabs Spaces"#).await;

    for user in ["alice", "bob", "carol"] {
        let reply = h.say(user, &format!("/poll vote {} 1", id)).await;
        assert_eq!(reply, "Your vote for option 1 has been recorded");
    }
    let reply = h.say("dave", &format!("/poll vote {} 2", id)).await;
    assert_eq!(reply, "Your vote for option 2 has been recorded");

    let reply = h.say("erin", &format!("/poll show {}", id)).await;
    assert!(reply.starts_with(&format!("Poll results ID: {}\nQuestion: Tabs?\n", id)));
    assert!(reply.contains("1: Tabs - 3 votes (75.0%)"));
    assert!(reply.contains("2: Spaces - 1 votes (25.0%)"));
}

#[tokio::test]
async fn test_show_empty_poll() {
    let h = Harness::new(RouterConfig::default());
    let id = h.create("alice", "/poll create Q yes no").await;

    let reply = h.say("bob", &format!("/poll show {}", id)).await;
    assert!(reply.contains("1: yes - 0 votes (0.0%)"));
    assert!(reply.contains("2: no - 0 votes (0.0%)"));
}

#[tokio::test]
async fn test_vote_errors() {
    let h = Harness::new(RouterConfig::default());
    let id = h.create("alice", "/poll create Q yes no").await;

    assert_eq!(
        h.say("bob", &format!("/poll vote {}", id)).await,
        "To vote, give the poll ID and the option number"
    );
    assert_eq!(h.say("bob", &format!("/poll vote {} two", id)).await, "Invalid option number");
    assert_eq!(h.say("bob", &format!("/poll vote {} 0", id)).await, "Invalid option number");
    assert_eq!(
        h.say("bob", &format!("/poll vote {} 3", id)).await,
        "Error voting: invalid option number"
    );
    assert_eq!(
        h.say("bob", "/poll vote 12345 1").await,
        "Error voting: poll not found"
    );

    let results = h.router.store().show(&id).await.unwrap();
    assert_eq!(results.total_votes, 0);
}

#[tokio::test]
async fn test_stop_is_owner_only() {
    let h = Harness::new(RouterConfig::default());
    let id = h.create("alice", "/poll create Q yes no").await;

    assert_eq!(
        h.say("mallory", &format!("/poll stop {}", id)).await,
        "Only the poll creator can stop this poll"
    );
    assert!(h.router.store().fetch(&id).await.unwrap().active);

    assert_eq!(h.say("alice", &format!("/poll stop {}", id)).await, "Poll stopped");
    assert_eq!(
        h.say("alice", &format!("/poll stop {}", id)).await,
        "Error stopping poll: poll is already stopped"
    );
    assert_eq!(
        h.say("bob", &format!("/poll vote {} 1", id)).await,
        "Error voting: poll is closed"
    );

    let reply = h.say("bob", &format!("/poll show {}", id)).await;
    assert!(reply.ends_with("(closed)\n"));
}

#[tokio::test]
async fn test_delete_is_owner_only() {
    let h = Harness::new(RouterConfig::default());
    let id = h.create("alice", "/poll create Q yes no").await;

    assert_eq!(
        h.say("mallory", &format!("/poll delete {}", id)).await,
        "Only the poll creator can delete this poll"
    );
    assert_eq!(h.conn.len(), 1);

    assert_eq!(h.say("alice", &format!("/poll delete {}", id)).await, "Poll deleted");
    assert!(h.conn.is_empty());
    assert_eq!(
        h.say("alice", &format!("/poll show {}", id)).await,
        "Error showing poll: poll not found"
    );
}

#[tokio::test]
async fn test_anyone_may_stop_when_not_owner_only() {
    let h = Harness::new(RouterConfig { owner_only: false });
    let id = h.create("alice", "/poll create Q yes no").await;

    assert_eq!(h.say("bob", &format!("/poll stop {}", id)).await, "Poll stopped");
    assert_eq!(h.say("bob", &format!("/poll delete {}", id)).await, "Poll deleted");
}

#[tokio::test]
async fn test_missing_ids() {
    let h = Harness::new(RouterConfig::default());

    assert_eq!(h.say("bob", "/poll show").await, "Give the poll ID to show its results");
    assert_eq!(h.say("bob", "/poll stop").await, "Give the poll ID to stop");
    assert_eq!(h.say("bob", "/poll delete").await, "Give the poll ID to delete");
}

#[tokio::test]
async fn test_help_and_unknown() {
    let h = Harness::new(RouterConfig::default());

    assert!(h.say("bob", "/poll help").await.starts_with("Available poll commands:"));
    assert!(h.say("bob", "/poll help vote").await.starts_with("/poll vote"));
    assert!(h.say("bob", "/poll").await.starts_with("Incorrect poll command"));
    assert!(h.say("bob", "/poll dance").await.starts_with("Unknown /poll subcommand"));
}

#[tokio::test]
async fn test_non_commands_get_no_reply() {
    let h = Harness::new(RouterConfig::default());

    for message in ["hello there", "/polls create a b c", "poll create a b c", ""] {
        let post = Post::text("p", "bob", "town-square", message);
        h.router.dispatch(&post).await;
    }
    assert!(h.sink.take().is_empty());
}

#[tokio::test]
async fn test_storage_failure_reply() {
    let h = Harness::new(RouterConfig::default());
    let id = h.create("alice", "/poll create Q yes no").await;

    h.conn.set_unreachable(true);
    assert_eq!(
        h.say("bob", &format!("/poll vote {} 1", id)).await,
        "Error voting: storage is unavailable, try again later"
    );
    assert!(h
        .say("alice", "/poll create Q yes no")
        .await
        .starts_with("Error creating poll:"));
}

#[tokio::test]
async fn test_reply_inside_thread_names_thread_root() {
    let h = Harness::new(RouterConfig::default());

    let mut post = Post::text("reply-post", "bob", "town-square", "/poll help");
    post.root_id = "thread-root".to_string();
    h.router.dispatch(&post).await;

    let replies = h.sink.take();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].reply_to.as_deref(), Some("thread-root"));

    let top_level = Post::text("top-post", "bob", "town-square", "/poll help");
    h.router.dispatch(&top_level).await;

    let replies = h.sink.take();
    assert_eq!(replies[0].reply_to.as_deref(), Some("top-post"));
}
