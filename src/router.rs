//! Command Router
//!
//! Maps `/poll` subcommands to store operations and formats the reply.
//! Every command gets exactly one reply, threaded under the inbound post;
//! messages that are not poll commands get none.

use crate::channels::{ChannelResponse, DynSink, Post};
use crate::parser::{Invocation, Subcommand};
use crate::polls::{PollError, PollResults, PollStore};
use std::fmt::Write;
use tracing::{debug, error, info, warn};

const MISSING_SUBCOMMAND: &str =
    "Incorrect poll command, type /poll help for the list of commands";
const UNKNOWN_SUBCOMMAND: &str =
    "Unknown /poll subcommand, type /poll help for the list of commands";
const CREATE_USAGE: &str = r#"Usage: /poll create "Question" "Option1" "Option2" ..."#;

const HELP_OVERVIEW: &str = "Available poll commands:\n\
/poll create \"Question\" \"Option1\" \"Option2\" ... - create a new poll\n\
/poll vote [ID] [option_number] - vote\n\
/poll show [ID] - show results\n\
/poll stop [ID] - stop a poll (creator only)\n\
/poll delete [ID] - delete a poll (creator only)\n\
/poll help [command] - help";

/// Router behavior switches
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Only the creator may stop or delete a poll
    pub owner_only: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { owner_only: true }
    }
}

/// Poll command router
#[derive(Clone)]
pub struct CommandRouter {
    store: PollStore,
    sink: DynSink,
    config: RouterConfig,
}

impl CommandRouter {
    pub fn new(store: PollStore, sink: DynSink, config: RouterConfig) -> Self {
        Self { store, sink, config }
    }

    pub fn store(&self) -> &PollStore {
        &self.store
    }

    /// Handle one inbound post and send the reply, if any
    pub async fn dispatch(&self, post: &Post) {
        let Some(reply) = self.respond(post).await else {
            return;
        };

        let response =
            ChannelResponse::text(&post.channel_id, &reply).with_reply(post.thread_root());
        if let Err(e) = self.sink.send(response).await {
            error!(post_id = %post.id, "Failed to send reply: {}", e);
        }
    }

    /// Compute the reply for a post. `None` when the post is not a poll
    /// command.
    pub async fn respond(&self, post: &Post) -> Option<String> {
        let invocation = Invocation::parse(&post.message)?;
        debug!(
            user = %post.user_id,
            subcommand = %invocation.subcommand.as_str(),
            "Poll command"
        );

        let args = &invocation.args;
        let reply = match &invocation.subcommand {
            Subcommand::Create => self.handle_create(post, args).await,
            Subcommand::Vote => self.handle_vote(post, args).await,
            Subcommand::Show => self.handle_show(args).await,
            Subcommand::Stop => self.handle_stop(post, args).await,
            Subcommand::Delete => self.handle_delete(post, args).await,
            Subcommand::Help => help_text(args.first().map(String::as_str)).to_string(),
            Subcommand::Missing => MISSING_SUBCOMMAND.to_string(),
            Subcommand::Unknown(token) => {
                debug!(token = %token, "Unknown subcommand");
                UNKNOWN_SUBCOMMAND.to_string()
            }
        };

        Some(reply)
    }

    async fn handle_create(&self, post: &Post, args: &[String]) -> String {
        if args.len() < 3 {
            return CREATE_USAGE.to_string();
        }

        let title = &args[0];
        let options = args[1..].to_vec();
        info!(creator = %post.user_id, title = %title, "Creating poll");

        match self.store.create(&post.user_id, title, options.clone()).await {
            Ok(poll_id) => {
                let mut reply = format!(
                    "Poll created! ID: {}\nQuestion: {}\nOptions:\n",
                    poll_id, title
                );
                for (i, option) in options.iter().enumerate() {
                    let _ = writeln!(reply, "{}: {}", i + 1, option);
                }
                reply
            }
            Err(e) => {
                error!(creator = %post.user_id, "Failed to create poll: {}", e);
                format!("Error creating poll: {}", describe(&e))
            }
        }
    }

    async fn handle_vote(&self, post: &Post, args: &[String]) -> String {
        if args.len() < 2 {
            return "To vote, give the poll ID and the option number".to_string();
        }

        let poll_id = &args[0];
        let number = match args[1].parse::<i64>() {
            Ok(n) if n >= 1 => n,
            _ => return "Invalid option number".to_string(),
        };

        info!(poll_id = %poll_id, user = %post.user_id, option = number, "Voting in poll");
        match self.store.vote(poll_id, number - 1).await {
            Ok(_) => format!("Your vote for option {} has been recorded", number),
            Err(e) => {
                error!(poll_id = %poll_id, "Failed to vote in poll: {}", e);
                format!("Error voting: {}", describe(&e))
            }
        }
    }

    async fn handle_show(&self, args: &[String]) -> String {
        let Some(poll_id) = args.first() else {
            return "Give the poll ID to show its results".to_string();
        };

        match self.store.show(poll_id).await {
            Ok(results) => format_results(&results),
            Err(e) => {
                warn!(poll_id = %poll_id, "Failed to show poll: {}", e);
                format!("Error showing poll: {}", describe(&e))
            }
        }
    }

    async fn handle_stop(&self, post: &Post, args: &[String]) -> String {
        let Some(poll_id) = args.first() else {
            return "Give the poll ID to stop".to_string();
        };

        info!(poll_id = %poll_id, user = %post.user_id, "Stopping poll");
        let result = match self.check_owner(poll_id, &post.user_id).await {
            Ok(true) => self.store.stop(poll_id).await,
            Ok(false) => return "Only the poll creator can stop this poll".to_string(),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => "Poll stopped".to_string(),
            Err(e) => {
                error!(poll_id = %poll_id, "Failed to stop poll: {}", e);
                format!("Error stopping poll: {}", describe(&e))
            }
        }
    }

    async fn handle_delete(&self, post: &Post, args: &[String]) -> String {
        let Some(poll_id) = args.first() else {
            return "Give the poll ID to delete".to_string();
        };

        info!(poll_id = %poll_id, user = %post.user_id, "Deleting poll");
        let result = match self.check_owner(poll_id, &post.user_id).await {
            Ok(true) => self.store.delete(poll_id).await,
            Ok(false) => return "Only the poll creator can delete this poll".to_string(),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => "Poll deleted".to_string(),
            Err(e) => {
                error!(poll_id = %poll_id, "Failed to delete poll: {}", e);
                format!("Error deleting poll: {}", describe(&e))
            }
        }
    }

    /// Creator IDs never change, so the check needs no lock
    async fn check_owner(&self, poll_id: &str, requester: &str) -> Result<bool, PollError> {
        if !self.config.owner_only {
            return Ok(true);
        }
        let poll = self.store.fetch(poll_id).await?;
        Ok(poll.creator_id == requester)
    }
}

/// Short user-facing text for a store failure
pub fn describe(err: &PollError) -> &'static str {
    match err {
        PollError::NotFound(_) => "poll not found",
        PollError::InvalidOption { .. } => "invalid option number",
        PollError::AlreadyStopped(_) => "poll is already stopped",
        PollError::Closed(_) => "poll is closed",
        PollError::Conflict { .. } => "poll is busy, try again",
        PollError::Invalid(_) => "question and options must not be empty",
        PollError::Storage(_) => "storage is unavailable, try again later",
    }
}

/// Render results with one decimal place percentages
pub fn format_results(results: &PollResults) -> String {
    let mut reply = format!(
        "Poll results ID: {}\nQuestion: {}\n",
        results.poll_id, results.title
    );
    for option in &results.options {
        let _ = writeln!(
            reply,
            "{}: {} - {} votes ({:.1}%)",
            option.number, option.label, option.votes, option.percent
        );
    }
    if !results.active {
        reply.push_str("(closed)\n");
    }
    reply
}

/// Help text, optionally for one subcommand
pub fn help_text(topic: Option<&str>) -> &'static str {
    match topic {
        None => HELP_OVERVIEW,
        Some("create") => "/poll create \"Question\" \"Option1\" \"Option2\" ...\nCreates a new poll.",
        Some("vote") => "/poll vote [ID] [option_number]\nVotes for the chosen option.",
        Some("show") => "/poll show [ID]\nShows the poll results.",
        Some("stop") => "/poll stop [ID]\nStops the poll (creator only).",
        Some("delete") => "/poll delete [ID]\nDeletes the poll (creator only).",
        Some("help") => "/poll help [command]\nShows help for the commands.",
        Some(_) => "Command not found. Available commands: create, vote, show, stop, delete, help.",
    }
}
