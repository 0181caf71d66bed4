//! Command Parser
//!
//! Splits a chat message into tokens. Double quotes group words into one
//! argument; there are no escape sequences. An unterminated quote still
//! emits everything after it as a single argument so no input is lost.

/// Prefix every poll command starts with
pub const COMMAND_PREFIX: &str = "/poll";

/// Poll subcommands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subcommand {
    Create,
    Vote,
    Show,
    Stop,
    Delete,
    Help,
    /// No subcommand after the prefix
    Missing,
    Unknown(String),
}

impl Subcommand {
    pub fn from_token(token: &str) -> Self {
        match token {
            "create" => Self::Create,
            "vote" => Self::Vote,
            "show" => Self::Show,
            "stop" => Self::Stop,
            "delete" => Self::Delete,
            "help" => Self::Help,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Vote => "vote",
            Self::Show => "show",
            Self::Stop => "stop",
            Self::Delete => "delete",
            Self::Help => "help",
            Self::Missing => "",
            Self::Unknown(token) => token,
        }
    }
}

/// A parsed `/poll` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub subcommand: Subcommand,
    pub args: Vec<String>,
}

impl Invocation {
    /// Parse a chat message. Returns `None` when the message is not a poll
    /// command at all.
    pub fn parse(message: &str) -> Option<Self> {
        let mut tokens = tokenize(message).into_iter();

        if tokens.next()? != COMMAND_PREFIX {
            return None;
        }

        let subcommand = tokens
            .next()
            .map(|t| Subcommand::from_token(&t))
            .unwrap_or(Subcommand::Missing);

        Some(Self {
            subcommand,
            args: tokens.collect(),
        })
    }
}

/// Arguments of a command line, without its leading verb token
pub fn parse_arguments(raw: &str) -> Vec<String> {
    tokenize(raw).into_iter().skip(1).collect()
}

/// Split into whitespace-delimited tokens, honoring double quotes
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c == '"' {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }

            let mut quoted = String::new();
            let mut closed = false;
            for q in chars.by_ref() {
                if q == '"' {
                    closed = true;
                    break;
                }
                quoted.push(q);
            }

            if closed {
                tokens.push(quoted);
            } else {
                let rest = quoted.trim();
                if !rest.is_empty() {
                    tokens.push(rest.to_string());
                }
            }
        } else if c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
