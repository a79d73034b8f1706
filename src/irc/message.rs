//! IRC client messages (RFC 2812).
//!
//! ```text
//! [':' prefix SPACE] command [SPACE params] [SPACE ':' trailing]
//! ```
//!
//! Parsing works on a single line without the CR-LF terminator. When
//! serializing, the last parameter is only written in trailing form when it
//! has to be (empty, contains a space, or starts with `:`).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Source: a server name or `nick!user@host`.
    pub prefix: Option<String>,
    /// Command or three-digit numeric reply.
    pub command: String,
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("line has a prefix but no command")]
    MissingCommand,
}

impl Message {
    pub fn new<I, S>(command: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = match line.strip_prefix(':') {
            Some(tagged) => match tagged.split_once(' ') {
                Some((prefix, rest)) => (Some(prefix.to_string()), rest.trim_start_matches(' ')),
                None => return Err(ParseError::MissingCommand),
            },
            None => (None, line),
        };

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            let (param, tail) = rest.split_once(' ').unwrap_or((rest, ""));
            params.push(param.to_string());
            rest = tail;
        }

        Ok(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Wire form without the CR-LF terminator.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(prefix) = &self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(&self.command);

        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                out.push(' ');
                out.push_str(param);
            }
            out.push(' ');
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                out.push(':');
            }
            out.push_str(last);
        }
        out
    }

    /// Nick part of the prefix, if the source is a user.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split(['!', '@']).next().unwrap_or(prefix);
        (!nick.is_empty()).then_some(nick)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// The last parameter (usually the free-text part).
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    // ========================================================================
    // Constructors for the commands the bot sends
    // ========================================================================

    pub fn pass(password: &str) -> Self {
        Self::new("PASS", [password])
    }

    pub fn nick(nick: &str) -> Self {
        Self::new("NICK", [nick])
    }

    pub fn user(username: &str, realname: &str) -> Self {
        Self::new("USER", [username, "0", "*", realname])
    }

    pub fn join(channels: &str) -> Self {
        Self::new("JOIN", [channels])
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", [target, text])
    }

    pub fn notice(target: &str, text: &str) -> Self {
        Self::new("NOTICE", [target, text])
    }

    pub fn whois(nick: &str) -> Self {
        Self::new("WHOIS", [nick])
    }

    pub fn who(channel: &str) -> Self {
        Self::new("WHO", [channel])
    }

    pub fn pong(token: &str) -> Self {
        Self::new("PONG", [token])
    }

    pub fn quit(reason: &str) -> Self {
        Self::new("QUIT", [reason])
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Whether `target` names a channel rather than a nick.
pub fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}
