//! Chat command parsing.
//!
//! A line is a command when its first word is the prefix followed by a
//! known name. Missing optional arguments default to the asker's nick.

use crate::lastfm::Period;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `np [who]`
    NowPlaying { who: String },
    /// `wp`: now playing for everyone in the channel.
    WhatsPlaying,
    /// `compare [left] right`
    Compare { left: String, right: String },
    /// `top5 [period [who]]`
    Top5 { period: Period, who: String },
    /// `setuser name`
    SetUser { user: String },
    Ignore,
    DelUser,
    /// `whois [nick]`
    Whois { nick: String },
    /// `aka name`
    Aka { user: String },
    Help,
}

impl Command {
    /// Whether running the command queries Last.fm.
    pub fn uses_remote(&self) -> bool {
        matches!(
            self,
            Command::NowPlaying { .. }
                | Command::WhatsPlaying
                | Command::Compare { .. }
                | Command::Top5 { .. }
                | Command::SetUser { .. }
        )
    }
}

/// Malformed command; the message is the reply to send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Parse `text` sent by `asker`.
///
/// Returns `None` when the line is not a command at all.
pub fn parse(prefix: &str, asker: &str, text: &str) -> Option<Result<Command, UsageError>> {
    let mut words = text.split_whitespace();
    let name = words.next()?.strip_prefix(prefix)?;
    let args: Vec<&str> = words.collect();
    let arg = |i: usize| args.get(i).map(|s| s.to_string());

    let command = match name {
        "np" => Command::NowPlaying {
            who: arg(0).unwrap_or_else(|| asker.to_string()),
        },
        "wp" => Command::WhatsPlaying,
        "compare" => match (arg(0), arg(1)) {
            (Some(left), Some(right)) => Command::Compare { left, right },
            (Some(right), None) => Command::Compare {
                left: asker.to_string(),
                right,
            },
            _ => return Some(Err(UsageError(format!("{asker}: tell me who to compare to!")))),
        },
        "top5" => {
            let period = match args.first().copied() {
                None | Some("overall") => Period::Overall,
                Some("year") => Period::Year,
                Some("month") => Period::Month,
                Some("week") => Period::Week,
                Some(_) => {
                    return Some(Err(UsageError(format!(
                        "{asker}: usage: {prefix}top5 ((overall|year|month|week) ($nick)?)?"
                    ))));
                }
            };
            Command::Top5 {
                period,
                who: arg(1).unwrap_or_else(|| asker.to_string()),
            }
        }
        "setuser" => match arg(0) {
            Some(user) => Command::SetUser { user },
            None => {
                return Some(Err(UsageError(format!(
                    "{asker}: tell the username to associate with"
                ))));
            }
        },
        "ignore" => Command::Ignore,
        "deluser" => Command::DelUser,
        "whois" => Command::Whois {
            nick: arg(0).unwrap_or_else(|| asker.to_string()),
        },
        "aka" => match arg(0) {
            Some(user) => Command::Aka { user },
            None => {
                return Some(Err(UsageError(format!(
                    "{asker}: tell the username to know about"
                ))));
            }
        },
        "help" => Command::Help,
        _ => return None,
    };
    Some(Ok(command))
}

/// Help text, one notice per line. `wp` is deliberately left out.
pub fn help_lines(prefix: &str, identity_required: bool) -> Vec<String> {
    let p = prefix;
    let mut lines = vec![
        "Last.fm commands:".to_string(),
        format!("{p}np ($user)?: Shows your now playing song. If you give $user, queries for that $user."),
        format!("{p}compare ($user1) ($user2)?: Runs a tasteometer compare between you and $user1, or between $user1 and $user2 if present."),
        format!("{p}top5 ((overall|year|month|week) ($user)?)?: Shows the top5 artists in the chosen period for you or the $user."),
        format!("{p}whois ($nick)?: Shows your associated last.fm username, or the username associated with $nick."),
        format!("{p}aka ($username): Shows the nicks that have been associated with $username."),
        "A nick can be used in place of a username if it's associated with a last.fm account.".to_string(),
    ];
    if identity_required {
        lines.push("Commands that require that you be authenticated with NickServ:".to_string());
    }
    lines.extend([
        format!("{p}ignore: Makes the bot ignore you for most commands. Use {p}setuser or {p}deluser to be unignored."),
        format!("{p}setuser ($username): Associates your nick with the given last.fm $username."),
        format!("{p}deluser: Removes your nick's association, if any."),
    ]);
    lines
}
