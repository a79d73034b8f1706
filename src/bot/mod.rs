//! The chat bot: routes IRC traffic to commands, identity checks and
//! channel listings.
//!
//! [`Bot::handle_message`] never blocks. Anything that waits on Last.fm or
//! on a server reply runs in its own task, so replies that those tasks are
//! waiting for (WHOIS and WHO numerics) keep flowing through the same
//! event loop.

mod session;

pub use session::Session;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::Result;
use crate::cache::PersistHandle;
use crate::commands::{self, Command};
use crate::fanout::{DEFAULT_CAPACITY, FanOutAggregator, RateLimiter};
use crate::identity::{Directory, IdentityCheck};
use crate::irc::{IrcHandle, Message, is_channel};
use crate::lastfm::{ApiValue, LastFm, Period};
use crate::nickmap::{Association, NickMap};
use crate::nowplaying::{self, Report};
use crate::sync::JoinBarrier;

/// Where the bot's outgoing messages go.
pub trait Outbox: Send + Sync {
    fn send(&self, msg: Message) -> Result<()>;

    /// The nick the bot currently has on the server.
    fn nick(&self) -> String;
}

impl Outbox for IrcHandle {
    fn send(&self, msg: Message) -> Result<()> {
        IrcHandle::send(self, msg)
    }

    fn nick(&self) -> String {
        self.current_nick()
    }
}

/// NickServ identity queries over WHOIS.
struct WhoisDirectory(Arc<dyn Outbox>);

#[async_trait]
impl Directory for WhoisDirectory {
    async fn query_identity(&self, nick: &str) -> Result<()> {
        self.0.send(Message::whois(nick))
    }
}

/// Bot behaviour settings.
///
/// ```rust
/// # use huginn::bot::BotConfig;
/// let config = BotConfig::new("huginn")
///     .channels(vec!["#music".into()])
///     .prefix("!");
/// assert_eq!(config.wp_concurrency, 6);
/// ```
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// The nick the bot wants; it will try to retake it when taken.
    pub nick: String,
    /// Command prefix. Default: `.`.
    pub prefix: String,
    /// Channels joined after connecting.
    pub channels: Vec<String>,
    /// Password for NickServ `IDENTIFY` / `GHOST`.
    pub nickserv_password: Option<String>,
    /// Concurrent reports during `wp`. Default: 6.
    pub wp_concurrency: usize,
    /// Bound on waiting for a channel WHO listing. Default: 30s.
    pub who_timeout: Duration,
}

impl BotConfig {
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            prefix: ".".to_string(),
            channels: Vec::new(),
            nickserv_password: None,
            wp_concurrency: DEFAULT_CAPACITY,
            who_timeout: Duration::from_secs(30),
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn nickserv_password(mut self, password: Option<String>) -> Self {
        self.nickserv_password = password;
        self
    }

    pub fn wp_concurrency(mut self, n: usize) -> Self {
        self.wp_concurrency = n;
        self
    }

    pub fn who_timeout(mut self, timeout: Duration) -> Self {
        self.who_timeout = timeout;
        self
    }
}

/// A channel WHO listing being collected.
struct WhoListing {
    nicks: Mutex<Vec<String>>,
    done: JoinBarrier,
}

struct BotInner {
    config: BotConfig,
    outbox: Arc<dyn Outbox>,
    directory: WhoisDirectory,
    lastfm: LastFm,
    nicks: Arc<NickMap>,
    identity: Arc<IdentityCheck>,
    persister: Option<PersistHandle<ApiValue>>,
    wp_limiter: RateLimiter,
    /// Lowercased channel to its listing in progress.
    listings: Mutex<HashMap<String, Arc<WhoListing>>>,
}

/// The bot. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        outbox: Arc<dyn Outbox>,
        lastfm: LastFm,
        nicks: Arc<NickMap>,
        identity: Arc<IdentityCheck>,
    ) -> Self {
        let wp_limiter = RateLimiter::new(config.wp_concurrency);
        Self {
            inner: Arc::new(BotInner {
                config,
                directory: WhoisDirectory(Arc::clone(&outbox)),
                outbox,
                lastfm,
                nicks,
                identity,
                persister: None,
                wp_limiter,
                listings: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Nudge `persister` after commands that reached Last.fm.
    ///
    /// Must be called before the bot is cloned.
    pub fn with_persister(mut self, persister: PersistHandle<ApiValue>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.persister = Some(persister),
            None => warn!("bot already shared; persister not attached"),
        }
        self
    }

    pub fn config(&self) -> &BotConfig {
        &self.inner.config
    }

    pub fn identity(&self) -> &Arc<IdentityCheck> {
        &self.inner.identity
    }

    pub fn nicks(&self) -> &Arc<NickMap> {
        &self.inner.nicks
    }

    fn listings(&self) -> MutexGuard<'_, HashMap<String, Arc<WhoListing>>> {
        self.inner
            .listings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, msg: Message) {
        if let Err(e) = self.inner.outbox.send(msg) {
            warn!(error = %e, "dropping outgoing message");
        }
    }

    fn say(&self, target: &str, text: &str) {
        info!(target, reply = text, "reply");
        self.send(Message::privmsg(target, text));
    }

    fn notice(&self, target: &str, text: &str) {
        self.send(Message::notice(target, text));
    }

    fn is_own_nick(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.inner.outbox.nick())
    }

    fn join_channels(&self) {
        let channels = &self.inner.config.channels;
        if channels.is_empty() {
            return;
        }
        let list = channels.join(",");
        info!(channels = %list, "joining");
        self.send(Message::join(&list));
    }

    fn identify(&self) {
        if let Some(password) = &self.inner.config.nickserv_password {
            info!("identifying with NickServ");
            self.send(Message::privmsg("NickServ", &format!("IDENTIFY {password}")));
        }
    }

    // ========================================================================
    // Event dispatch
    // ========================================================================

    /// Route one message from the server.
    pub fn handle_message(&self, msg: Message) {
        match msg.command.as_str() {
            "PRIVMSG" => self.on_privmsg(&msg),
            "307" | "330" => {
                if let Some(nick) = msg.param(1) {
                    self.inner.identity.on_positive(nick);
                }
            }
            "318" => {
                if let Some(nick) = msg.param(1) {
                    self.inner.identity.on_end(nick);
                }
            }
            "352" => {
                if let (Some(channel), Some(nick)) = (msg.param(1), msg.param(5)) {
                    match self.listings().get(&channel.to_lowercase()) {
                        Some(listing) => listing
                            .nicks
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(nick.to_string()),
                        None => debug!(channel, nick, "WHO entry with no listing in progress"),
                    }
                }
            }
            "315" => {
                if let Some(channel) = msg.param(1) {
                    debug!(channel, "end of WHO listing");
                    if let Some(listing) = self.listings().get(&channel.to_lowercase()) {
                        listing.done.arrive();
                    }
                }
            }
            "QUIT" => {
                if let Some(nick) = msg.source_nick() {
                    self.inner.identity.forget(nick);
                    let wanted = &self.inner.config.nick;
                    if nick.eq_ignore_ascii_case(wanted) && !self.is_own_nick(wanted) {
                        info!(nick = %wanted, "nick now available, changing to it");
                        self.send(Message::nick(wanted));
                    }
                }
            }
            "NICK" => {
                if let (Some(old), Some(new)) = (msg.source_nick(), msg.param(0)) {
                    self.inner.identity.on_identity_changed(old, new);
                    if self.is_own_nick(new) && !old.eq_ignore_ascii_case(new) {
                        info!(nick = new, "nick changed");
                        self.identify();
                    }
                }
            }
            "INVITE" => {
                if let (Some(inviter), Some(target), Some(channel)) =
                    (msg.source_nick(), msg.param(0), msg.param(1))
                    && self.is_own_nick(target)
                {
                    info!(inviter, channel, "invited");
                    let (bot, inviter, channel) = (self.clone(), inviter.to_string(), channel.to_string());
                    tokio::spawn(async move { bot.on_invite(&inviter, &channel).await });
                }
            }
            "001" => self.on_welcome(),
            "433" => {
                let taken = msg.param(1).unwrap_or(self.inner.config.nick.as_str());
                let alternative = format!("{taken}_");
                info!(taken, trying = %alternative, "nick in use");
                self.send(Message::nick(&alternative));
            }
            "NOTICE" => {
                if msg
                    .source_nick()
                    .is_some_and(|n| n.eq_ignore_ascii_case("nickserv"))
                {
                    self.on_nickserv(msg.trailing().unwrap_or_default());
                }
            }
            "332" => {
                if let Some(channel) = msg.param(1) {
                    info!(channel, "joined");
                }
            }
            _ => {}
        }
    }

    fn on_privmsg(&self, msg: &Message) {
        let (Some(asker), Some(target), Some(text)) = (msg.source_nick(), msg.param(0), msg.param(1))
        else {
            return;
        };
        let reply_to = if is_channel(target) { target } else { asker };

        let Some(parsed) = commands::parse(&self.inner.config.prefix, asker, text) else {
            return;
        };
        match parsed {
            Err(usage) => self.say(reply_to, &usage.0),
            Ok(command) => {
                debug!(asker, target, ?command, "command");
                let (bot, reply_to, asker) = (self.clone(), reply_to.to_string(), asker.to_string());
                tokio::spawn(async move { bot.execute(&reply_to, &asker, command).await });
            }
        }
    }

    fn on_welcome(&self) {
        let wanted = &self.inner.config.nick;
        if let Some(password) = &self.inner.config.nickserv_password {
            if self.is_own_nick(wanted) {
                self.identify();
            } else {
                info!(nick = %wanted, "nick was not available; trying to retake it");
                self.send(Message::privmsg("NickServ", &format!("GHOST {wanted} {password}")));
            }
        }
        info!("connected");
        self.join_channels();
    }

    fn on_nickserv(&self, text: &str) {
        info!(text, "NickServ");
        let lower = text.to_lowercase();
        if lower.contains("ghost") {
            let wanted = &self.inner.config.nick;
            info!(nick = %wanted, "ghost successful, changing nick");
            self.send(Message::nick(wanted));
        } else if text.contains("identified") || text.contains("recognized") {
            info!("identified with NickServ");
            self.join_channels();
        }
    }

    async fn on_invite(&self, inviter: &str, channel: &str) {
        if self.is_identified(inviter).await {
            info!(channel, "accepting invite");
            self.send(Message::join(channel));
        } else {
            info!(inviter, channel, "ignoring invite from unidentified nick");
            self.notice(inviter, "you must be identified to invite");
        }
    }

    /// The connection was lost: forget identities and persist the cache.
    pub async fn on_disconnect(&self) {
        self.inner.identity.reset();
        let listings: Vec<_> = self.listings().drain().map(|(_, l)| l).collect();
        for listing in listings {
            listing.done.release();
        }
        if let Some(persister) = &self.inner.persister
            && let Err(e) = persister.save_now().await
        {
            warn!(error = %e, "failed to save cache after disconnect");
        }
    }

    /// Say goodbye to the server.
    pub fn quit(&self, reason: &str) -> Result<()> {
        self.inner.outbox.send(Message::quit(reason))
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn is_identified(&self, nick: &str) -> bool {
        self.inner
            .identity
            .check(&self.inner.directory, nick)
            .await
            .is_verified()
    }

    async fn require_identified(&self, reply_to: &str, asker: &str) -> bool {
        if self.is_identified(asker).await {
            return true;
        }
        info!(nick = asker, "nick is not identified");
        self.say(
            reply_to,
            &format!("{asker}: you must be identified with NickServ to use this command"),
        );
        false
    }

    fn report_ignored(&self, asker: &str, who: &str) {
        if asker == who {
            self.notice(asker, "You asked to be ignored by last.fm commands");
        } else {
            self.notice(asker, &format!("{who} asked to be ignored by last.fm commands"));
        }
    }

    /// Run `command` for `asker`, replying to `reply_to`.
    pub async fn execute(&self, reply_to: &str, asker: &str, command: Command) {
        let touches_remote = command.uses_remote();
        match command {
            Command::NowPlaying { who } => self.now_playing(reply_to, asker, &who).await,
            Command::WhatsPlaying => self.whats_playing(reply_to, asker).await,
            Command::Compare { left, right } => self.compare(reply_to, asker, &left, &right).await,
            Command::Top5 { period, who } => self.top5(reply_to, asker, period, &who).await,
            Command::SetUser { user } => self.set_user(reply_to, asker, &user).await,
            Command::Ignore => self.ignore(reply_to, asker).await,
            Command::DelUser => self.del_user(reply_to, asker).await,
            Command::Whois { nick } => self.whois(reply_to, asker, &nick),
            Command::Aka { user } => self.aka(reply_to, asker, &user),
            Command::Help => {
                let required = self.inner.identity.config().required;
                for line in commands::help_lines(&self.inner.config.prefix, required) {
                    self.notice(asker, &line);
                }
            }
        }
        if touches_remote && let Some(persister) = &self.inner.persister {
            persister.touch();
        }
    }

    async fn now_playing(&self, reply_to: &str, asker: &str, who: &str) {
        let Some(user) = self.inner.nicks.resolve(who) else {
            self.report_ignored(asker, who);
            return;
        };
        let report = nowplaying::report(&self.inner.lastfm, who, &user).await;
        self.say(reply_to, &report.to_string());
    }

    async fn compare(&self, reply_to: &str, asker: &str, left: &str, right: &str) {
        let nicks = &self.inner.nicks;
        let (user1, user2) = match (nicks.resolve(left), nicks.resolve(right)) {
            (Some(u1), Some(u2)) => (u1, u2),
            (None, _) => return self.report_ignored(asker, left),
            (_, None) => return self.report_ignored(asker, right),
        };
        info!(left, right, "comparing");
        let line = match self.inner.lastfm.compare_taste(&user1, &user2).await {
            Ok(taste) => format!(
                "[{left} vs {right}] {:.2}% -- {}",
                taste.score * 100.0,
                taste.artists.join(", ")
            ),
            Err(e) => format!("[{left} vs {right}] {e}"),
        };
        self.say(reply_to, &line);
    }

    async fn top5(&self, reply_to: &str, asker: &str, period: Period, who: &str) {
        let Some(user) = self.inner.nicks.resolve(who) else {
            self.report_ignored(asker, who);
            return;
        };
        info!(who, %period, "listing top 5 artists");
        let line = match self.inner.lastfm.user_top_artists(&user, period, 5).await {
            Ok(top) => {
                let names: Vec<&str> = top.artists.iter().map(|a| a.name.as_str()).collect();
                format!("[{who}] {period} top5: {}", names.join(", "))
            }
            Err(e) => format!("[{who}] {e}"),
        };
        self.say(reply_to, &line);
    }

    async fn set_user(&self, reply_to: &str, asker: &str, user: &str) {
        if !self.require_identified(reply_to, asker).await {
            return;
        }
        // smallest query that fails for unknown users
        if let Err(e) = self.inner.lastfm.user_top_artists(user, Period::Week, 1).await {
            let hint = if e.remote().is_some_and(|r| r.is_user_not_found()) {
                ", or user never scrobbled anything"
            } else {
                ""
            };
            self.say(reply_to, &format!("[{asker}] {e}{hint}"));
            return;
        }
        if let Err(e) = self.inner.nicks.set_user(asker, user) {
            warn!(error = %e, "failed to save nick map");
        }
        self.say(
            reply_to,
            &format!("[{asker}] is now associated with last.fm user {user}"),
        );
    }

    async fn ignore(&self, reply_to: &str, asker: &str) {
        if !self.require_identified(reply_to, asker).await {
            return;
        }
        if let Err(e) = self.inner.nicks.ignore(asker) {
            warn!(error = %e, "failed to save nick map");
        }
        self.say(
            reply_to,
            &format!(
                "[{asker}] is now ignored by last.fm commands; use {}deluser to be unignored",
                self.inner.config.prefix
            ),
        );
    }

    async fn del_user(&self, reply_to: &str, asker: &str) {
        if self.inner.nicks.lookup(asker) == Association::Unassociated {
            self.say(
                reply_to,
                &format!("{asker}: you're not associated with an username"),
            );
            return;
        }
        if !self.require_identified(reply_to, asker).await {
            return;
        }
        let removed = self.inner.nicks.remove(asker).unwrap_or_else(|e| {
            warn!(error = %e, "failed to save nick map");
            None
        });
        let line = match removed {
            Some(Association::User(user)) => {
                format!("[{asker}] is no longer associated with last.fm user {user}")
            }
            Some(_) => format!("[{asker}] is no longer ignored by last.fm commands"),
            None => format!("{asker}: you're not associated with an username"),
        };
        self.say(reply_to, &line);
    }

    fn whois(&self, reply_to: &str, asker: &str, nick: &str) {
        let own = asker == nick;
        let line = match self.inner.nicks.lookup(nick) {
            Association::User(user) => {
                let whose = if own {
                    "your".to_string()
                } else {
                    format!("{nick}'s")
                };
                format!("{asker}: {whose} last.fm username is {user} (http://last.fm/user/{user})")
            }
            Association::Ignored if own => {
                format!("{asker}: you asked to be ignored by last.fm commands")
            }
            Association::Ignored => {
                format!("{asker}: {nick} has asked to be ignored by last.fm commands")
            }
            Association::Unassociated if own => format!("{asker}: you didn't associate an username"),
            Association::Unassociated => format!("{asker}: {nick} didn't associate an username"),
        };
        self.say(reply_to, &line);
    }

    fn aka(&self, reply_to: &str, asker: &str, user: &str) {
        let nicks = self.inner.nicks.nicks_for(user);
        let line = match nicks.len() {
            0 => format!("{asker}: {user} has no associated IRC nick"),
            1 => format!("{asker}: {user}'s known IRC nick is {}", nicks[0]),
            _ => format!("{asker}: {user}'s known IRC nicks are {}", nicks.join(", ")),
        };
        self.say(reply_to, &line);
    }

    // ========================================================================
    // What's playing
    // ========================================================================

    async fn whats_playing(&self, channel: &str, asker: &str) {
        if !is_channel(channel) {
            info!(asker, "what's playing requested in private");
            self.say(channel, &format!("{asker}: this only works on channels"));
            return;
        }
        info!(asker, channel, "what's playing requested");
        if !self.require_identified(channel, asker).await {
            return;
        }

        let Some(members) = self.list_channel(channel).await else {
            return;
        };
        let members: Vec<String> = members
            .into_iter()
            .filter(|nick| !self.is_own_nick(nick))
            .collect();
        let total = members.len();

        let started = format!("Reporting now playing for {total} nicks in channel {channel}");
        info!("{started}");
        self.notice(asker, &started);

        let mut fanout = FanOutAggregator::new();
        for nick in members {
            let (bot, channel) = (self.clone(), channel.to_string());
            let limiter = self.inner.wp_limiter.clone();
            fanout = fanout.branch(async move {
                limiter
                    .run(async { Ok(bot.report_if_playing(&channel, &nick).await) })
                    .await
            });
        }
        let reported = fanout
            .join()
            .await
            .into_iter()
            .filter(|outcome| matches!(outcome, Ok(true)))
            .count();

        let finished = format!("Reported for {reported} of {total} nicks");
        info!("{finished}");
        self.notice(asker, &finished);
    }

    /// Report `nick` to `channel` only when something is playing.
    async fn report_if_playing(&self, channel: &str, nick: &str) -> bool {
        let Some(user) = self.inner.nicks.resolve(nick) else {
            return false;
        };
        match nowplaying::report(&self.inner.lastfm, nick, &user).await {
            report @ Report::NowPlaying { .. } => {
                self.say(channel, &report.to_string());
                true
            }
            other => {
                debug!(nick, report = %other, "not reporting");
                false
            }
        }
    }

    /// Collect the channel's members with WHO. `None` when a listing for
    /// the channel is already running or the request could not be sent.
    async fn list_channel(&self, channel: &str) -> Option<Vec<String>> {
        let key = channel.to_lowercase();
        let listing = {
            let mut listings = self.listings();
            if listings.contains_key(&key) {
                info!(channel, "channel is already executing a what's playing request");
                return None;
            }
            let listing = Arc::new(WhoListing {
                nicks: Mutex::new(Vec::new()),
                done: JoinBarrier::new(1),
            });
            listings.insert(key.clone(), Arc::clone(&listing));
            listing
        };

        let (sent, completed) = match self.inner.outbox.send(Message::who(channel)) {
            Ok(()) => (true, listing.done.wait_timeout(self.inner.config.who_timeout).await),
            Err(e) => {
                warn!(channel, error = %e, "failed to request WHO listing");
                (false, false)
            }
        };

        {
            let mut listings = self.listings();
            if listings
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &listing))
            {
                listings.remove(&key);
            }
        }

        if !sent {
            return None;
        }
        if !completed {
            warn!(channel, "WHO listing did not complete; using partial listing");
        }
        let nicks = std::mem::take(&mut *listing.nicks.lock().unwrap_or_else(PoisonError::into_inner));
        Some(nicks)
    }
}
