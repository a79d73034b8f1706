//! Client connection to one IRC server.
//!
//! An [`IrcConnector`] owns the address and registration details and can be
//! handed to the [`ReconnectSupervisor`](crate::ReconnectSupervisor) as a
//! [`Connector`]. Each successful `connect` spawns a reader and a writer
//! task for that socket and attaches a fresh outbox to the shared
//! [`IrcHandle`]. When the socket ends the reader detaches the outbox and
//! emits [`IrcEvent::Disconnected`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::codec::IrcCodec;
use super::message::Message;
use crate::reconnect::Connector;
use crate::{HuginnError, Result};

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcEvent {
    Message(Message),
    Disconnected { reason: String },
}

/// Server address and registration details.
///
/// ```rust
/// # use huginn::irc::IrcConfig;
/// let config = IrcConfig::new("irc.rizon.net:6667", "huginn").realname("now playing bot");
/// assert_eq!(config.username, "huginn");
/// ```
#[derive(Debug, Clone)]
pub struct IrcConfig {
    /// `host:port`.
    pub server: String,
    pub nick: String,
    pub username: String,
    pub realname: String,
    /// Server password (`PASS`), if any.
    pub password: Option<String>,
    pub connect_timeout: Duration,
}

impl IrcConfig {
    pub fn new(server: impl Into<String>, nick: impl Into<String>) -> Self {
        let nick = nick.into();
        Self {
            server: server.into(),
            username: nick.clone(),
            realname: nick.clone(),
            nick,
            password: None,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn realname(mut self, realname: impl Into<String>) -> Self {
        self.realname = realname.into();
        self
    }

    pub fn password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct HandleState {
    outbox: Option<mpsc::UnboundedSender<Message>>,
    nick: String,
    /// Bumped on every attach so a stale reader cannot detach a newer
    /// connection.
    generation: u64,
}

/// Cloneable sender that outlives individual connections.
#[derive(Debug, Clone)]
pub struct IrcHandle {
    state: Arc<Mutex<HandleState>>,
}

impl IrcHandle {
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HandleState {
                outbox: None,
                nick: nick.into(),
                generation: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a message on the current connection.
    ///
    /// Fails with [`HuginnError::Transport`] while disconnected; nothing is
    /// buffered for a later connection.
    pub fn send(&self, msg: Message) -> Result<()> {
        let state = self.lock();
        let outbox = state
            .outbox
            .as_ref()
            .ok_or_else(|| HuginnError::Transport("not connected".into()))?;
        outbox
            .send(msg)
            .map_err(|_| HuginnError::Transport("connection closed".into()))
    }

    /// The nick the server currently knows us by.
    pub fn current_nick(&self) -> String {
        self.lock().nick.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().outbox.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Drop the outbox so the writer flushes and closes the socket.
    pub fn disconnect(&self) {
        self.lock().outbox = None;
    }

    fn set_nick(&self, nick: &str) {
        self.lock().nick = nick.to_string();
    }

    fn attach(&self, outbox: mpsc::UnboundedSender<Message>) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.outbox = Some(outbox);
        state.generation
    }

    fn detach(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.outbox = None;
        }
    }
}

/// Establishes connections and feeds their traffic into one event channel.
pub struct IrcConnector {
    config: IrcConfig,
    handle: IrcHandle,
    events: mpsc::UnboundedSender<IrcEvent>,
}

impl IrcConnector {
    /// Returns the connector and the receiving end of its event channel.
    pub fn new(config: IrcConfig) -> (Self, IrcHandle, mpsc::UnboundedReceiver<IrcEvent>) {
        let handle = IrcHandle::new(config.nick.clone());
        let (events, rx) = mpsc::unbounded_channel();
        let connector = Self {
            config,
            handle: handle.clone(),
            events,
        };
        (connector, handle, rx)
    }

    pub fn handle(&self) -> &IrcHandle {
        &self.handle
    }

    pub fn config(&self) -> &IrcConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for IrcConnector {
    async fn connect(&self) -> Result<()> {
        let config = &self.config;
        info!(server = %config.server, nick = %config.nick, "connecting");

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.server))
            .await
            .map_err(|_| HuginnError::Timeout(config.connect_timeout))?
            .map_err(|e| HuginnError::Transport(format!("{}: {e}", config.server)))?;
        stream.set_nodelay(true)?;

        let (mut sink, mut lines) = Framed::new(stream, IrcCodec).split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        if let Some(password) = &config.password {
            tx.send(Message::pass(password))
                .map_err(|_| HuginnError::Transport("outbox closed".into()))?;
        }
        for msg in [
            Message::nick(&config.nick),
            Message::user(&config.username, &config.realname),
        ] {
            tx.send(msg)
                .map_err(|_| HuginnError::Transport("outbox closed".into()))?;
        }

        self.handle.set_nick(&config.nick);
        let generation = self.handle.attach(tx);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                debug!(line = %redacted(&msg), "->");
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "write failed");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        let handle = self.handle.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let reason = loop {
                let msg = match lines.next().await {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => break e.to_string(),
                    None => break "connection closed by server".to_string(),
                };
                debug!(line = %msg, "<-");

                match msg.command.as_str() {
                    "PING" => {
                        let _ = handle.send(Message::pong(msg.trailing().unwrap_or_default()));
                        continue;
                    }
                    "001" => {
                        if let Some(nick) = msg.param(0) {
                            handle.set_nick(nick);
                        }
                    }
                    "NICK" => {
                        let ours = handle.current_nick();
                        if let (Some(old), Some(new)) = (msg.source_nick(), msg.param(0))
                            && old.eq_ignore_ascii_case(&ours)
                        {
                            handle.set_nick(new);
                        }
                    }
                    "ERROR" => {
                        warn!(reason = msg.trailing().unwrap_or_default(), "server error");
                    }
                    _ => {}
                }

                if events.send(IrcEvent::Message(msg)).is_err() {
                    break "event receiver dropped".to_string();
                }
            };

            handle.detach(generation);
            info!(%reason, "disconnected");
            let _ = events.send(IrcEvent::Disconnected { reason });
        });

        Ok(())
    }
}

/// Outgoing line for logs, without credentials.
fn redacted(msg: &Message) -> String {
    let secret = msg.command == "PASS"
        || (msg.command == "PRIVMSG" && msg.param(0).is_some_and(|t| t.eq_ignore_ascii_case("nickserv")));
    if secret {
        format!("{} <redacted>", msg.command)
    } else {
        msg.to_wire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_refuses_while_detached() {
        let handle = IrcHandle::new("huginn");
        assert!(!handle.is_connected());
        assert!(matches!(
            handle.send(Message::nick("x")),
            Err(HuginnError::Transport(_))
        ));
    }

    #[test]
    fn stale_generation_does_not_detach() {
        let handle = IrcHandle::new("huginn");
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let first = handle.attach(tx1);
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        handle.attach(tx2);

        handle.detach(first);
        handle.send(Message::nick("huginn_")).unwrap();
        assert_eq!(rx2.try_recv().unwrap(), Message::nick("huginn_"));
    }

    #[test]
    fn credentials_stay_out_of_logs() {
        assert_eq!(redacted(&Message::pass("hunter2")), "PASS <redacted>");
        assert_eq!(
            redacted(&Message::privmsg("NickServ", "IDENTIFY hunter2")),
            "PRIVMSG <redacted>"
        );
        assert_eq!(redacted(&Message::join("#music")), "JOIN #music");
    }

    #[test]
    fn config_defaults_to_nick() {
        let config = IrcConfig::new("localhost:6667", "huginn").username("hug");
        assert_eq!(config.username, "hug");
        assert_eq!(config.realname, "huginn");
        assert!(config.password.is_none());
    }
}
