//! The bot's event loop for one server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::Bot;
use crate::irc::IrcEvent;
use crate::reconnect::{Connector, ReconnectSupervisor};

/// How long to wait for the server to close the link after `QUIT`.
const QUIT_GRACE: Duration = Duration::from_secs(5);

/// Connects, feeds server traffic to the [`Bot`] and reconnects after
/// unexpected disconnects, until shut down.
pub struct Session {
    bot: Bot,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedReceiver<IrcEvent>,
    supervisor: Arc<ReconnectSupervisor>,
}

impl Session {
    pub fn new(
        bot: Bot,
        connector: Arc<dyn Connector>,
        events: mpsc::UnboundedReceiver<IrcEvent>,
        supervisor: Arc<ReconnectSupervisor>,
    ) -> Self {
        Self {
            bot,
            connector,
            events,
            supervisor,
        }
    }

    fn schedule_reconnect(&self) {
        if self
            .supervisor
            .on_disconnect(Arc::clone(&self.connector))
            .is_none()
        {
            info!("reconnect already in progress");
        }
    }

    /// Run until `shutdown` resolves or the event source goes away.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.connector.connect().await {
            warn!(error = %e, "initial connection failed");
            self.schedule_reconnect();
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = self.events.recv() => match event {
                    Some(IrcEvent::Message(msg)) => self.bot.handle_message(msg),
                    Some(IrcEvent::Disconnected { reason }) => {
                        warn!(%reason, "disconnected");
                        self.bot.on_disconnect().await;
                        if self.supervisor.is_shut_down() {
                            return;
                        }
                        self.schedule_reconnect();
                    }
                    None => {
                        info!("event source closed");
                        self.supervisor.shutdown();
                        return;
                    }
                },
            }
        }

        info!("shutting down");
        self.supervisor.shutdown();
        if let Err(e) = self.bot.quit("Exiting") {
            info!(error = %e, "not connected; skipping QUIT");
            return;
        }

        // Let the server close the link so the QUIT is delivered.
        let drained = tokio::time::timeout(QUIT_GRACE, async {
            while let Some(event) = self.events.recv().await {
                if matches!(event, IrcEvent::Disconnected { .. }) {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("server did not close the connection after QUIT");
        }
    }
}
