//! huginn: Last.fm now-playing IRC bot.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use huginn::bot::{Bot, Session};
use huginn::cache::{CachePersister, persist};
use huginn::config::{Config, Secrets};
use huginn::irc::IrcConnector;
use huginn::lastfm::{ApiValue, LastFm, LastFmClient};
use huginn::nickmap::NickMap;
use huginn::{HuginnError, IdentityCheck, RateLimiter, ReconnectSupervisor, ResponseCache};

/// Huginn reports what people are listening to on Last.fm.
#[derive(Parser)]
#[command(name = "huginn")]
#[command(version = huginn::PKG_VERSION)]
#[command(about = "Last.fm now-playing IRC bot")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("huginn=info")),
        )
        .init();

    let config = Config::load(args.config.as_deref())?;
    let secrets = Secrets::load()?;
    let api_key = secrets.api_key().ok_or_else(|| {
        HuginnError::Configuration(
            "Missing Last.fm API key: set [lastfm] api_key in secrets.toml or LASTFM_API_KEY"
                .to_string(),
        )
    })?;

    info!(version = huginn::PKG_VERSION, server = %config.server_address(), "huginn starting");

    // Response cache, restored from disk when configured
    let cache: Arc<ResponseCache<ApiValue>> = Arc::new(ResponseCache::new());
    let persister = match config.persist_config() {
        Some(persist_config) => {
            match persist::load_snapshot(&*cache, &persist_config.path) {
                Ok(entries) => info!(entries, path = %persist_config.path.display(), "loaded cache"),
                Err(e) => warn!(path = %persist_config.path.display(), error = %e, "cache not restored"),
            }
            Some(CachePersister::spawn(Arc::clone(&cache), persist_config))
        }
        None => None,
    };
    cache.spawn_sweeper(Duration::from_secs(config.cache.sweep_interval_secs));

    let client = LastFmClient::with_timeout(
        api_key,
        Duration::from_secs(config.lastfm.request_timeout_secs),
    )?
    .with_base_url(config.lastfm.base_url.clone());
    let lastfm = LastFm::new(Arc::new(client))
        .with_cache(Arc::clone(&cache))
        .with_limiter(RateLimiter::new(config.limits.enrichment_concurrency));

    let nicks = Arc::new(match config.nick_file() {
        Some(path) => NickMap::open(path)?,
        None => NickMap::new(),
    });
    // kept alive for the life of the session
    let _nick_watcher = match nicks.path() {
        Some(_) => match nicks.watch(Duration::from_secs(1)) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "not watching nick map for changes");
                None
            }
        },
        None => None,
    };
    let identity = Arc::new(IdentityCheck::new(config.identity_config()));

    let (connector, handle, events) = IrcConnector::new(config.irc_config(&secrets));
    let mut bot = Bot::new(
        config.bot_config(&secrets),
        Arc::new(handle.clone()),
        lastfm,
        nicks,
        identity,
    );
    if let Some(persister) = &persister {
        bot = bot.with_persister(persister.clone());
    }

    let supervisor = Arc::new(ReconnectSupervisor::new(config.reconnect_config()));
    Session::new(bot, Arc::new(connector), events, supervisor)
        .run(shutdown_signal())
        .await;
    handle.disconnect();

    if let Some(persister) = persister {
        match persister.shutdown().await {
            Ok(entries) => info!(entries, "final cache save"),
            Err(e) => warn!(error = %e, "final cache save failed"),
        }
    }
    info!("bye");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupted"),
        _ = terminate => info!("terminated"),
    }
}
