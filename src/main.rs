// ABOUTME: Main entry point for the nuqql-mattermostd daemon
// ABOUTME: Loads config, sets up logging, starts account sessions and serves frontends until quit

use anyhow::{Context, Result};
use clap::Parser;
use mattermostd::cli::Args;
use mattermostd::mattermost::MattermostConnector;
use mattermostd::{logging, server};
use mattermostd_core::{
    AccountRegistry, AccountStore, Config, Dispatcher, FrontendOptions, Mailbox, MailboxOptions,
    SessionSettings, SessionSpawner, Shutdown,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let dir = Config::resolve_dir(args.dir.clone());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create working directory {}", dir.display()))?;
    let mut config = Config::load(&dir)?;
    args.apply(&mut config);

    let _log_guard = logging::init(&config)?;
    tracing::info!(
        dir = %config.dir.display(),
        listen = %config.listen_address(),
        history = config.history_enabled(),
        push_accounts = config.push_accounts,
        "Starting nuqql-mattermostd"
    );

    let shutdown = Shutdown::new();
    let mailbox = Mailbox::spawn(MailboxOptions::from_config(&config));
    let connector = Arc::new(MattermostConnector::from_config(&config)?);
    let spawner = SessionSpawner::new(
        connector,
        mailbox.clone(),
        SessionSettings::from_config(&config),
        config.dir.clone(),
        shutdown.clone(),
    );

    let mut registry = AccountRegistry::new(AccountStore::new(&config.dir), spawner);
    registry.load();
    registry.start_all();

    // bind after sessions are running so missed history is queued early
    let listener = server::Listener::bind(&config).await?;

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            ctrl_c.request();
        }
    });

    let dispatcher = Dispatcher::new(mailbox, FrontendOptions::new(config.push_accounts));
    let served = server::run(&listener, &mut registry, &dispatcher, &shutdown).await;
    drop(listener);

    registry.stop_all().await;
    tracing::info!("All sessions stopped");

    served?;
    if let Some(err) = shutdown.take_fatal() {
        return Err(err);
    }
    Ok(())
}
