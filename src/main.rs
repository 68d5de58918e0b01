//! Duel Client
//!
//! Headless client: connects, authenticates, optionally queues for a match,
//! and logs session events until the connection is lost or Ctrl-C.

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use duel_client::{
    account::{AccountApi, BalanceCache, HttpAccountApi},
    network::WsConnector,
    ClientConfig, ConnectionState, GameClient, PersistedId, SessionEvent, SystemClock, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Duel Client v{}", VERSION);

    let config = ClientConfig::from_env().context("invalid configuration")?;
    let token = std::env::var("DUEL_TOKEN").context("DUEL_TOKEN must be set")?;
    let mut wager = match std::env::var("DUEL_WAGER") {
        Ok(raw) => Some(raw.parse::<u64>().context("DUEL_WAGER must be a whole number")?),
        Err(_) => None,
    };
    let mut resume = std::env::var("DUEL_RESUME").ok().map(PersistedId::new);
    let mut display_name = std::env::var("DUEL_NAME").unwrap_or_else(|_| "Player".to_string());

    info!("Server: {}", config.server_url);

    let cache = config.balance_cache_path.as_ref().map(BalanceCache::new);
    if let Some(cached) = cache.as_ref().and_then(BalanceCache::load) {
        info!(balance = cached.balance, updated_at = %cached.updated_at, "Last known balance");
    }

    let connector = WsConnector::new(config.server_url.clone());
    let mut client = GameClient::new(connector, SystemClock, &config);

    if let Some(url) = &config.account_api_url {
        let api = HttpAccountApi::new(url, token.clone()).context("invalid account API URL")?;
        match client.refresh_balance(&api, cache.as_ref()).await {
            Ok(balance) => info!(balance, "Balance"),
            Err(e) => warn!("Balance unavailable: {}", e),
        }
        match api.display_name().await {
            Ok(name) => display_name = name,
            Err(e) => warn!("Profile unavailable: {}", e),
        }
    }

    client.connect(token).await;

    loop {
        tokio::select! {
            event = client.next_event() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::ConnectionChanged { state: ConnectionState::Connected, .. } => {
                        info!("Connected");
                        if let Some(game_id) = resume.take() {
                            if let Err(e) = client.resume(game_id) {
                                warn!("Resume failed: {}", e);
                            }
                        } else if let Some(wager) = wager.take() {
                            if let Err(e) = client.find_match(wager, &display_name) {
                                warn!("Find match failed: {}", e);
                            }
                        }
                    }
                    SessionEvent::ConnectionLost { attempts, reason } => {
                        error!(attempts, "Connection lost: {}", reason);
                        break;
                    }
                    SessionEvent::Clock(clock) => debug!(?clock, "Clock"),
                    SessionEvent::GameEnded(result) => {
                        info!(outcome = ?result.outcome, reason = %result.reason, "Game over");
                        client.acknowledge_result();
                    }
                    event => info!(?event, "Session event"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
