//! Contested realtime client - command line demo.
//!
//! Signs in with a token from the environment, subscribes to the channels given
//! as arguments and prints every inbound message. Ctrl-C signs out, which
//! unsubscribes and disconnects before exiting.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use contested_client::{
    logging, AuthContext, AuthSession, ListenerFilter, ProviderConfig, RealtimeClient,
    RealtimeConfig, RealtimeProvider, SupabaseRefresher,
};
use tokio::sync::watch;

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

fn session_from_env() -> Result<AuthSession> {
    let expires_in: i64 = std::env::var("CONTESTED_TOKEN_EXPIRES_IN_SECS")
        .ok()
        .map(|raw| raw.parse())
        .transpose()
        .context("CONTESTED_TOKEN_EXPIRES_IN_SECS must be an integer")?
        .unwrap_or(3600);

    Ok(AuthSession {
        user_id: required("CONTESTED_USER_ID")?,
        access_token: required("CONTESTED_ACCESS_TOKEN")?,
        refresh_token: std::env::var("CONTESTED_REFRESH_TOKEN").ok(),
        expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("contested_client=info");

    let realtime = RealtimeConfig::from_env()?;
    let provider_config = ProviderConfig::from_env()?;
    let session = session_from_env()?;

    let auth = match SupabaseRefresher::from_env() {
        Some(refresher) => AuthContext::new(std::sync::Arc::new(refresher)),
        None => {
            tracing::info!("SUPABASE_URL not set; sessions will not be refreshed");
            AuthContext::without_refresh()
        }
    };

    tracing::info!(url = %realtime.url, "starting realtime client");
    let client = RealtimeClient::new(realtime);
    client.on_message(ListenerFilter::All, |message| {
        match serde_json::to_string(message) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "unprintable message"),
        }
    });
    for channel in std::env::args().skip(1) {
        client.subscribe(&channel);
    }

    let provider = RealtimeProvider::new(client.clone(), auth.clone(), provider_config);
    let task = provider.spawn();
    auth.login(session);

    let mut states = client.watch();
    let mut shown = states.borrow().status_label();
    tracing::info!(status = shown, "connection status");
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let label = states.borrow_and_update().status_label();
                if label != shown {
                    shown = label;
                    tracing::info!(status = shown, "connection status");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    auth.logout();
    // The provider unsubscribes and disconnects once the session is gone.
    let _ = wait_closed(&mut states, Duration::from_secs(2)).await;
    task.abort();
    Ok(())
}

async fn wait_closed(
    states: &mut watch::Receiver<contested_client::ConnectionSnapshot>,
    limit: Duration,
) -> Result<()> {
    tokio::time::timeout(
        limit,
        contested_client::ws::wait_for_state(states, contested_client::ConnectionState::Closed),
    )
    .await
    .context("timed out waiting for disconnect")?;
    Ok(())
}
