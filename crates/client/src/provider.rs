//! Ties the auth session to the realtime connection.
//!
//! While a user is signed in the provider keeps their user channel subscribed,
//! keeps the connection up, and authenticates each new connection once with a
//! fresh token. Signing out unsubscribes the user channel and disconnects.
//! Failed or timed-out authentication is not retried automatically; callers
//! retry with [`RealtimeProvider::authenticate_now`].

use tokio::task::JoinHandle;

use crate::auth_session::{AuthContext, AuthSession};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::ws::{ConnectionSnapshot, ConnectionState, Connector, RealtimeClient, WsConnector};

/// What the provider has already done for the current session.
#[derive(Debug, Default)]
struct Bridge {
    user_id: Option<String>,
    /// Connection generation that already received an automatic auth attempt.
    authenticated_generation: Option<u64>,
}

pub struct RealtimeProvider<C: Connector = WsConnector> {
    client: RealtimeClient<C>,
    auth: AuthContext,
    config: ProviderConfig,
}

impl<C: Connector> Clone for RealtimeProvider<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            auth: self.auth.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: Connector> RealtimeProvider<C> {
    pub fn new(client: RealtimeClient<C>, auth: AuthContext, config: ProviderConfig) -> Self {
        Self {
            client,
            auth,
            config,
        }
    }

    pub fn client(&self) -> &RealtimeClient<C> {
        &self.client
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Run [`run`](Self::run) on a background task. Abort the handle to stop.
    pub fn spawn(&self) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }

    /// React to session and connection changes until the task is dropped.
    pub async fn run(self) {
        let mut sessions = self.auth.watch();
        let mut states = self.client.watch();
        let mut bridge = Bridge::default();

        loop {
            let session = sessions.borrow_and_update().clone();
            let snapshot = states.borrow_and_update().clone();
            self.reconcile(&mut bridge, session, snapshot).await;

            tokio::select! {
                changed = sessions.changed() => if changed.is_err() { break },
                changed = states.changed() => if changed.is_err() { break },
            }
        }
    }

    /// Fetch a fresh token and send it on the current connection.
    pub async fn authenticate_now(&self) -> Result<(), ProviderError> {
        let token = self.auth.fresh_token(self.config.refresh_skew).await?;
        self.client.authenticate(&token)?;
        Ok(())
    }

    async fn reconcile(
        &self,
        bridge: &mut Bridge,
        session: Option<AuthSession>,
        mut snapshot: ConnectionSnapshot,
    ) {
        let Some(session) = session else {
            if let Some(user_id) = bridge.user_id.take() {
                self.client.unsubscribe(&self.config.user_channel(&user_id));
                self.client.disconnect();
                tracing::info!(%user_id, "signed out; realtime disconnected");
            }
            bridge.authenticated_generation = None;
            return;
        };

        if bridge.user_id.as_deref() != Some(session.user_id.as_str()) {
            if let Some(previous) = bridge.user_id.take() {
                self.client.unsubscribe(&self.config.user_channel(&previous));
                self.client.disconnect();
            }
            bridge.authenticated_generation = None;
            self.client.subscribe(&self.config.user_channel(&session.user_id));
            self.client.connect();
            tracing::info!(user_id = %session.user_id, "realtime session started");
            bridge.user_id = Some(session.user_id);
            snapshot = self.client.snapshot();
        }

        if snapshot.status == ConnectionState::Open
            && bridge.authenticated_generation != Some(snapshot.generation)
        {
            match self.authenticate_generation(snapshot.generation).await {
                Ok(true) => bridge.authenticated_generation = Some(snapshot.generation),
                Ok(false) => {
                    tracing::debug!(
                        generation = snapshot.generation,
                        "connection replaced during token refresh; auth skipped"
                    );
                }
                Err(e) => {
                    bridge.authenticated_generation = Some(snapshot.generation);
                    tracing::warn!(generation = snapshot.generation, error = %e, "automatic authentication failed");
                }
            }
        }
    }

    /// Authenticate the connection of `generation`. Returns `Ok(false)` without
    /// sending anything if that connection was replaced while the token was
    /// being refreshed.
    async fn authenticate_generation(&self, generation: u64) -> Result<bool, ProviderError> {
        let token = self.auth.fresh_token(self.config.refresh_skew).await?;
        if self.client.snapshot().generation != generation {
            return Ok(false);
        }
        self.client.authenticate(&token)?;
        Ok(true)
    }
}
