//! Authentication session shared with the realtime provider.
//!
//! The session lives in a watch channel so observers (the provider, UI code)
//! react to login, logout and token refresh without polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::AuthError;

/// Signed-in user and their tokens.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuthSession {
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    /// True when the access token expires within `skew` of `now`, or already has.
    pub fn expires_within(&self, skew: Duration, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(skew)
            .ok()
            .and_then(|skew| now.checked_add_signed(skew))
            .map_or(true, |limit| self.expires_at <= limit)
    }

    fn same_tokens(&self, other: &AuthSession) -> bool {
        self.user_id == other.user_id && self.access_token == other.access_token
    }
}

/// Exchanges a session's refresh token for a new session.
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    async fn refresh(&self, session: &AuthSession) -> Result<AuthSession, AuthError>;
}

/// Refresher for sessions that cannot be renewed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRefresh;

#[async_trait]
impl SessionRefresher for NoRefresh {
    async fn refresh(&self, _session: &AuthSession) -> Result<AuthSession, AuthError> {
        Err(AuthError::RefreshUnavailable)
    }
}

/// Refresh against a Supabase auth endpoint.
#[derive(Debug, Clone)]
pub struct SupabaseRefresher {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<TokenUser>,
}

#[derive(Deserialize)]
struct TokenUser {
    id: String,
}

impl TokenResponse {
    fn into_session(self, previous: &AuthSession, now: DateTime<Utc>) -> AuthSession {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                self.expires_in
                    .and_then(|secs| now.checked_add_signed(chrono::Duration::seconds(secs)))
            })
            .unwrap_or(now);
        AuthSession {
            user_id: self.user.map_or_else(|| previous.user_id.clone(), |user| user.id),
            access_token: self.access_token,
            refresh_token: self.refresh_token.or_else(|| previous.refresh_token.clone()),
            expires_at,
        }
    }
}

impl SupabaseRefresher {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Built from `SUPABASE_URL` and `SUPABASE_ANON_KEY`, if both are set.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let api_key = std::env::var("SUPABASE_ANON_KEY").ok()?;
        Some(Self::new(base_url, api_key))
    }

    fn token_url(&self) -> String {
        format!(
            "{}/auth/v1/token?grant_type=refresh_token",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl SessionRefresher for SupabaseRefresher {
    async fn refresh(&self, session: &AuthSession) -> Result<AuthSession, AuthError> {
        let refresh_token = session
            .refresh_token
            .as_deref()
            .ok_or(AuthError::MissingRefreshToken)?;

        let response = self
            .http
            .post(self.token_url())
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;
        Ok(token.into_session(session, Utc::now()))
    }
}

/// Best human-readable message from an auth error body.
fn error_detail(body: &str) -> String {
    if let Some(detail) = contested_shared::try_problem_detail(body) {
        return detail;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error_description", "msg", "message", "error"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.trim().to_string()
}

/// Shared handle to the current session.
#[derive(Clone)]
pub struct AuthContext {
    session: Arc<watch::Sender<Option<AuthSession>>>,
    refresher: Arc<dyn SessionRefresher>,
}

impl AuthContext {
    pub fn new(refresher: Arc<dyn SessionRefresher>) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            session: Arc::new(session),
            refresher,
        }
    }

    pub fn without_refresh() -> Self {
        Self::new(Arc::new(NoRefresh))
    }

    pub fn login(&self, session: AuthSession) {
        tracing::info!(user_id = %session.user_id, "session established");
        self.session.send_replace(Some(session));
    }

    pub fn logout(&self) {
        if self.session.send_replace(None).is_some() {
            tracing::info!("session cleared");
        }
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.session.borrow().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.session
            .borrow()
            .as_ref()
            .map(|session| session.user_id.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub fn watch(&self) -> watch::Receiver<Option<AuthSession>> {
        self.session.subscribe()
    }

    /// Access token valid for at least `skew`, refreshing the session first if
    /// needed. A known-stale token is never returned.
    ///
    /// A refresh result is discarded with [`AuthError::SessionChanged`] if the
    /// session was replaced or cleared while the refresh was in flight.
    pub async fn fresh_token(&self, skew: Duration) -> Result<String, AuthError> {
        let current = self.session().ok_or(AuthError::NoSession)?;
        if !current.expires_within(skew, Utc::now()) {
            return Ok(current.access_token);
        }

        tracing::debug!(user_id = %current.user_id, "refreshing session before use");
        let refreshed = match self.refresher.refresh(&current).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!(user_id = %current.user_id, error = %e, "session refresh failed");
                return Err(e);
            }
        };

        let stored = self.session.send_if_modified(|slot| match slot {
            Some(existing) if existing.same_tokens(&current) => {
                *slot = Some(refreshed.clone());
                true
            }
            _ => false,
        });
        if !stored {
            return Err(AuthError::SessionChanged);
        }
        Ok(refreshed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    use rstest::rstest;

    use super::*;

    fn session(token: &str, expires_in_secs: i64) -> AuthSession {
        AuthSession {
            user_id: "42".into(),
            access_token: token.into(),
            refresh_token: Some("refresh-1".into()),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        }
    }

    #[derive(Default)]
    struct CountingRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SessionRefresher for CountingRefresher {
        async fn refresh(&self, previous: &AuthSession) -> Result<AuthSession, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AuthSession {
                access_token: "fresh".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
                ..previous.clone()
            })
        }
    }

    /// Clears the session mid-refresh.
    #[derive(Default)]
    struct LogoutDuringRefresh {
        auth: OnceLock<AuthContext>,
    }

    #[async_trait]
    impl SessionRefresher for LogoutDuringRefresh {
        async fn refresh(&self, previous: &AuthSession) -> Result<AuthSession, AuthError> {
            if let Some(auth) = self.auth.get() {
                auth.logout();
            }
            Ok(AuthSession {
                access_token: "fresh".into(),
                ..previous.clone()
            })
        }
    }

    #[rstest]
    #[case(3600, 60, false)]
    #[case(30, 60, true)]
    #[case(-5, 0, true)]
    fn expiry_window(#[case] expires_in: i64, #[case] skew_secs: u64, #[case] expected: bool) {
        let session = session("t", expires_in);
        assert_eq!(
            session.expires_within(Duration::from_secs(skew_secs), Utc::now()),
            expected
        );
    }

    #[test]
    fn login_and_logout_are_observable() {
        let auth = AuthContext::without_refresh();
        let mut rx = auth.watch();
        assert!(!auth.is_authenticated());

        auth.login(session("t", 3600));
        assert!(rx.has_changed().unwrap());
        assert_eq!(auth.user_id().as_deref(), Some("42"));

        rx.borrow_and_update();
        auth.logout();
        assert!(rx.has_changed().unwrap());
        assert!(auth.session().is_none());
    }

    #[tokio::test]
    async fn fresh_token_without_session_fails() {
        let auth = AuthContext::without_refresh();
        assert_eq!(
            auth.fresh_token(Duration::from_secs(60)).await,
            Err(AuthError::NoSession)
        );
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let refresher = Arc::new(CountingRefresher::default());
        let auth = AuthContext::new(refresher.clone());
        auth.login(session("current", 3600));

        let token = auth.fresh_token(Duration::from_secs(60)).await.unwrap();
        assert_eq!(token, "current");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_and_stored() {
        let refresher = Arc::new(CountingRefresher::default());
        let auth = AuthContext::new(refresher.clone());
        auth.login(session("stale", 10));

        let token = auth.fresh_token(Duration::from_secs(60)).await.unwrap();
        assert_eq!(token, "fresh");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(auth.session().unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn stale_token_is_never_returned_when_refresh_is_unavailable() {
        let auth = AuthContext::without_refresh();
        auth.login(session("stale", 10));

        assert_eq!(
            auth.fresh_token(Duration::from_secs(60)).await,
            Err(AuthError::RefreshUnavailable)
        );
        assert_eq!(auth.session().unwrap().access_token, "stale");
    }

    #[tokio::test]
    async fn refresh_result_is_dropped_after_logout() {
        let refresher = Arc::new(LogoutDuringRefresh::default());
        let auth = AuthContext::new(refresher.clone());
        let _ = refresher.auth.set(auth.clone());
        auth.login(session("stale", 10));

        assert_eq!(
            auth.fresh_token(Duration::from_secs(60)).await,
            Err(AuthError::SessionChanged)
        );
        assert!(auth.session().is_none());
    }

    #[test]
    fn token_response_fills_missing_fields_from_previous_session() {
        let previous = session("old", 10);
        let now = Utc::now();
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"new","expires_in":3600}"#).unwrap();

        let next = response.into_session(&previous, now);
        assert_eq!(next.user_id, "42");
        assert_eq!(next.access_token, "new");
        assert_eq!(next.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(next.expires_at, now + chrono::Duration::seconds(3600));
    }

    #[rstest]
    #[case(r#"{"error":"invalid_grant","error_description":"Refresh Token Not Found"}"#, "Refresh Token Not Found")]
    #[case(r#"{"msg":"Invalid API key"}"#, "Invalid API key")]
    #[case("upstream timeout\n", "upstream timeout")]
    fn error_detail_extraction(#[case] body: &str, #[case] expected: &str) {
        assert_eq!(error_detail(body), expected);
    }
}
