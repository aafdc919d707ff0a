//! Account management against a Supabase-style identity provider.
//!
//! [`IdentityGateway`] is the only type the rest of the crate talks to. It
//! owns the current session, gates every call on provider configuration, and
//! fans session transitions out to [`SessionSubscription`]s.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::config::ProviderConfig;
use crate::error::{IdentityError, NOT_CONFIGURED_MESSAGE};

const SESSION_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: User,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthData {
    pub user: Option<User>,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl From<IdentityError> for AuthError {
    fn from(e: IdentityError) -> Self {
        Self {
            status: e.status(),
            message: e.to_string(),
        }
    }
}

/// Uniform `{data, error}` result of every mutating auth call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub data: Option<AuthData>,
    pub error: Option<AuthError>,
}

impl AuthResponse {
    fn ok(data: Option<AuthData>) -> Self {
        Self { data, error: None }
    }

    fn err(e: impl Into<AuthError>) -> Self {
        Self {
            data: None,
            error: Some(e.into()),
        }
    }

    fn not_configured() -> Self {
        Self::err(IdentityError::NotConfigured(NOT_CONFIGURED_MESSAGE))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionChange {
    pub event: SessionEvent,
    pub session: Option<Session>,
}

// ─── Provider seam ───────────────────────────────────────────────────────────

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthData, IdentityError>;
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError>;
    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError>;
    async fn get_user(&self, access_token: &str) -> Result<User, IdentityError>;
}

/// GoTrue REST client (`/auth/v1/*`).
pub struct SupabaseAuth {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseAuth {
    pub fn new(client: reqwest::Client, base_url: &str, anon_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, IdentityError> {
        let resp = req
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Err(IdentityError::Provider {
            status,
            message: provider_message(&body)
                .unwrap_or_else(|| format!("request failed with {status}")),
        })
    }
}

/// GoTrue has used `msg`, `error_description`, `message` and `error` over time.
fn provider_message(body: &Value) -> Option<String> {
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|k| body.get(k).and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthData, IdentityError> {
        let req = self
            .client
            .post(self.endpoint("signup"))
            .json(&json!({ "email": email, "password": password }));
        let body: Value = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))?;

        // Auto-confirmed projects answer with a session, others with the bare user.
        if body.get("access_token").is_some() {
            let session: Session =
                serde_json::from_value(body).map_err(|e| IdentityError::Decode(e.to_string()))?;
            Ok(AuthData {
                user: Some(session.user.clone()),
                session: Some(session),
            })
        } else {
            let user: User =
                serde_json::from_value(body).map_err(|e| IdentityError::Decode(e.to_string()))?;
            Ok(AuthData {
                user: Some(user),
                session: None,
            })
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError> {
        let req = self
            .client
            .post(self.endpoint("token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        self.send(req)
            .await?
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        let req = self
            .client
            .post(self.endpoint("logout"))
            .bearer_auth(access_token);
        self.send(req).await.map(|_| ())
    }

    async fn get_user(&self, access_token: &str) -> Result<User, IdentityError> {
        let req = self.client.get(self.endpoint("user")).bearer_auth(access_token);
        self.send(req)
            .await?
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))
    }
}

// ─── Gateway ─────────────────────────────────────────────────────────────────

pub struct IdentityGateway {
    provider: Option<Arc<dyn IdentityProvider>>,
    session: RwLock<Option<Session>>,
    changes: broadcast::Sender<SessionChange>,
}

impl IdentityGateway {
    /// Wrap `provider`, dropping it when `config` is not usable.
    pub fn new(config: &ProviderConfig, provider: Arc<dyn IdentityProvider>) -> Self {
        Self::with_provider(config.is_configured().then_some(provider))
    }

    pub fn from_config(config: &ProviderConfig, client: reqwest::Client) -> Self {
        let provider = config.credentials().map(|(url, key)| {
            Arc::new(SupabaseAuth::new(client, url, key)) as Arc<dyn IdentityProvider>
        });
        Self::with_provider(provider)
    }

    fn with_provider(provider: Option<Arc<dyn IdentityProvider>>) -> Self {
        let (changes, _) = broadcast::channel(SESSION_CHANNEL_CAPACITY);
        Self {
            provider,
            session: RwLock::new(None),
            changes,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResponse {
        let Some(provider) = &self.provider else {
            return AuthResponse::not_configured();
        };
        match provider.sign_up(email, password).await {
            Ok(data) => {
                if let Some(session) = &data.session {
                    self.set_session(session.clone()).await;
                }
                AuthResponse::ok(Some(data))
            }
            Err(e) => {
                warn!(error = %e, "Sign-up failed");
                AuthResponse::err(e)
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResponse {
        let Some(provider) = &self.provider else {
            return AuthResponse::not_configured();
        };
        match provider.sign_in_with_password(email, password).await {
            Ok(session) => {
                self.set_session(session.clone()).await;
                AuthResponse::ok(Some(AuthData {
                    user: Some(session.user.clone()),
                    session: Some(session),
                }))
            }
            Err(e) => {
                warn!(error = %e, "Sign-in failed");
                AuthResponse::err(e)
            }
        }
    }

    /// Clears the local session even when the provider rejects the logout.
    pub async fn sign_out(&self) -> AuthResponse {
        let Some(provider) = &self.provider else {
            return AuthResponse::not_configured();
        };
        let previous = self.session.write().await.take();
        let result = match &previous {
            Some(session) => provider.sign_out(&session.access_token).await,
            None => Ok(()),
        };
        info!("Signed out");
        let _ = self.changes.send(SessionChange {
            event: SessionEvent::SignedOut,
            session: None,
        });

        match result {
            Ok(()) => AuthResponse::ok(None),
            Err(e) => {
                warn!(error = %e, "Provider logout failed");
                AuthResponse::err(e)
            }
        }
    }

    pub async fn current_user(&self) -> Option<User> {
        let provider = self.provider.as_ref()?;
        let token = self.session.read().await.as_ref()?.access_token.clone();
        match provider.get_user(&token).await {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Failed to load current user");
                None
            }
        }
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Listen for session transitions. Unconfigured gateways hand out a detached subscription.
    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            rx: self.provider.as_ref().map(|_| self.changes.subscribe()),
        }
    }

    async fn set_session(&self, session: Session) {
        info!(user_id = %session.user.id, "Signed in");
        *self.session.write().await = Some(session.clone());
        let _ = self.changes.send(SessionChange {
            event: SessionEvent::SignedIn,
            session: Some(session),
        });
    }
}

pub struct SessionSubscription {
    rx: Option<broadcast::Receiver<SessionChange>>,
}

impl SessionSubscription {
    /// Next transition, or `None` once detached or the gateway is gone.
    pub async fn recv(&mut self) -> Option<SessionChange> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<SessionChange> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.try_recv() {
                Ok(change) => return Some(change),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }

    pub fn unsubscribe(&mut self) {
        self.rx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
        reject_logout: bool,
    }

    fn session(email: &str) -> Session {
        Session {
            access_token: format!("token-{email}"),
            refresh_token: None,
            expires_in: Some(3600),
            user: User {
                id: "user-1".to_string(),
                email: Some(email.to_string()),
            },
        }
    }

    #[async_trait]
    impl IdentityProvider for CountingProvider {
        async fn sign_up(&self, email: &str, _password: &str) -> Result<AuthData, IdentityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AuthData {
                user: Some(session(email).user),
                session: None,
            })
        }

        async fn sign_in_with_password(
            &self,
            email: &str,
            password: &str,
        ) -> Result<Session, IdentityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if password == "wrong" {
                return Err(IdentityError::Provider {
                    status: 400,
                    message: "Invalid login credentials".to_string(),
                });
            }
            Ok(session(email))
        }

        async fn sign_out(&self, _access_token: &str) -> Result<(), IdentityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_logout {
                return Err(IdentityError::Request("connection reset".to_string()));
            }
            Ok(())
        }

        async fn get_user(&self, access_token: &str) -> Result<User, IdentityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let email = access_token.trim_start_matches("token-");
            Ok(session(email).user)
        }
    }

    fn configured() -> ProviderConfig {
        ProviderConfig::new("https://farm.supabase.co", "anon-key")
    }

    #[tokio::test]
    async fn unconfigured_gateway_never_calls_provider() {
        let provider = Arc::new(CountingProvider::default());
        let gateway = IdentityGateway::new(&ProviderConfig::default(), provider.clone());

        for resp in [
            gateway.sign_in("a@farm.in", "pw").await,
            gateway.sign_up("a@farm.in", "pw").await,
            gateway.sign_out().await,
        ] {
            assert!(resp.data.is_none());
            assert_eq!(resp.error.unwrap().message, NOT_CONFIGURED_MESSAGE);
        }
        assert!(gateway.current_user().await.is_none());
        assert!(!gateway.subscribe().is_active());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sign_in_then_out_notifies_subscribers() {
        let gateway = IdentityGateway::new(&configured(), Arc::new(CountingProvider::default()));
        let mut sub = gateway.subscribe();

        let resp = gateway.sign_in("ravi@farm.in", "secret").await;
        assert!(resp.error.is_none());
        assert_eq!(
            gateway.current_user().await.unwrap().email.as_deref(),
            Some("ravi@farm.in")
        );

        gateway.sign_out().await;
        assert!(gateway.session().await.is_none());
        assert!(gateway.current_user().await.is_none());

        let first = sub.recv().await.unwrap();
        assert_eq!(first.event, SessionEvent::SignedIn);
        assert_eq!(first.session.unwrap().user.email.as_deref(), Some("ravi@farm.in"));
        let second = sub.recv().await.unwrap();
        assert_eq!(second.event, SessionEvent::SignedOut);
        assert!(second.session.is_none());
    }

    #[tokio::test]
    async fn failed_sign_in_keeps_no_session() {
        let gateway = IdentityGateway::new(&configured(), Arc::new(CountingProvider::default()));
        let mut sub = gateway.subscribe();

        let resp = gateway.sign_in("ravi@farm.in", "wrong").await;
        let err = resp.error.unwrap();
        assert_eq!(err.message, "Invalid login credentials");
        assert_eq!(err.status, Some(400));
        assert!(gateway.session().await.is_none());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn unsubscribed_listener_receives_nothing() {
        let gateway = IdentityGateway::new(&configured(), Arc::new(CountingProvider::default()));
        let mut sub = gateway.subscribe();
        sub.unsubscribe();

        gateway.sign_in("ravi@farm.in", "secret").await;
        assert!(!sub.is_active());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn subscription_detaches_once_gateway_is_dropped() {
        let gateway = IdentityGateway::new(&configured(), Arc::new(CountingProvider::default()));
        let mut sub = gateway.subscribe();
        gateway.sign_in("ravi@farm.in", "secret").await;
        drop(gateway);

        assert_eq!(sub.try_recv().unwrap().event, SessionEvent::SignedIn);
        assert!(sub.is_active());
        assert!(sub.try_recv().is_none());
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn sign_out_clears_session_when_provider_fails() {
        let provider = Arc::new(CountingProvider {
            reject_logout: true,
            ..Default::default()
        });
        let gateway = IdentityGateway::new(&configured(), provider);
        gateway.sign_in("ravi@farm.in", "secret").await;

        let resp = gateway.sign_out().await;
        assert!(resp.error.is_some());
        assert!(gateway.session().await.is_none());
    }

    #[test]
    fn provider_message_prefers_known_keys() {
        assert_eq!(
            provider_message(&json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" })),
            Some("Invalid login credentials".to_string())
        );
        assert_eq!(
            provider_message(&json!({ "code": 422, "msg": "User already registered" })),
            Some("User already registered".to_string())
        );
        assert_eq!(provider_message(&Value::Null), None);
    }
}
