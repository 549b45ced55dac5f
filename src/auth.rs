use async_trait::async_trait;
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::BackendConfig;
use crate::error::AuthError;
use crate::models::{AuthSession, Profile, UserRole};
use crate::persistence::RecordStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: Option<String>,
}

/// Hosted authentication collaborator.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
    async fn current_session(&self) -> Option<AuthSession>;
}

/// Creates the account and its profile row. New profiles start as consumers.
///
/// The profile insert goes through the store `store_for` builds from the new
/// session, so it carries that session's token.
pub async fn register<F>(auth: &dyn AuthProvider, request: &SignUp, store_for: F) -> Result<AuthSession, AuthError>
where
    F: FnOnce(&AuthSession) -> Arc<dyn RecordStore>,
{
    let session = auth.sign_up(&request.email, &request.password).await?;
    let store = store_for(&session);

    let profile = Profile {
        user_id: session.user_id.clone(),
        first_name: request.first_name.clone(),
        last_name: request.last_name.clone(),
        email: request.email.clone(),
        user_type: UserRole::Consumer,
        location: None,
    };
    if let Err(e) = store.create_profile(&profile).await {
        error!("Account {} created but its profile was not: {}", session.email, e);
        return Err(e.into());
    }

    info!("Registered {}", session.email);
    Ok(session)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    SignUp,
    Password,
}

impl Grant {
    fn path(self) -> &'static str {
        match self {
            Grant::SignUp => "signup",
            Grant::Password => "token?grant_type=password",
        }
    }
}

/// Client for the hosted GoTrue-style auth endpoints.
pub struct RestAuthProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    session: Arc<RwLock<Option<AuthSession>>>,
}

impl RestAuthProvider {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            session: Arc::new(RwLock::new(None)),
        }
    }

    async fn token_request(&self, grant: Grant, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let response = self
            .client
            .post(format!("{}/auth/v1/{}", self.base_url, grant.path()))
            .header("apikey", &self.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        // Sign-up 400s (already registered, weak password) surface as Service.
        if grant == Grant::Password && matches!(status.as_u16(), 400 | 401) {
            warn!("Sign in rejected for {}: {}", email, body);
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(AuthError::Service { status: status.as_u16(), body });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::Decode(e.to_string()))?;
        let session = AuthSession {
            user_id: token.user.id,
            email: token.user.email.unwrap_or_else(|| email.to_string()),
            access_token: token.access_token,
        };

        *self.session.write().await = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl AuthProvider for RestAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        self.token_request(Grant::SignUp, email, password).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        self.token_request(Grant::Password, email, password).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };

        let response = self
            .client
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Service { status, body });
        }
        info!("Signed out {}", session.email);
        Ok(())
    }

    async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }
}
