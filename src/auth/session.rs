//! Session lifecycle
//!
//! Owns the in-memory notion of "am I authenticated": OTP login, session
//! restore at process start, and logout. Credentials are only ever
//! persisted here and in the refresh coordinator; UI layers read the
//! session state, never write it.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, RwLock};
use crate::Result;
use crate::api::{ApiCall, Transport};
use super::credentials::{self, CredentialPair, CredentialStore, ACCESS_TOKEN_KEY};
use super::refresh::RefreshCoordinator;

const OTP_REQUEST_PATH: &str = "/v1/auth/otp/request";
const OTP_VERIFY_PATH: &str = "/v1/auth/otp/verify";
const LOGOUT_PATH: &str = "/v1/auth/logout";
const CURRENT_USER_PATH: &str = "/v1/users/me";

/// Backend role attached to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Courier,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Courier => "courier",
            Role::Admin => "admin",
        }
    }
}

/// Storefront account holder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub phone: String,
    pub name: Option<String>,
}

/// Established session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: User,
    pub role: Role,
    pub is_new_account: bool,
}

/// Session state machine
///
/// `Anonymous -> PendingVerification -> Authenticated -> Anonymous`, with
/// the direct `Anonymous -> Authenticated` edge taken by a successful
/// restore. Pending verification carries no credential state.
#[derive(Debug, Clone)]
pub enum SessionState {
    Anonymous,
    PendingVerification {
        phone: String,
        expires_at: DateTime<Utc>,
    },
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// User payload as the backend reports it
#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    phone: String,
    #[serde(default)]
    name: Option<String>,
    role: Role,
}

impl UserPayload {
    fn into_session(self, is_new_account: bool) -> Session {
        Session {
            role: self.role,
            user: User {
                id: self.id,
                phone: self.phone,
                name: self.name,
            },
            is_new_account,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CodeIssued {
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct VerifyGrant {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    is_new_account: bool,
    user: UserPayload,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    user: UserPayload,
}

/// Manages login, restore, and logout for one device
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    refresher: RefreshCoordinator,
    state: RwLock<SessionState>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        refresher: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            store,
            refresher,
            state: RwLock::new(SessionState::Anonymous),
        }
    }

    /// Snapshot of the current session state
    ///
    /// An expired pending verification reads as anonymous.
    pub fn state(&self) -> SessionState {
        let state = self.state.read().unwrap();
        if let SessionState::PendingVerification { expires_at, .. } = *state {
            if expires_at <= Utc::now() {
                return SessionState::Anonymous;
            }
        }
        state.clone()
    }

    /// Current access token, when one is stored
    pub fn access_token(&self) -> Result<Option<String>> {
        self.store.get(ACCESS_TOKEN_KEY)
    }

    /// Stored credential pair, for status display
    pub fn stored_credentials(&self) -> Result<Option<CredentialPair>> {
        credentials::load(self.store.as_ref())
    }

    /// Ask the backend to send a one-time code to `phone`
    ///
    /// Phone format is the caller's job to validate. Nothing is persisted
    /// until the code is verified. Returns the code's expiry deadline.
    pub async fn request_code(&self, phone: &str) -> Result<DateTime<Utc>> {
        let call = ApiCall::post(OTP_REQUEST_PATH).json(json!({ "phone": phone }));
        let response = self.transport.execute(&call, None).await?;
        let issued: CodeIssued = response.into_result()?;

        let expires_at = Utc::now() + chrono::Duration::seconds(issued.expires_in);
        *self.state.write().unwrap() = SessionState::PendingVerification {
            phone: phone.to_string(),
            expires_at,
        };

        tracing::debug!(phone, "one-time code issued");
        Ok(expires_at)
    }

    /// Exchange a one-time code for credentials
    ///
    /// On any failure the session stays unauthenticated and nothing is
    /// persisted. `name` is only honored when the backend creates a new
    /// account.
    pub async fn verify_code(
        &self,
        phone: &str,
        code: &str,
        name: Option<&str>,
    ) -> Result<Session> {
        let mut body = json!({ "phone": phone, "code": code });
        if let Some(name) = name {
            body["name"] = json!(name);
        }

        let call = ApiCall::post(OTP_VERIFY_PATH).json(body);
        let response = self.transport.execute(&call, None).await?;
        let grant: VerifyGrant = response.into_result()?;

        let pair = CredentialPair::new(grant.access_token, grant.refresh_token, grant.expires_in);
        credentials::save(self.store.as_ref(), &pair)?;

        let session = grant.user.into_session(grant.is_new_account);
        *self.state.write().unwrap() = SessionState::Authenticated(session.clone());

        tracing::info!(user_id = %session.user.id, role = session.role.as_str(), "signed in");
        Ok(session)
    }

    /// Resolve a session from stored credentials at process start
    ///
    /// A stored token rejected by the backend gets exactly one refresh
    /// through the coordinator before giving up. Ending up anonymous is
    /// the expected logged-out path, not an error; only a broken
    /// credential store fails this call.
    pub async fn restore(&self) -> Result<Option<Session>> {
        let token = match self.store.get(ACCESS_TOKEN_KEY)? {
            Some(token) => token,
            None => {
                *self.state.write().unwrap() = SessionState::Anonymous;
                return Ok(None);
            }
        };

        let call = ApiCall::get(CURRENT_USER_PATH);
        let first = match self.transport.execute(&call, Some(&token)).await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(error = %err, "session restore failed, staying anonymous");
                *self.state.write().unwrap() = SessionState::Anonymous;
                return Ok(None);
            }
        };

        let response = if first.is_unauthorized() {
            match self.refresher.refresh().await {
                Some(pair) => match self.transport.execute(&call, Some(&pair.access_token)).await {
                    Ok(second) => second,
                    Err(err) => {
                        tracing::debug!(error = %err, "session restore retry failed, staying anonymous");
                        *self.state.write().unwrap() = SessionState::Anonymous;
                        return Ok(None);
                    }
                },
                None => {
                    *self.state.write().unwrap() = SessionState::Anonymous;
                    return Ok(None);
                }
            }
        } else {
            first
        };

        let session = match response.into_result::<CurrentUser>() {
            Ok(current) => current.user.into_session(false),
            Err(err) => {
                tracing::debug!(error = %err, "stored session not usable, staying anonymous");
                *self.state.write().unwrap() = SessionState::Anonymous;
                return Ok(None);
            }
        };

        *self.state.write().unwrap() = SessionState::Authenticated(session.clone());
        tracing::info!(user_id = %session.user.id, "session restored");
        Ok(Some(session))
    }

    /// Clear the session, locally always, remotely best-effort
    ///
    /// An unreachable backend never makes logout fail; only a broken
    /// credential store does.
    pub async fn logout(&self) -> Result<()> {
        match self.store.get(ACCESS_TOKEN_KEY) {
            Ok(Some(token)) => {
                let call = ApiCall::post(LOGOUT_PATH);
                match self.transport.execute(&call, Some(&token)).await {
                    Ok(response) if !response.is_success() => {
                        tracing::debug!(status = response.status, "remote sign-out rejected, clearing local session anyway");
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "remote sign-out failed, clearing local session anyway");
                    }
                    Ok(_) => {}
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "credential store read failed during logout");
            }
        }

        credentials::clear(self.store.as_ref())?;
        *self.state.write().unwrap() = SessionState::Anonymous;
        Ok(())
    }
}
