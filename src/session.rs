//! Credential lifecycle: decides when an adapter must log in or refresh.
//!
//! ```text
//! Unauthenticated ──login──▶ Authenticated ──age ≥ max──▶ Stale
//!        ▲                        ▲                         │
//!        └──── failure ───────────┴──────── refresh ────────┘
//! ```
//!
//! State is derived from the stored [`CredentialRecord`] at the top of every
//! token-requiring call. Failures leave the record untouched.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::adapter::{Adapter, Session};
use crate::config::AdapterConfig;
use crate::credentials::{CredentialRecord, CredentialStore};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated {
        tokens: Vec<String>,
        last_updated: DateTime<Utc>,
    },
    Stale,
}

impl SessionState {
    /// Classify a record. A record with tokens but no timestamp counts as
    /// stale since its age is unknown.
    pub fn of(record: &CredentialRecord, max_age: Duration, now: DateTime<Utc>) -> Self {
        if !record.has_tokens() {
            return SessionState::Unauthenticated;
        }
        match record.last_updated {
            Some(last_updated) if now - last_updated < max_age => SessionState::Authenticated {
                tokens: record.auth_tokens.clone(),
                last_updated,
            },
            _ => SessionState::Stale,
        }
    }
}

/// Drives login/refresh against the [`CredentialStore`].
pub struct SessionManager {
    credentials: Arc<CredentialStore>,
}

impl SessionManager {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self { credentials }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Staleness threshold: operator override, else the adapter's own.
    pub fn max_age(adapter: &dyn Adapter, config: &AdapterConfig) -> Duration {
        config
            .refresh_interval_hours
            .map(hours)
            .unwrap_or_else(|| adapter.token_max_age())
    }

    /// Session for the next call to `adapter`, logging in or refreshing
    /// first when required.
    pub async fn session_for(
        &self,
        adapter: &dyn Adapter,
        config: &AdapterConfig,
    ) -> Result<Session> {
        let descriptor = adapter.descriptor();
        let record = self.credentials.get(&descriptor.id).await;

        if !descriptor.capabilities.auth_required {
            return Ok(Session::from(&record));
        }

        let now = Utc::now();
        match SessionState::of(&record, Self::max_age(adapter, config), now) {
            SessionState::Authenticated {
                tokens,
                last_updated,
            } => Ok(Session {
                tokens,
                last_updated: Some(last_updated),
            }),
            SessionState::Unauthenticated => {
                if record.username.is_empty() {
                    return Err(Error::Auth(format!(
                        "{}: no credentials configured, run login first",
                        descriptor.id
                    )));
                }
                info!("Logging in to {}", descriptor.id);
                let tokens = adapter
                    .login(&record.username, &record.password)
                    .await
                    .map_err(into_auth)?;
                self.store_tokens(&descriptor.id, tokens, now).await
            }
            SessionState::Stale => {
                info!("Refreshing stale session for {}", descriptor.id);
                let tokens = adapter.refresh(&record).await.map_err(into_auth)?;
                self.store_tokens(&descriptor.id, tokens, now).await
            }
        }
    }

    /// Explicit login: stores username/password together with fresh tokens.
    pub async fn login(
        &self,
        adapter: &dyn Adapter,
        username: &str,
        password: &str,
    ) -> Result<CredentialRecord> {
        let id = adapter.descriptor().id;
        info!("Logging in to {id} as {username}");
        let tokens = adapter
            .login(username, password)
            .await
            .map_err(into_auth)?;

        let record = CredentialRecord {
            username: username.to_string(),
            password: password.to_string(),
            auth_tokens: tokens,
            last_updated: Some(Utc::now()),
        };
        self.credentials.put(&id, record.clone()).await?;
        Ok(record)
    }

    /// Log in again with the stored username and password after the
    /// provider rejected the current tokens. The record only changes when
    /// the login succeeds.
    pub async fn relogin(&self, adapter: &dyn Adapter) -> Result<Session> {
        let id = adapter.descriptor().id;
        let record = self.credentials.get(&id).await;
        if record.username.is_empty() {
            return Err(Error::Auth(format!(
                "{id}: no stored credentials to log in with"
            )));
        }

        info!("Logging in to {id} again");
        let tokens = adapter
            .login(&record.username, &record.password)
            .await
            .map_err(into_auth)?;
        self.store_tokens(&id, tokens, Utc::now()).await
    }

    async fn store_tokens(
        &self,
        adapter_id: &str,
        tokens: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        if tokens.is_empty() {
            return Err(Error::Auth(format!("{adapter_id}: login returned no tokens")));
        }
        if let Err(e) = self
            .credentials
            .set_tokens(adapter_id, tokens.clone(), now)
            .await
        {
            // Tokens are valid for this call even if they could not be saved
            warn!("Failed to persist tokens for {adapter_id}: {e}");
        }
        Ok(Session {
            tokens,
            last_updated: Some(now),
        })
    }
}

/// Any login/refresh failure surfaces as an auth error.
fn into_auth(e: Error) -> Error {
    match e {
        Error::Auth(_) => e,
        other => Error::Auth(other.to_string()),
    }
}

/// Fractional hours as a duration. Negative and NaN inputs count as zero;
/// values past the representable range (including infinity) saturate.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn hours(h: f64) -> Duration {
    // `as` saturates, so only the millisecond range check can fail
    Duration::try_seconds((h.max(0.0) * 3600.0) as i64).unwrap_or(Duration::MAX)
}
