//! Caller identity resolution
//!
//! One ordered list of strategies decides which profile a request acts for.
//! Precedence:
//!
//! 1. `X-Profile-Id` set by the upstream auth proxy
//! 2. `Authorization: Bearer <session>` looked up in the store
//! 3. `X-User-Email` looked up in the store
//! 4. `X-User-Email` auto-created as a new profile (off unless configured)
//!
//! The first strategy that resolves wins. No resolution is `Unauthorized`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::error::PaymentError;
use crate::ledger::{PaymentStore, Profile};

pub const PROFILE_ID_HEADER: &str = "x-profile-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Uuid),
    Next,
}

#[async_trait]
pub trait IdentityStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(
        &self,
        headers: &HeaderMap,
        store: &dyn PaymentStore,
    ) -> Result<Resolution, PaymentError>;
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub struct HeaderProfileId;

#[async_trait]
impl IdentityStrategy for HeaderProfileId {
    fn name(&self) -> &'static str {
        "header_profile_id"
    }

    async fn resolve(
        &self,
        headers: &HeaderMap,
        store: &dyn PaymentStore,
    ) -> Result<Resolution, PaymentError> {
        let Some(raw) = header(headers, PROFILE_ID_HEADER) else {
            return Ok(Resolution::Next);
        };
        let Ok(id) = Uuid::parse_str(raw) else {
            return Ok(Resolution::Next);
        };
        Ok(match store.get_profile(id).await? {
            Some(profile) => Resolution::Resolved(profile.id),
            None => Resolution::Next,
        })
    }
}

pub struct BearerSession;

#[async_trait]
impl IdentityStrategy for BearerSession {
    fn name(&self) -> &'static str {
        "bearer_session"
    }

    async fn resolve(
        &self,
        headers: &HeaderMap,
        store: &dyn PaymentStore,
    ) -> Result<Resolution, PaymentError> {
        let Some(session) = header(headers, AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
        else {
            return Ok(Resolution::Next);
        };
        Ok(match store.find_profile_by_session(session).await? {
            Some(profile) => Resolution::Resolved(profile.id),
            None => Resolution::Next,
        })
    }
}

pub struct EmailHeader;

#[async_trait]
impl IdentityStrategy for EmailHeader {
    fn name(&self) -> &'static str {
        "email_header"
    }

    async fn resolve(
        &self,
        headers: &HeaderMap,
        store: &dyn PaymentStore,
    ) -> Result<Resolution, PaymentError> {
        let Some(email) = header(headers, USER_EMAIL_HEADER) else {
            return Ok(Resolution::Next);
        };
        Ok(match store.find_profile_by_email(email).await? {
            Some(profile) => Resolution::Resolved(profile.id),
            None => Resolution::Next,
        })
    }
}

pub struct AutoCreateProfile;

#[async_trait]
impl IdentityStrategy for AutoCreateProfile {
    fn name(&self) -> &'static str {
        "auto_create_profile"
    }

    async fn resolve(
        &self,
        headers: &HeaderMap,
        store: &dyn PaymentStore,
    ) -> Result<Resolution, PaymentError> {
        let Some(email) = header(headers, USER_EMAIL_HEADER).filter(|e| e.contains('@')) else {
            return Ok(Resolution::Next);
        };
        if let Some(existing) = store.find_profile_by_email(email).await? {
            return Ok(Resolution::Resolved(existing.id));
        }
        let profile = Profile::new(email);
        store.insert_profile(&profile).await?;
        info!(profile_id = %profile.id, "Profile auto-created for billing");
        Ok(Resolution::Resolved(profile.id))
    }
}

pub struct IdentityResolver {
    strategies: Vec<Box<dyn IdentityStrategy>>,
    store: Arc<dyn PaymentStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn PaymentStore>, strategies: Vec<Box<dyn IdentityStrategy>>) -> Self {
        Self { strategies, store }
    }

    /// Standard precedence list
    pub fn from_config(config: &IdentityConfig, store: Arc<dyn PaymentStore>) -> Self {
        let mut strategies: Vec<Box<dyn IdentityStrategy>> = vec![
            Box::new(HeaderProfileId),
            Box::new(BearerSession),
            Box::new(EmailHeader),
        ];
        if config.auto_create_profiles {
            strategies.push(Box::new(AutoCreateProfile));
        }
        Self::new(store, strategies)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Uuid, PaymentError> {
        for strategy in &self.strategies {
            if let Resolution::Resolved(id) =
                strategy.resolve(headers, self.store.as_ref()).await?
            {
                debug!(profile_id = %id, strategy = strategy.name(), "Identity resolved");
                return Ok(id);
            }
        }
        Err(PaymentError::Unauthorized)
    }
}
