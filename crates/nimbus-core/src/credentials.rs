//! Token credential capability and the values it produces.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::context::Context;
use crate::error::CredentialError;

/// A bearer token and its absolute expiry.
///
/// The token is a [`SecretString`]; `Debug` output never contains it.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_on,
        }
    }

    /// Token valid for `lifetime` from now.
    pub fn expiring_in(token: impl Into<String>, lifetime: Duration) -> Self {
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::zero());
        Self::new(token, Utc::now() + lifetime)
    }

    /// Remaining lifetime; zero once expired.
    pub fn remaining(&self) -> Duration {
        (self.expires_on - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_on <= Utc::now()
    }

    /// Whether the token must be refreshed given a pre-expiry `skew`.
    pub fn needs_refresh(&self, skew: Duration) -> bool {
        self.remaining() <= skew
    }
}

impl PartialEq for AccessToken {
    fn eq(&self, other: &Self) -> bool {
        self.expires_on == other.expires_on
            && self.token.expose_secret() == other.token.expose_secret()
    }
}

impl Eq for AccessToken {}

/// Parameters of a token request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRequestOptions {
    pub scopes: Vec<String>,
    pub tenant_id: Option<String>,
}

impl TokenRequestOptions {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
            tenant_id: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Order-independent cache identity.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            scopes: self.scopes.iter().map(|s| s.trim().to_string()).collect(),
            tenant_id: self.tenant_id.clone(),
        }
    }
}

/// Normalized scope set plus tenant hint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    scopes: BTreeSet<String>,
    tenant_id: Option<String>,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        write!(f, "[{}]", scopes.join(" "))?;
        if let Some(tenant) = &self.tenant_id {
            write!(f, "@{tenant}")?;
        }
        Ok(())
    }
}

/// Result of probing a credential against the current host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unsupported(String),
}

/// Produces access tokens for a scope set.
#[async_trait]
pub trait TokenCredential: Send + Sync + fmt::Debug {
    /// Human-readable variant name used in errors and logs.
    fn name(&self) -> &str;

    /// Cheap, I/O-free host capability check.
    fn availability(&self) -> Availability {
        Availability::Available
    }

    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError>;
}

/// Early return used by host-limited variants.
pub fn ensure_supported(credential: &dyn TokenCredential) -> Result<(), CredentialError> {
    match credential.availability() {
        Availability::Available => Ok(()),
        Availability::Unsupported(reason) => {
            Err(CredentialError::unsupported(credential.name(), reason))
        }
    }
}
