//! User-Agent composition.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, USER_AGENT};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::policy::{next_send, Policy};

/// User agent of this crate, used when callers do not name a product.
pub const CORE_USER_AGENT: &str = concat!("nimbus-core/", env!("CARGO_PKG_VERSION"));

/// Sets `User-Agent: [prefix ]<product>/<version>[ <name>/<version>...][ (os; arch)]`.
///
/// The value is computed once at construction; component tokens are
/// emitted in lexical order of their names.
#[derive(Debug, Clone)]
pub struct UserAgentPolicy {
    value: HeaderValue,
}

impl UserAgentPolicy {
    pub fn builder(product: impl Into<String>, version: impl Into<String>) -> UserAgentBuilder {
        UserAgentBuilder {
            product: product.into(),
            version: version.into(),
            components: BTreeMap::new(),
            prefix: None,
            runtime: false,
        }
    }

    pub fn value(&self) -> &str {
        self.value.to_str().unwrap_or_default()
    }
}

impl Default for UserAgentPolicy {
    fn default() -> Self {
        Self {
            value: HeaderValue::from_static(CORE_USER_AGENT),
        }
    }
}

/// Builder for [`UserAgentPolicy`].
#[derive(Debug, Clone)]
pub struct UserAgentBuilder {
    product: String,
    version: String,
    components: BTreeMap<String, String>,
    prefix: Option<String>,
    runtime: bool,
}

impl UserAgentBuilder {
    pub fn component(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.components.insert(name.into(), version.into());
        self
    }

    /// Caller-supplied prefix, prepended verbatim.
    pub fn prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    /// Append `(os; arch)` of the running host.
    pub fn runtime_tokens(mut self, enabled: bool) -> Self {
        self.runtime = enabled;
        self
    }

    pub fn render(&self) -> String {
        let mut tokens = Vec::with_capacity(self.components.len() + 3);
        if let Some(prefix) = &self.prefix {
            tokens.push(prefix.clone());
        }
        tokens.push(format!("{}/{}", self.product, self.version));
        tokens.extend(
            self.components
                .iter()
                .map(|(name, version)| format!("{name}/{version}")),
        );
        if self.runtime {
            tokens.push(format!(
                "({}; {})",
                std::env::consts::OS,
                std::env::consts::ARCH
            ));
        }
        tokens.join(" ")
    }

    pub fn build(self) -> Result<UserAgentPolicy> {
        let rendered = self.render();
        let value = HeaderValue::from_str(&rendered).map_err(|e| Error::Config {
            message: format!("invalid user agent {rendered:?}: {e}"),
        })?;
        Ok(UserAgentPolicy { value })
    }
}

#[async_trait]
impl Policy for UserAgentPolicy {
    fn name(&self) -> &str {
        "user-agent"
    }

    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: &[Arc<dyn Policy>],
    ) -> Result<Response> {
        request.insert_header(USER_AGENT, self.value.clone());
        next_send(ctx, request, next).await
    }
}
