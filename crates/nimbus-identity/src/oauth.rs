//! Token endpoint plumbing shared by the OAuth2 credentials.

use chrono::{DateTime, TimeZone, Utc};
use nimbus_core::{AccessToken, Context, CredentialError, Pipeline, Request, Response, Url};
use serde::{Deserialize, Deserializer};
use tracing::debug;

/// Successful token endpoint response.
///
/// Managed identity endpoints send the numeric fields as strings.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default, deserialize_with = "number_or_string")]
    pub expires_in: Option<i64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub expires_on: Option<i64>,
}

impl TokenResponse {
    /// Absolute expiry, preferring `expires_on` when present.
    pub fn into_access_token(self, credential: &str) -> Result<AccessToken, CredentialError> {
        let expires_on = match (self.expires_on, self.expires_in) {
            (Some(on), _) => Utc.timestamp_opt(on, 0).single(),
            (None, Some(secs)) => Some(Utc::now() + chrono::Duration::seconds(secs)),
            (None, None) => None,
        }
        .ok_or_else(|| {
            CredentialError::unavailable(credential, "token response carries no usable expiry")
        })?;
        Ok(AccessToken::new(self.access_token, expires_on))
    }
}

/// OAuth2 error body.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ErrorResponse {
    fn summary(&self, status: u16) -> String {
        let description = self
            .error_description
            .as_deref()
            .and_then(|d| d.lines().next())
            .unwrap_or_default();
        match (&self.error, description.is_empty()) {
            (Some(code), false) => format!("{code}: {description}"),
            (Some(code), true) => code.clone(),
            (None, false) => description.to_string(),
            (None, true) => format!("token endpoint returned HTTP {status}"),
        }
    }
}

fn number_or_string<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Tenant ids are GUIDs or domain names.
pub(crate) fn validate_tenant_id(credential: &str, tenant: &str) -> Result<(), CredentialError> {
    let valid = !tenant.is_empty()
        && tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(CredentialError::unavailable(
            credential,
            format!("invalid tenant id {tenant:?}; expected a GUID or domain name"),
        ))
    }
}

/// The tenant for a request: the caller's hint, else the configured one.
pub(crate) fn resolve_tenant<'a>(
    credential: &str,
    configured: &'a str,
    requested: Option<&'a str>,
) -> Result<&'a str, CredentialError> {
    let tenant = requested.unwrap_or(configured);
    validate_tenant_id(credential, tenant)?;
    Ok(tenant)
}

/// `{authority}/{tenant}/oauth2/v2.0/token`
pub(crate) fn token_endpoint(
    credential: &str,
    authority: &str,
    tenant: &str,
) -> Result<Url, CredentialError> {
    let raw = format!("{}/{}/oauth2/v2.0/token", authority.trim_end_matches('/'), tenant);
    Url::parse(&raw).map_err(|e| {
        CredentialError::unavailable(credential, format!("invalid authority host {authority:?}: {e}"))
    })
}

/// Turn a single-scope request into the v1 `resource` form.
pub(crate) fn scopes_to_resource(
    credential: &str,
    scopes: &[String],
) -> Result<String, CredentialError> {
    match scopes {
        [scope] => Ok(scope
            .trim()
            .trim_end_matches("/.default")
            .to_string()),
        _ => Err(CredentialError::unavailable(
            credential,
            format!("exactly one scope is supported, got {}", scopes.len()),
        )),
    }
}

/// Reject a resource that could be re-parsed by a shell when passed to a
/// developer tool. Only URL-ish characters are allowed.
pub(crate) fn validate_resource(credential: &str, resource: &str) -> Result<(), CredentialError> {
    let valid = !resource.is_empty()
        && resource
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ":/.-_".contains(c));
    if valid {
        Ok(())
    } else {
        Err(CredentialError::unavailable(
            credential,
            format!("resource {resource:?} contains characters not allowed in a scope"),
        ))
    }
}

/// POST a client-credentials style form and map the reply.
pub(crate) async fn request_token(
    ctx: &Context,
    pipeline: &Pipeline,
    credential: &str,
    url: Url,
    form: &[(&str, &str)],
) -> Result<AccessToken, CredentialError> {
    debug!(credential, endpoint = %url.path(), "requesting token");
    let mut request = Request::post(url).with_form(form);
    let response = pipeline
        .send(ctx, &mut request)
        .await
        .map_err(|e| CredentialError::from_pipeline(credential, e))?;
    parse_token_response(credential, &response)
}

/// Map a token endpoint reply: 200 parses, 400/401/403 are a rejection,
/// anything else means the endpoint could not serve us.
pub(crate) fn parse_token_response(
    credential: &str,
    response: &Response,
) -> Result<AccessToken, CredentialError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        let parsed: TokenResponse = response.json().map_err(|e| {
            CredentialError::unavailable(credential, format!("malformed token response: {e}"))
        })?;
        return parsed.into_access_token(credential);
    }

    let body: ErrorResponse = response.json().unwrap_or_default();
    let message = body.summary(status);
    match status {
        400 | 401 | 403 => Err(CredentialError::denied(credential, message)),
        _ => Err(CredentialError::unavailable(credential, message)),
    }
}

/// Expiry timestamps from developer tools, local time or RFC 3339.
pub(crate) fn parse_tool_expiry(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = value.parse::<i64>() {
        return Utc.timestamp_opt(ts, 0).single();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .and_then(|naive| naive.and_local_timezone(chrono::Local).single())
        .map(|local| local.with_timezone(&Utc))
}
