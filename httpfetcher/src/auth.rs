//! Request header construction for the supported auth methods.

use crate::error::{FetchError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use syncstore::models::{AuthConfig, AuthMethod};

pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Headers every request carries regardless of auth method.
pub fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Builds headers for `auth`, degrading to [`base_headers`] when the
/// credentials for the declared method are missing or unusable.
pub fn build_headers(auth: &AuthConfig) -> HeaderMap {
    match try_build_headers(auth) {
        Ok(headers) => headers,
        Err(err) => {
            log::warn!(
                "Auth method '{}' not applied, sending unauthenticated request: {}",
                auth.method.as_str(),
                err
            );
            base_headers()
        }
    }
}

/// Strict variant of [`build_headers`].
pub fn try_build_headers(auth: &AuthConfig) -> Result<HeaderMap> {
    let mut headers = base_headers();
    let creds = &auth.credentials;

    match auth.method {
        AuthMethod::None => {}
        AuthMethod::Bearer => {
            let token = required(creds.token.as_deref(), "bearer", "token")?;
            headers.insert(AUTHORIZATION, header_value("Authorization", &format!("Bearer {token}"))?);
        }
        AuthMethod::ApiKey => {
            let key = required(creds.api_key.as_deref(), "api_key", "api_key")?;
            let name = creds
                .api_key_header
                .as_deref()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(DEFAULT_API_KEY_HEADER);
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::InvalidHeader(name.to_string()))?;
            let value = header_value(name.as_str(), key)?;
            headers.insert(name, value);
        }
        AuthMethod::Basic => {
            let username = required(creds.username.as_deref(), "basic", "username")?;
            let password = required(creds.password.as_deref(), "basic", "password")?;
            let encoded = STANDARD.encode(format!("{username}:{password}"));
            headers.insert(AUTHORIZATION, header_value("Authorization", &format!("Basic {encoded}"))?);
        }
    }

    Ok(headers)
}

fn required<'a>(value: Option<&'a str>, method: &'static str, field: &'static str) -> Result<&'a str> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(FetchError::MissingCredentials { method, field }),
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    let mut value =
        HeaderValue::from_str(value).map_err(|_| FetchError::InvalidHeader(name.to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}
