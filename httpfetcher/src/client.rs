use crate::error::{FetchError, Result};
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;
use syncstore::models::FieldPath;
use url::Url;

/// One outbound GET against an integration endpoint.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub endpoint: &'a str,
    pub headers: HeaderMap,
    pub timeout: Duration,
    pub query: Vec<(String, String)>,
    pub response_root: Option<&'a FieldPath>,
}

impl<'a> FetchRequest<'a> {
    pub fn new(endpoint: &'a str, headers: HeaderMap, timeout: Duration) -> Self {
        Self {
            endpoint,
            headers,
            timeout,
            query: Vec::new(),
            response_root: None,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_response_root(mut self, root: Option<&'a FieldPath>) -> Self {
        self.response_root = root;
        self
    }
}

/// HTTP client that pulls raw records from external endpoints.
#[derive(Clone, Debug, Default)]
pub struct FetchClient {
    http_client: Client,
}

impl FetchClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http_client: Client) -> Self {
        Self { http_client }
    }

    /// Fetches and decodes the raw records behind `request.endpoint`.
    ///
    /// Sending the request and reading the body share a single deadline of
    /// `request.timeout`; when it elapses the in-flight request is dropped
    /// and a timeout [`FetchError::Network`] is returned.
    pub async fn fetch(&self, request: &FetchRequest<'_>) -> Result<Vec<Value>> {
        let mut url = Url::parse(request.endpoint).map_err(|err| FetchError::InvalidEndpoint {
            endpoint: request.endpoint.to_string(),
            reason: err.to_string(),
        })?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }

        log::debug!("GET {} (timeout {:?})", url, request.timeout);

        let exchange = async {
            let response = self
                .http_client
                .get(url.clone())
                .headers(request.headers.clone())
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Http { status, body });
            }

            let bytes = response.bytes().await?;
            Ok::<_, FetchError>(bytes)
        };

        let bytes = tokio::time::timeout(request.timeout, exchange)
            .await
            .map_err(|_| FetchError::timeout())??;

        let body: Value = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|err| FetchError::Decode(err.to_string()))?
        };

        let records = extract_records(body, request.response_root)?;
        log::info!("Fetched {} records from {}", records.len(), url);
        Ok(records)
    }
}

/// Turns a decoded body into a record list: arrays yield their elements,
/// `null` yields nothing and any other value is a single record.
pub fn extract_records(body: Value, root: Option<&FieldPath>) -> Result<Vec<Value>> {
    let body = match root {
        Some(path) => path.resolve(&body).cloned().ok_or_else(|| {
            FetchError::Decode(format!("response has no field at '{}'", path.as_str()))
        })?,
        None => body,
    };

    Ok(match body {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

/// Flattens request filters into query parameters. Arrays are comma-joined;
/// nested objects and nulls have no query form and are dropped.
pub fn query_from_filters(filters: &Map<String, Value>) -> Vec<(String, String)> {
    let mut query = Vec::with_capacity(filters.len());
    for (key, value) in filters {
        match value {
            Value::Object(_) => {
                log::warn!("Ignoring filter '{key}': nested objects cannot be sent as query parameters");
            }
            Value::Null => {}
            Value::Array(items) => {
                let joined = items
                    .iter()
                    .filter_map(scalar_text)
                    .collect::<Vec<_>>()
                    .join(",");
                query.push((key.clone(), joined));
            }
            scalar => {
                if let Some(text) = scalar_text(scalar) {
                    query.push((key.clone(), text));
                }
            }
        }
    }
    query
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
