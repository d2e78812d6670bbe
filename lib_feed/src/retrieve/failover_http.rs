//! # Failover HTTP Client
//!
//! An asynchronous request/response client built on `reqwest` that spreads a
//! single call over several candidate base addresses. Every address serves
//! the same path namespace; the client joins `base + path_prefix + path`,
//! appends query parameters, and asks the [`EndpointHealthTracker`] which
//! address to try.
//!
//! ## Attempt policy:
//! - Up to `max_attempts` (3) tries, each against an address not yet tried in
//!   this call when one is left, each bounded by `attempt_timeout` (10s).
//! - Any HTTP response ends the call. Failover is about reachability, so a
//!   404 or 500 is returned to the caller and the address is marked healthy.
//! - A 429 is surfaced as [`FailoverError::RateLimited`] with the server's
//!   retry guidance. It is terminal for the call and never triggers failover.
//! - A network failure (timeout, refused connection, DNS) marks the address
//!   failed and, unless it was the last try, waits `attempt * backoff_unit`
//!   (1s, 2s, ...) before the next one.
//! - When every try failed, the last error is returned inside
//!   [`FailoverError::Exhausted`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;

use crate::configs::FailoverConfig;
use crate::error::FailoverError;
use crate::retrieve::endpoint_health::EndpointHealthTracker;

/// Fallback wait when a 429 carries no usable retry hint.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// A standardized container for API responses.
///
/// Wraps the deserialized data along with metadata about the HTTP
/// transaction and the address that answered.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw body returned by the server when the status was not 2xx.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
    /// Base address that produced this response.
    pub address: String,
}

/// Per-call request settings.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// HTTP verb.
    pub method: Method,
    /// Query parameters appended in order.
    pub query: Vec<(String, String)>,
    /// Extra headers for this call.
    pub headers: Option<HeaderMap>,
    /// JSON body, sent with `Content-Type: application/json`.
    pub body: Option<Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            query: Vec::new(),
            headers: None,
            body: None,
        }
    }
}

impl RequestOptions {
    /// A plain GET.
    pub fn get() -> Self {
        Self::default()
    }

    /// A POST carrying `body` as JSON.
    pub fn post<B: Serialize>(body: &B) -> Result<Self, FailoverError> {
        Ok(Self {
            method: Method::POST,
            body: Some(serde_json::to_value(body)?),
            ..Self::default()
        })
    }

    /// Appends one query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Replaces the extra headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Structured rate-limit metadata carried by a 429 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Seconds to wait before retrying.
    pub retry_after_secs: u64,
    /// Optional per-endpoint limit table as sent by the server.
    pub limits: Option<BTreeMap<String, Value>>,
    /// Human-readable message from the server, if any.
    pub message: Option<String>,
}

impl RateLimitInfo {
    /// Builds the metadata from a 429's headers and body. The `Retry-After`
    /// header wins over the body's `retry_after` / `retryAfter` fields.
    pub fn from_response(headers: &HeaderMap, body: &[u8]) -> Self {
        let json: Option<Value> = serde_json::from_slice(body).ok();

        let header_secs = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let body_secs = json.as_ref().and_then(|j| {
            j.get("retry_after")
                .or_else(|| j.get("retryAfter"))
                .and_then(Value::as_u64)
        });

        let limits = json
            .as_ref()
            .and_then(|j| j.get("limits"))
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect());

        let message = json.as_ref().and_then(|j| {
            j.get("message")
                .or_else(|| j.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        Self {
            retry_after_secs: header_secs.or(body_secs).unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            limits,
            message,
        }
    }
}

/// Status, headers and body of one answered attempt.
struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Multi-endpoint HTTP client.
///
/// Cheap to share behind an `Arc`; concurrent calls report to the same
/// tracker in completion order.
pub struct FailoverClient {
    /// The underlying HTTP client, reused across attempts for pooling.
    inner: reqwest::Client,
    /// Injected endpoint table.
    tracker: Arc<EndpointHealthTracker>,
    path_prefix: String,
    max_attempts: u32,
    attempt_timeout: Duration,
    backoff_unit: Duration,
}

impl FailoverClient {
    /// Creates a client with its own tracker over `config.base_urls`.
    ///
    /// # Errors
    /// Returns [`FailoverError::NoEndpoints`] for an empty address list,
    /// [`FailoverError::Config`] for a config [`FailoverConfig::validate`]
    /// rejects, or a network error if the HTTP client cannot be built.
    pub fn new(config: &FailoverConfig) -> Result<Self, FailoverError> {
        let tracker = Arc::new(EndpointHealthTracker::from_config(config));
        Self::with_tracker(config, tracker)
    }

    /// Creates a client that reports to an existing tracker.
    ///
    /// # Errors
    /// Same as [`FailoverClient::new`].
    pub fn with_tracker(config: &FailoverConfig, tracker: Arc<EndpointHealthTracker>) -> Result<Self, FailoverError> {
        config.validate()?;

        let inner = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|source| FailoverError::Network {
                address: String::new(),
                source,
            })?;

        Ok(Self {
            inner,
            tracker,
            path_prefix: config.path_prefix.clone(),
            max_attempts: config.max_attempts,
            attempt_timeout: config.attempt_timeout(),
            backoff_unit: config.retry_backoff_unit(),
        })
    }

    /// The tracker this client reports to.
    pub fn tracker(&self) -> &Arc<EndpointHealthTracker> {
        &self.tracker
    }

    /// Performs one call with failover across the configured addresses.
    ///
    /// # Errors
    /// - [`FailoverError::RateLimited`] on a 429.
    /// - [`FailoverError::Exhausted`] when every attempt hit a network failure.
    /// - [`FailoverError::Serialization`] when a 2xx body does not decode into `T`.
    /// - [`FailoverError::InvalidUrl`] when the address and path do not form a URL.
    pub async fn execute<T>(&self, path: &str, options: RequestOptions) -> Result<ApiResponse<T>, FailoverError>
    where
        T: DeserializeOwned,
    {
        let mut tried: Vec<String> = Vec::with_capacity(self.max_attempts as usize);
        let mut last_error: Option<FailoverError> = None;

        for attempt in 1..=self.max_attempts {
            let address = self
                .tracker
                .pick_address_excluding(&tried)
                .ok_or(FailoverError::NoEndpoints)?;
            tried.push(address.clone());

            let url = build_url(&address, &self.path_prefix, path, &options.query)?;
            log::debug!("Attempt {}/{}: {} {}", attempt, self.max_attempts, options.method, url);

            match self.send_once(url, &options).await {
                Ok(raw) => {
                    self.tracker.mark_success(&address);
                    return finish(address, raw);
                }
                Err(source) => {
                    self.tracker.mark_failure(&address);
                    log::warn!(
                        "Request to {} failed (attempt {}/{}): {}",
                        address,
                        attempt,
                        self.max_attempts,
                        source
                    );
                    last_error = Some(FailoverError::Network { address, source });

                    if attempt < self.max_attempts {
                        // Linear backoff: 1x, 2x, ... the unit.
                        sleep(self.backoff_unit * attempt).await;
                    }
                }
            }
        }

        match last_error {
            Some(last) => {
                log::error!("All {} attempts failed for {}", self.max_attempts, path);
                Err(FailoverError::Exhausted {
                    attempts: self.max_attempts,
                    last: Box::new(last),
                })
            }
            None => Err(FailoverError::NoEndpoints),
        }
    }

    /// GET `path` and decode the 2xx body as `T`.
    ///
    /// A non-2xx answer is returned as `Ok(None)`.
    ///
    /// # Errors
    /// Same as [`FailoverClient::execute`].
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<T>, FailoverError>
    where
        T: DeserializeOwned,
    {
        let options = query
            .iter()
            .fold(RequestOptions::get(), |opts, (k, v)| opts.query(*k, v));
        let response = self.execute::<T>(path, options).await?;
        if !response.success {
            log::warn!(
                "GET {} answered {} from {}",
                path,
                response.status,
                response.address
            );
        }
        Ok(response.data)
    }

    async fn send_once(&self, url: Url, options: &RequestOptions) -> Result<RawResponse, reqwest::Error> {
        let mut req = self
            .inner
            .request(options.method.clone(), url)
            .timeout(self.attempt_timeout);

        if let Some(h) = &options.headers {
            req = req.headers(h.clone());
        }

        if let Some(body) = &options.body {
            req = req.header(CONTENT_TYPE, "application/json").body(body.to_string());
        }

        let response = req.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse { status, headers, body })
    }
}

/// Converts an answered attempt into the caller-facing result.
fn finish<T>(address: String, raw: RawResponse) -> Result<ApiResponse<T>, FailoverError>
where
    T: DeserializeOwned,
{
    if raw.status == StatusCode::TOO_MANY_REQUESTS {
        let info = RateLimitInfo::from_response(&raw.headers, &raw.body);
        log::warn!("Rate limited by {}: retry after {}s", address, info.retry_after_secs);
        return Err(FailoverError::RateLimited(info));
    }

    let success = raw.status.is_success();
    let (data, error_body) = if success {
        if raw.body.is_empty() {
            (None, None)
        } else {
            (Some(serde_json::from_slice::<T>(&raw.body)?), None)
        }
    } else {
        (None, Some(String::from_utf8_lossy(&raw.body).into_owned()))
    };

    Ok(ApiResponse {
        data,
        error_body,
        status: raw.status.as_u16(),
        success,
        headers: raw.headers,
        address,
    })
}

/// Joins `base`, `prefix` and `path` with single slashes and appends `query`.
fn build_url(base: &str, prefix: &str, path: &str, query: &[(String, String)]) -> Result<Url, FailoverError> {
    let mut joined = base.trim_end_matches('/').to_string();
    for segment in [prefix, path] {
        let segment = segment.trim_matches('/');
        if !segment.is_empty() {
            joined.push('/');
            joined.push_str(segment);
        }
    }

    let mut url = Url::parse(&joined)?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}
