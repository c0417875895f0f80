//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest` with optional retry
//! middleware, bearer authentication and JSON request/response handling.
//! Non-2xx responses are surfaced with the backend's `detail` message when
//! one is present.

use reqwest::{
    header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE},
    Method, Url,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{
    de::{DeserializeOwned, IgnoredAny},
    Serialize,
};
use serde_json::Value;
use thiserror::Error;

/// Retries used by `ApiClient::new`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid base URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("network error: {0}")]
    Transport(#[from] reqwest_middleware::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-2xx response. `message` is the backend's `detail` or a fallback.
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    /// Rejected locally before any request was sent.
    #[error("{0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("start response did not include an attempt id")]
    MissingAttemptId,
}

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized response body on success.
    pub data: Option<T>,
    /// The raw body returned by the server if the request failed.
    pub error_body: Option<String>,
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    pub headers: HeaderMap,
}

impl<T> ApiResponse<T> {
    /// The `detail` field of a failed response body, if any.
    pub fn detail(&self) -> Option<String> {
        self.error_body.as_deref().and_then(extract_detail)
    }

    /// Converts to `Ok(data)` on success, otherwise `ApiError::Status` carrying
    /// the server's `detail` or `fallback`.
    pub fn into_result(self, fallback: &str) -> Result<T, ApiError> {
        let message = self.detail().unwrap_or_else(|| fallback.to_string());
        match self.data {
            Some(data) if self.success => Ok(data),
            _ => Err(ApiError::Status {
                status: self.status,
                message,
            }),
        }
    }
}

/// Pulls `detail` out of a JSON error body. Strings are returned verbatim,
/// other JSON values in their compact serialized form.
pub fn extract_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// A flexible asynchronous HTTP client bound to one backend.
#[derive(Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    /// Always ends in `/`; relative paths join beneath it.
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Client with the default retry policy.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, ApiError> {
        Self::with_retries(base_url, auth_token, DEFAULT_MAX_RETRIES)
    }

    /// Client retrying transient failures up to `max_retries` times with
    /// exponential backoff. `0` disables retries.
    pub fn with_retries(
        base_url: &str,
        auth_token: Option<String>,
        max_retries: u32,
    ) -> Result<Self, ApiError> {
        let mut url = Url::parse(base_url.trim()).map_err(|source| ApiError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let mut builder = ClientBuilder::new(reqwest::Client::new());
        if max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(Self {
            inner: builder.build(),
            base_url: url,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// Same client and base URL with a different bearer token.
    pub fn with_token(&self, auth_token: Option<String>) -> Self {
        Self {
            inner: self.inner.clone(),
            base_url: self.base_url.clone(),
            auth_token,
        }
    }

    /// Performs a request and captures the response.
    ///
    /// Transport and JSON errors are returned as `Err`; HTTP error statuses are
    /// returned as `Ok` with `success == false` and the raw body kept in
    /// `error_body`. An empty or non-JSON 2xx body (plain text, HTML)
    /// deserializes as JSON `null`; JSON of the wrong shape is still an error.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let full_url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|source| ApiError::InvalidUrl {
                url: path.to_string(),
                source,
            })?;
        let mut req = self.inner.request(method.clone(), full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        if let Some(b) = body {
            let json_body = serde_json::to_string(b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let text = response.text().await.map_err(reqwest_middleware::Error::from)?;

        log::debug!("{} {} -> {}", method, path, status.as_u16());

        if status.is_success() {
            let raw = if text.trim().is_empty() { "null" } else { text.as_str() };
            let data = match serde_json::from_str::<T>(raw) {
                Ok(data) => data,
                Err(e) if serde_json::from_str::<IgnoredAny>(raw).is_err() => {
                    log::debug!("{} {} returned a non-JSON body; reading it as null", method, path);
                    serde_json::from_str::<T>("null").map_err(|_| e)?
                }
                Err(e) => return Err(e.into()),
            };
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            Ok(ApiResponse {
                data: None,
                error_body: Some(text),
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }
}
