/*!
Outbound HTTP to the provider.

`Transport` is the only thing that touches the network. `execute` layers
status handling, retries with exponential backoff on 429/5xx, and json
decoding on top of it.
*/
use std::time::Duration;

use crate::{Error, Result, LOG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub authorization: Option<String>,
    pub form: Option<Vec<(String, String)>>,
    pub json: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            authorization: None,
            form: None,
            json: None,
        }
    }

    pub fn post_form(url: impl Into<String>, form: &[(&str, &str)]) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            authorization: None,
            form: Some(
                form.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            json: None,
        }
    }

    pub fn post_json(url: impl Into<String>, json: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            authorization: None,
            form: None,
            json: Some(json),
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.authorization = Some(format!("Bearer {}", token));
        self
    }

    pub fn basic(mut self, client_id: &str, client_secret: &str) -> Self {
        let auth = base64::encode(format!("{}:{}", client_id, client_secret).as_bytes());
        self.authorization = Some(format!("Basic {}", auth));
        self
    }

    /// The url without its query string, for logging
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_retryable(&self) -> bool {
        self.status == 429 || self.status >= 500
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: &HttpRequest) -> Result<HttpResponse>;
}

/// `Transport` backed by `surf` with a per-request timeout
pub struct SurfTransport {
    timeout: Duration,
}

impl SurfTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl Transport for SurfTransport {
    async fn send(&self, req: &HttpRequest) -> Result<HttpResponse> {
        let url = surf::Url::parse(&req.url)
            .map_err(|e| Error::Http(format!("invalid url {} {}", req.path(), e)))?;
        let method = match req.method {
            Method::Get => surf::http::Method::Get,
            Method::Post => surf::http::Method::Post,
        };
        let mut builder = surf::RequestBuilder::new(method, url);
        if let Some(auth) = &req.authorization {
            builder = builder.header("authorization", auth.as_str());
        }
        if let Some(form) = &req.form {
            let body = surf::Body::from_form(form)
                .map_err(|e| Error::Http(format!("form error {}", e)))?;
            builder = builder.body(body);
        }
        if let Some(json) = &req.json {
            let body = surf::Body::from_json(json)
                .map_err(|e| Error::Http(format!("json body error {}", e)))?;
            builder = builder.body(body);
        }
        let fut = async {
            let mut resp = builder
                .send()
                .await
                .map_err(|e| Error::Http(format!("request error {}", e)))?;
            let status = resp.status() as u16;
            let body = resp
                .body_string()
                .await
                .map_err(|e| Error::Http(format!("body read error {}", e)))?;
            Ok::<_, Error>(HttpResponse { status, body })
        };
        async_std::future::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::Http(format!("timed out after {:?}", self.timeout)))?
    }
}

/// Longest sleep between two attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .checked_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

/// Send `req`, retrying 429/5xx answers. Any non-2xx answer left after
/// the last attempt is returned as `Error::Upstream`.
pub async fn execute(
    transport: &dyn Transport,
    policy: RetryPolicy,
    req: &HttpRequest,
) -> Result<HttpResponse> {
    let mut attempt = 1;
    loop {
        let resp = transport.send(req).await?;
        if resp.is_success() {
            return Ok(resp);
        }
        if resp.is_retryable() && attempt < policy.max_attempts {
            let delay = policy.delay(attempt);
            slog::warn!(
                LOG, "retrying upstream request";
                "path" => req.path(),
                "status" => resp.status,
                "attempt" => attempt,
                "delay_ms" => delay.as_millis() as u64,
            );
            async_std::task::sleep(delay).await;
            attempt += 1;
            continue;
        }
        slog::error!(
            LOG, "upstream request failed";
            "path" => req.path(),
            "status" => resp.status,
            "attempts" => attempt,
        );
        return Err(Error::Upstream {
            status: resp.status,
            body: resp.body,
        });
    }
}

/// `execute` and decode the body as json
pub async fn execute_json<T: serde::de::DeserializeOwned>(
    transport: &dyn Transport,
    policy: RetryPolicy,
    req: &HttpRequest,
) -> Result<T> {
    let resp = execute(transport, policy, req).await?;
    Ok(serde_json::from_str(&resp.body)?)
}
