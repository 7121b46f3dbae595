//! JSON-RPC transport to RenVM nodes
//!
//! [`Provider`] is the seam the rest of the crate talks through: one logical call,
//! with retries and a per-attempt timeout. [`JsonRpcProvider`] implements it over HTTP,
//! [`FallbackProvider`] chains several providers, and the `testing` module ships an
//! in-process implementation.
//!
//! ## Usage
//!
//! ```ignore
//! let provider = JsonRpcProvider::new("https://rpc.renproject.io")?;
//! let config = provider.send_message("ren_queryConfig", json!({}), 2, Duration::from_secs(120)).await?;
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{RenVmError, Result};

use super::retry::{RetryConfig, RetryContext, DEFAULT_RETRY_DELAY};

pub const JSONRPC_VERSION: &str = "2.0";

/// Request envelope
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub id: u64,
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(method: &'a str, params: &'a Value) -> Self {
        Self {
            id: 1,
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// One logical RPC call against a RenVM endpoint
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send `method` with `params`, retrying transport failures up to `retries`
    /// times with each attempt bounded by `timeout`. Returns the `result` field.
    async fn send_message(
        &self,
        method: &str,
        params: Value,
        retries: u32,
        timeout: Duration,
    ) -> Result<Value>;

    /// Human-readable endpoint name for logs
    fn endpoint(&self) -> String;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for Arc<P> {
    async fn send_message(
        &self,
        method: &str,
        params: Value,
        retries: u32,
        timeout: Duration,
    ) -> Result<Value> {
        (**self).send_message(method, params, retries, timeout).await
    }

    fn endpoint(&self) -> String {
        (**self).endpoint()
    }
}

/// Map a response `error` object to a typed error
pub fn map_rpc_error(method: &str, params: &Value, error: &Value) -> RenVmError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());

    let trimmed = message.trim();
    if trimmed.to_lowercase().ends_with("not found") {
        let hash = params
            .get("txHash")
            .and_then(Value::as_str)
            .unwrap_or(trimmed)
            .to_string();
        return RenVmError::TransactionNotFound { hash };
    }
    if let Some(rest) = trimmed.strip_prefix("invalid params:") {
        return RenVmError::InvalidParams {
            method: method.to_string(),
            message: rest.trim().to_string(),
        };
    }
    RenVmError::Rpc {
        method: method.to_string(),
        code,
        message,
    }
}

// ============================================================================
// HTTP provider
// ============================================================================

/// JSON-RPC over HTTP POST
#[derive(Debug, Clone)]
pub struct JsonRpcProvider {
    url: String,
    client: Client,
    retry_delay: Duration,
}

impl JsonRpcProvider {
    /// Create a provider for `url`
    pub fn new(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| RenVmError::Config(format!("invalid RPC URL {}: {}", url, e)))?;
        let client = Client::builder()
            .build()
            .map_err(|e| RenVmError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            url: parsed.to_string(),
            client,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Override the fixed delay between attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One HTTP attempt. `Ok(Err(_))` is a terminal RPC error, `Err(_)` a
    /// retryable transport failure.
    async fn attempt(
        &self,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> std::result::Result<Result<Value>, String> {
        let request = JsonRpcRequest::new(method, params);
        let response = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("request timed out after {:?}", timeout)
                } else {
                    format!("connection error: {}", e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("malformed response: {}", e))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Ok(Err(map_rpc_error(method, params, error)));
        }

        match body.get("result") {
            Some(result) if !result.is_null() => Ok(Ok(result.clone())),
            _ => Err("empty result".to_string()),
        }
    }
}

#[async_trait]
impl Provider for JsonRpcProvider {
    async fn send_message(
        &self,
        method: &str,
        params: Value,
        retries: u32,
        timeout: Duration,
    ) -> Result<Value> {
        let config = RetryConfig::new(retries, timeout).with_delay(self.retry_delay);
        let mut ctx = RetryContext::with_config(config);

        loop {
            debug!(url = %self.url, method = %method, attempt = ctx.attempt + 1, "Sending RPC request");
            match self.attempt(method, &params, timeout).await {
                Ok(outcome) => return outcome,
                Err(reason) => {
                    ctx.record_failure(reason);
                    match ctx.next_delay(method) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            return Err(RenVmError::Transport {
                                method: method.to_string(),
                                attempts: ctx.attempt,
                                reason: ctx.last_error.unwrap_or_default(),
                            })
                        }
                    }
                }
            }
        }
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

// ============================================================================
// Fallback chain
// ============================================================================

/// Tries each provider in order, moving on only after transport failures
#[derive(Clone)]
pub struct FallbackProvider {
    providers: Vec<Arc<dyn Provider>>,
}

impl FallbackProvider {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(RenVmError::Config(
                "at least one RPC provider is required".to_string(),
            ));
        }
        Ok(Self { providers })
    }

    /// One HTTP provider per URL
    pub fn from_urls(urls: &[String]) -> Result<Self> {
        let providers = urls
            .iter()
            .map(|url| JsonRpcProvider::new(url).map(|p| Arc::new(p) as Arc<dyn Provider>))
            .collect::<Result<Vec<_>>>()?;
        Self::new(providers)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl Provider for FallbackProvider {
    async fn send_message(
        &self,
        method: &str,
        params: Value,
        retries: u32,
        timeout: Duration,
    ) -> Result<Value> {
        let mut last_error = None;
        for provider in &self.providers {
            match provider
                .send_message(method, params.clone(), retries, timeout)
                .await
            {
                Err(e @ RenVmError::Transport { .. }) => {
                    warn!(endpoint = %provider.endpoint(), method = %method, error = %e, "Provider failed, trying next");
                    last_error = Some(e);
                }
                other => return other,
            }
        }
        Err(last_error.unwrap_or_else(|| RenVmError::Transport {
            method: method.to_string(),
            attempts: 0,
            reason: "no providers".to_string(),
        }))
    }

    fn endpoint(&self) -> String {
        self.providers
            .iter()
            .map(|p| p.endpoint())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::fmt::Debug for FallbackProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackProvider")
            .field("endpoints", &self.endpoint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_envelope_shape() {
        let params = json!({"txHash": "abc"});
        let request = JsonRpcRequest::new("ren_queryTx", &params);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"id": 1, "jsonrpc": "2.0", "method": "ren_queryTx", "params": {"txHash": "abc"}})
        );
    }

    #[test]
    fn test_map_not_found() {
        let params = json!({"txHash": "abc"});
        let err = map_rpc_error(
            "ren_queryTx",
            &params,
            &json!({"code": -32603, "message": "tx abc not found"}),
        );
        assert!(matches!(err, RenVmError::TransactionNotFound { ref hash } if hash == "abc"));
    }

    #[test]
    fn test_map_invalid_params() {
        let err = map_rpc_error(
            "ren_submitTx",
            &json!({}),
            &json!({"code": -32602, "message": "invalid params: bad nonce"}),
        );
        match err {
            RenVmError::InvalidParams { method, message } => {
                assert_eq!(method, "ren_submitTx");
                assert_eq!(message, "bad nonce");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_map_other_is_rpc() {
        let err = map_rpc_error(
            "ren_queryTx",
            &json!({}),
            &json!({"code": -32000, "message": "invalid selector"}),
        );
        assert!(matches!(err, RenVmError::Rpc { code: -32000, .. }));
        assert!(!err.is_pending_query());
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(JsonRpcProvider::new("not a url").is_err());
    }

    struct Scripted {
        calls: AtomicU32,
        fail_with: Option<fn() -> RenVmError>,
    }

    #[async_trait]
    impl Provider for Scripted {
        async fn send_message(&self, method: &str, _: Value, _: u32, _: Duration) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(json!({"method": method})),
            }
        }

        fn endpoint(&self) -> String {
            "scripted".into()
        }
    }

    fn transport() -> RenVmError {
        RenVmError::Transport {
            method: "m".into(),
            attempts: 3,
            reason: "down".into(),
        }
    }

    fn rpc() -> RenVmError {
        RenVmError::Rpc {
            method: "m".into(),
            code: 1,
            message: "invalid selector".into(),
        }
    }

    #[tokio::test]
    async fn test_fallback_moves_past_transport_failures() {
        let down = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            fail_with: Some(transport),
        });
        let up = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            fail_with: None,
        });
        let fallback = FallbackProvider::new(vec![down.clone(), up.clone()]).unwrap();

        let result = fallback
            .send_message("ren_queryConfig", json!({}), 0, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result["method"], "ren_queryConfig");
        assert_eq!(down.calls.load(Ordering::SeqCst), 1);
        assert_eq!(up.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_returns_rpc_errors_immediately() {
        let failing = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            fail_with: Some(rpc),
        });
        let never = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            fail_with: None,
        });
        let fallback = FallbackProvider::new(vec![failing, never.clone()]).unwrap();

        let err = fallback
            .send_message("ren_queryTx", json!({}), 0, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RenVmError::Rpc { .. }));
        assert_eq!(never.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fallback_requires_providers() {
        assert!(FallbackProvider::new(Vec::new()).is_err());
    }
}
