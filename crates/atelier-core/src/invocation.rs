//! Model invocation
//!
//! The seam between plan execution and a language-model provider. Skill
//! steps route through a [`ModelInvoker`] when one is configured;
//! provider rejections are surfaced distinctly from transport trouble
//! so the controller can fall back to direct skill execution instead of
//! retrying a request the provider will keep rejecting.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tool definition offered to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name
    pub name: String,
    /// What the tool does
    pub description: String,
    /// JSON schema of the tool's arguments
    pub schema: Value,
}

/// One model request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Model identifier
    pub model: String,
    /// System prompt
    pub system: String,
    /// User content
    pub user: Value,
    /// Tool the model is expected to call, when structured output is wanted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolSpec>,
}

/// One model response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModelResponse {
    /// The model called the offered tool
    ToolCall {
        /// Tool name
        name: String,
        /// Structured arguments
        arguments: Value,
    },
    /// Plain text output
    Text(String),
}

/// Invocation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvocationError {
    /// The provider rejected the request
    #[error("provider rejected request with status {status}: {message}")]
    Provider {
        /// HTTP-style status code
        status: u16,
        /// Provider message
        message: String,
    },

    /// The request never reached the provider
    #[error("transport failure: {0}")]
    Transport(String),

    /// The request timed out
    #[error("invocation timed out")]
    Timeout,

    /// The run was cancelled mid-invocation
    #[error("invocation cancelled")]
    Cancelled,
}

impl InvocationError {
    /// Whether this is a client-side provider rejection (4xx)
    ///
    /// These are not retried: the same request would keep failing. The
    /// controller falls back to direct skill execution instead.
    #[inline]
    #[must_use]
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Self::Provider { status, .. } if (400..500).contains(status))
    }
}

/// Retry configuration for transient invocation failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Linear backoff step between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Model invocation settings for a run
#[derive(Debug, Clone)]
pub struct InvocationSettings {
    /// Model identifier to invoke
    pub model: String,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
}

impl InvocationSettings {
    /// Settings with the default retry policy
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// With an explicit retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Language-model provider capability
#[async_trait::async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Send one request to the provider
    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, InvocationError>;
}

/// Invoke with linear-backoff retry for transient failures
///
/// Provider rejections return immediately without retry. Transport and
/// timeout failures are retried up to the policy's attempt budget.
/// Cancellation wins over an in-flight attempt.
pub async fn invoke_with_retry(
    invoker: &Arc<dyn ModelInvoker>,
    request: &ModelRequest,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<ModelResponse, InvocationError> {
    let attempts = policy.max_attempts.max(1);
    let mut last = InvocationError::Transport("no attempts made".to_string());

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(InvocationError::Cancelled);
        }

        let outcome = tokio::select! {
            () = cancel.cancelled() => return Err(InvocationError::Cancelled),
            result = invoker.invoke(request.clone()) => result,
        };

        match outcome {
            Ok(response) => return Ok(response),
            Err(err) if err.is_provider_failure() => return Err(err),
            Err(err) => {
                tracing::debug!(attempt, error = %err, "invocation attempt failed");
                last = err;
            }
        }

        if attempt < attempts {
            tokio::select! {
                () = cancel.cancelled() => return Err(InvocationError::Cancelled),
                () = tokio::time::sleep(policy.backoff * attempt) => {}
            }
        }
    }

    Err(last)
}
