//! Exponential-backoff retry executor.
//!
//! [`RetryManager`] runs any fallible async operation (usually an LLM call),
//! retrying errors classified as transient with exponential backoff and
//! optional jitter. Waits between attempts are cancellable through a
//! [`CancellationToken`] carried in the [`RetryContext`].

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AgentError;

/// Upper bound for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 100;
/// Upper bound for `initial_delay` and `max_delay`, in milliseconds.
pub const MAX_DELAY_LIMIT_MS: u64 = 300_000;
/// Bounds for `backoff_factor`.
pub const BACKOFF_FACTOR_RANGE: (f64, f64) = (1.0, 10.0);

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
/// Jitter multiplies the delay by a factor in `[0.5, 1.5)`.
const JITTER_MIN: f64 = 0.5;
/// Exponents above this already saturate any delay at `max_delay`.
const MAX_EXPONENT: u32 = 64;

/// Error substrings treated as transient by default.
pub const DEFAULT_RETRYABLE_ERRORS: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "ENOTFOUND",
    "EAI_AGAIN",
    "socket hang up",
    "connection reset",
    "connection refused",
    "overloaded",
    "rate_limit",
    "rate limit",
    "too many requests",
    "429",
    "500",
    "502",
    "503",
    "504",
    "timeout",
    "timed out",
    "api_error",
];

/// HTTP statuses that are never retried (validation and auth failures).
const NON_RETRYABLE_STATUS: &[u16] = &[400, 401, 403, 404, 422];

/// Immutable retry policy.
///
/// All values are clamped into their documented bounds by the builder, so a
/// constructed `RetryOptions` always yields delays within `[0, max_delay]`.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    retryable_errors: Vec<String>,
    jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptionsBuilder::default().build()
    }
}

impl RetryOptions {
    /// Creates a new builder for `RetryOptions`.
    #[must_use]
    pub fn builder() -> RetryOptionsBuilder {
        RetryOptionsBuilder::default()
    }

    /// Maximum number of retries after the first attempt.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Cap applied to every computed delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Multiplier applied per retry.
    #[must_use]
    pub const fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Lower-cased retryable error patterns.
    #[must_use]
    pub fn retryable_errors(&self) -> &[String] {
        &self.retryable_errors
    }

    /// Whether jitter is applied to delays.
    #[must_use]
    pub const fn jitter(&self) -> bool {
        self.jitter
    }

    /// Backoff delay before retry number `retry_index + 1`, without jitter.
    ///
    /// `min(max_delay, initial_delay * backoff_factor ^ retry_index)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn base_delay(&self, retry_index: u32) -> Duration {
        if self.initial_delay.is_zero() || self.max_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry_index.min(MAX_EXPONENT)).unwrap_or(i32::MAX);
        let max_ms = self.max_delay.as_millis() as f64;
        let ms = (self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent))
            .clamp(0.0, max_ms);
        Duration::from_millis(ms as u64)
    }

    /// Backoff delay including jitter when enabled, clamped to `max_delay`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let base = self.base_delay(retry_index);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor = JITTER_MIN + rand::random::<f64>();
        let max_ms = self.max_delay.as_millis() as f64;
        let ms = (base.as_millis() as f64 * factor).clamp(0.0, max_ms);
        Duration::from_millis(ms as u64)
    }
}

/// Builder for [`RetryOptions`].
#[derive(Debug, Clone, Default)]
pub struct RetryOptionsBuilder {
    max_retries: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    backoff_factor: Option<f64>,
    retryable_errors: Option<Vec<String>>,
    jitter: Option<bool>,
}

impl RetryOptionsBuilder {
    /// Sets the maximum number of retries (clamped to 0–100).
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Sets the per-retry multiplier (clamped to 1–10).
    #[must_use]
    pub const fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = Some(factor);
        self
    }

    /// Replaces the retryable error patterns.
    #[must_use]
    pub fn retryable_errors<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_errors = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub const fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = Some(enabled);
        self
    }

    /// Builds the [`RetryOptions`], clamping every value into range.
    #[must_use]
    pub fn build(self) -> RetryOptions {
        let limit = Duration::from_millis(MAX_DELAY_LIMIT_MS);
        let max_delay = self
            .max_delay
            .unwrap_or(Duration::from_millis(DEFAULT_MAX_DELAY_MS))
            .min(limit);
        let initial_delay = self
            .initial_delay
            .unwrap_or(Duration::from_millis(DEFAULT_INITIAL_DELAY_MS))
            .min(limit);
        let factor = self
            .backoff_factor
            .filter(|f| f.is_finite())
            .unwrap_or(DEFAULT_BACKOFF_FACTOR)
            .clamp(BACKOFF_FACTOR_RANGE.0, BACKOFF_FACTOR_RANGE.1);
        let patterns = self.retryable_errors.unwrap_or_else(|| {
            DEFAULT_RETRYABLE_ERRORS
                .iter()
                .map(|p| (*p).to_string())
                .collect()
        });

        RetryOptions {
            max_retries: self
                .max_retries
                .unwrap_or(DEFAULT_MAX_RETRIES)
                .min(MAX_RETRIES_LIMIT),
            initial_delay,
            max_delay,
            backoff_factor: factor,
            retryable_errors: patterns.into_iter().map(|p| p.to_lowercase()).collect(),
            jitter: self.jitter.unwrap_or(true),
        }
    }
}

/// Per-call metadata for logging and cancellation.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Provider name, for logs.
    pub provider: Option<String>,
    /// Model name, for logs.
    pub model: Option<String>,
    /// Cancellation signal checked before attempts and raced against waits.
    pub cancel: Option<CancellationToken>,
}

impl RetryContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the provider name.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Snapshot of a manager's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    /// Every call of the operation.
    pub total_attempts: u64,
    /// Every retry scheduled after a failure.
    pub total_retries: u64,
    /// Operations that succeeded after at least one retry.
    pub successful_retries: u64,
    /// Operations that failed after at least one retry.
    pub failed_retries: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    total_attempts: AtomicU64,
    total_retries: AtomicU64,
    successful_retries: AtomicU64,
    failed_retries: AtomicU64,
}

/// Classification hooks used to decide whether an error is transient.
pub trait RetryClassify: Display {
    /// Machine-readable error code, if any.
    fn error_code(&self) -> Option<String> {
        None
    }

    /// HTTP status associated with the error, if any.
    fn http_status(&self) -> Option<u16> {
        None
    }

    /// Whether the error represents caller cancellation.
    fn is_cancellation(&self) -> bool {
        false
    }

    /// Short type label for logs.
    fn error_type(&self) -> &'static str {
        "Error"
    }
}

impl RetryClassify for AgentError {
    fn error_code(&self) -> Option<String> {
        match self {
            Self::ApiRequest {
                status: Some(status),
                ..
            } => Some(status.to_string()),
            Self::Timeout { .. } => Some("ETIMEDOUT".to_string()),
            _ => None,
        }
    }

    fn http_status(&self) -> Option<u16> {
        match self {
            Self::ApiRequest { status, .. } => *status,
            _ => None,
        }
    }

    fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::ApiKeyMissing => "ApiKeyMissing",
            Self::UnsupportedProvider { .. } => "UnsupportedProvider",
            Self::ApiRequest { .. } => "ApiRequest",
            Self::Timeout { .. } => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::RetryExhausted { .. } => "RetryExhausted",
            Self::ToolExecution { .. } => "ToolExecution",
            Self::UnknownTool { .. } => "UnknownTool",
            Self::Config { .. } => "Config",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
        }
    }
}

/// Normalised error description for logs. Has no control-flow effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    /// Display text of the error.
    pub message: String,
    /// Type label.
    pub error_type: String,
    /// Error code, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// HTTP status, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Provider from the retry context, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Classification result.
    pub retryable: bool,
}

/// Outcome of a failed [`RetryManager::execute_with_retry`] call.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The cancellation token fired before or during an attempt or wait.
    #[error("operation cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Attempts started before cancellation.
        attempts: u32,
    },

    /// A retryable error persisted through every allowed retry.
    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    Exhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// The last error.
        #[source]
        source: E,
    },

    /// A non-retryable error, returned unchanged.
    #[error(transparent)]
    Failed(E),
}

impl<E> RetryError<E> {
    /// Returns the underlying error, if the failure carried one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Cancelled { .. } => None,
            Self::Exhausted { source, .. } | Self::Failed(source) => Some(source),
        }
    }

    /// Whether the failure was caused by cancellation.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<RetryError<Self>> for AgentError {
    fn from(err: RetryError<Self>) -> Self {
        match err {
            RetryError::Cancelled { .. } => Self::Cancelled,
            RetryError::Exhausted { attempts, source } => Self::RetryExhausted {
                attempts,
                source: Box::new(source),
            },
            RetryError::Failed(source) => source,
        }
    }
}

/// Executes async operations under a [`RetryOptions`] policy.
///
/// One manager represents one policy; it can be shared by reference and
/// reused for many calls. Statistics accumulate until [`Self::reset_stats`].
#[derive(Debug, Default)]
pub struct RetryManager {
    options: RetryOptions,
    stats: StatCounters,
}

impl RetryManager {
    /// Creates a manager with the given policy.
    #[must_use]
    pub fn new(options: RetryOptions) -> Self {
        Self {
            options,
            stats: StatCounters::default(),
        }
    }

    /// Returns the policy.
    #[must_use]
    pub const fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Runs `operation` until it succeeds, fails permanently, runs out of
    /// retries, or is cancelled.
    ///
    /// # Errors
    ///
    /// - [`RetryError::Failed`] with the original error when it is not retryable.
    /// - [`RetryError::Exhausted`] when a retryable error outlives `max_retries`.
    /// - [`RetryError::Cancelled`] when the context's token fires.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        mut operation: F,
        context: &RetryContext,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClassify,
    {
        let mut retries: u32 = 0;

        loop {
            if context.is_cancelled() {
                self.record_failure(retries);
                return Err(RetryError::Cancelled { attempts: retries });
            }

            let attempts = retries + 1;
            self.stats.total_attempts.fetch_add(1, Ordering::Relaxed);

            let result = match context.cancel.as_ref() {
                Some(token) => {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => {
                            self.record_failure(retries);
                            return Err(RetryError::Cancelled { attempts });
                        }
                        result = operation() => result,
                    }
                }
                None => operation().await,
            };

            let error = match result {
                Ok(value) => {
                    if retries > 0 {
                        self.stats
                            .successful_retries
                            .fetch_add(1, Ordering::Relaxed);
                        debug!(
                            attempts,
                            provider = context.provider.as_deref(),
                            model = context.model.as_deref(),
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if context.is_cancelled() {
                self.record_failure(retries);
                return Err(RetryError::Cancelled { attempts });
            }

            if !self.is_retryable(&error) {
                self.record_failure(retries);
                debug!(
                    attempts,
                    error = %error,
                    "non-retryable error, giving up"
                );
                return Err(RetryError::Failed(error));
            }

            if retries >= self.options.max_retries {
                self.record_failure(retries);
                warn!(
                    attempts,
                    max_retries = self.options.max_retries,
                    provider = context.provider.as_deref(),
                    model = context.model.as_deref(),
                    error = %error,
                    "retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts,
                    source: error,
                });
            }

            let delay = self.options.delay_for(retries);
            warn!(
                attempt = attempts,
                max_retries = self.options.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                provider = context.provider.as_deref(),
                model = context.model.as_deref(),
                error = %error,
                "retryable error, backing off"
            );

            match context.cancel.as_ref() {
                Some(token) => {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => {
                            self.record_failure(retries);
                            return Err(RetryError::Cancelled { attempts });
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }

            retries += 1;
            self.stats.total_retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether `error` should be retried under this policy.
    ///
    /// Cancellation and validation/auth statuses are never retried; otherwise
    /// the error is retryable when its message or code contains any
    /// configured pattern (case-insensitive).
    pub fn is_retryable<E: RetryClassify + ?Sized>(&self, error: &E) -> bool {
        if error.is_cancellation() {
            return false;
        }
        if let Some(status) = error.http_status() {
            if NON_RETRYABLE_STATUS.contains(&status) {
                return false;
            }
        }

        let message = error.to_string().to_lowercase();
        let code = error.error_code().map(|c| c.to_lowercase());
        self.options.retryable_errors.iter().any(|pattern| {
            message.contains(pattern.as_str())
                || code
                    .as_deref()
                    .is_some_and(|c| c.contains(pattern.as_str()))
        })
    }

    /// Builds a normalised description of `error` for logging.
    pub fn extract_error_info<E: RetryClassify + ?Sized>(
        &self,
        error: &E,
        context: &RetryContext,
    ) -> ErrorInfo {
        ErrorInfo {
            message: error.to_string(),
            error_type: error.error_type().to_string(),
            code: error.error_code(),
            status: error.http_status(),
            provider: context.provider.clone(),
            retryable: self.is_retryable(error),
        }
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> RetryStats {
        RetryStats {
            total_attempts: self.stats.total_attempts.load(Ordering::Relaxed),
            total_retries: self.stats.total_retries.load(Ordering::Relaxed),
            successful_retries: self.stats.successful_retries.load(Ordering::Relaxed),
            failed_retries: self.stats.failed_retries.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter to zero.
    pub fn reset_stats(&self) {
        self.stats.total_attempts.store(0, Ordering::Relaxed);
        self.stats.total_retries.store(0, Ordering::Relaxed);
        self.stats.successful_retries.store(0, Ordering::Relaxed);
        self.stats.failed_retries.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self, retries: u32) {
        if retries > 0 {
            self.stats.failed_retries.fetch_add(1, Ordering::Relaxed);
        }
    }
}
