//!
//! # Execution policy
//!
//! Per-request knobs for the pipeline: how many attempts, which statuses are
//! retryable, how long to wait between attempts and how loudly to report each
//! one. Policies are plain data; the pipeline interprets them.
//!
use std::time::Duration;

use derive_builder::Builder;
use http::StatusCode;
use tracing::{debug, error, trace, warn};

/// delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffInterval {
    Fixed(Duration),
    /// `base * 2^attempt`, never past `cap`
    Exponential { base: Duration, cap: Duration },
}

impl BackoffInterval {
    /// delay before the attempt following failed attempt number `attempt`
    /// (zero-based)
    pub fn interval(&self, attempt: u32) -> Duration {
        match self {
            BackoffInterval::Fixed(delay) => *delay,
            BackoffInterval::Exponential { base, cap } => {
                let factor = 2u32.saturating_pow(attempt);
                base.saturating_mul(factor).min(*cap)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(pattern = "owned", default, build_fn(validate = "Self::validate"))]
pub struct ExecutionPolicy {
    /// total attempts, including the first; at least 1
    pub max_attempts: u32,
    pub interval: BackoffInterval,
    /// statuses worth a retry; everything else terminal on first sight
    pub retry_statuses: Vec<StatusCode>,
    /// deadline for a single attempt
    pub attempt_timeout: Duration,
    /// deadline across all attempts and backoff sleeps
    pub overall_timeout: Option<Duration>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: BackoffInterval::Exponential {
                base: Duration::from_millis(500),
                cap: Duration::from_secs(10),
            },
            retry_statuses: vec![
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ],
            attempt_timeout: Duration::from_secs(30),
            overall_timeout: None,
        }
    }
}

impl ExecutionPolicy {
    pub fn builder() -> ExecutionPolicyBuilder {
        ExecutionPolicyBuilder::default()
    }

    pub fn should_retry(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status)
    }
}

impl ExecutionPolicyBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be at least 1".to_owned());
        }
        Ok(())
    }
}

/// what gets logged per attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
#[builder(pattern = "owned", default)]
pub struct LogConfig {
    /// also log successful attempts, not only failures
    pub on_success: bool,
    pub request_body: bool,
    pub response_body: bool,
    /// terminal or retried statuses reported at reduced severity
    pub suppressed_statuses: Vec<StatusCode>,
}

impl LogConfig {
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success {
        status: StatusCode,
    },
    Retrying {
        status: Option<StatusCode>,
        next_delay: Duration,
    },
    Failed {
        status: Option<StatusCode>,
        detail: String,
    },
}

/// one pipeline attempt, handed to the logger after it settles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub method: String,
    pub path: String,
    /// zero-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
    /// status appears in the config's suppressed list
    pub suppressed: bool,
    /// populated only when the config asks for bodies
    pub request_body: Option<String>,
    pub response_body: Option<String>,
}

/// Sink for per-attempt reports. The pipeline calls this for every attempt;
/// the implementation decides severity from the record and config.
pub trait RequestLogger: Send + Sync {
    fn on_attempt(&self, record: &AttemptRecord, config: &LogConfig);
}

/// default logger emitting through `tracing`
#[derive(Debug, Default)]
pub struct TracingLogger;

impl RequestLogger for TracingLogger {
    fn on_attempt(&self, record: &AttemptRecord, config: &LogConfig) {
        let method = &record.method;
        let path = &record.path;
        let attempt = record.attempt + 1;
        let total = record.max_attempts;
        let elapsed = record.elapsed;
        if let Some(body) = &record.request_body {
            trace!(%method, %path, %body, "request body");
        }
        if let Some(body) = &record.response_body {
            trace!(%method, %path, %body, "response body");
        }
        match &record.outcome {
            AttemptOutcome::Success { status } => {
                if config.on_success {
                    debug!(%method, %path, %status, ?elapsed, "request succeeded");
                }
            }
            AttemptOutcome::Retrying { status, next_delay } => {
                let status = status.map(|s| s.as_u16()).unwrap_or(0);
                if record.suppressed {
                    debug!(%method, %path, status, attempt, total, ?next_delay, "retrying");
                } else {
                    warn!(%method, %path, status, attempt, total, ?next_delay, "retrying");
                }
            }
            AttemptOutcome::Failed { status, detail } => {
                let status = status.map(|s| s.as_u16()).unwrap_or(0);
                if record.suppressed {
                    debug!(%method, %path, status, attempt, total, %detail, "request failed");
                } else {
                    error!(%method, %path, status, attempt, total, %detail, "request failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fixed_interval_constant() {
        let interval = BackoffInterval::Fixed(Duration::from_millis(200));
        assert_eq!(interval.interval(0), Duration::from_millis(200));
        assert_eq!(interval.interval(7), Duration::from_millis(200));
    }

    #[test]
    fn test_exponential_interval_doubles_to_cap() {
        let interval = BackoffInterval::Exponential {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(4),
        };
        assert_eq!(interval.interval(0), Duration::from_millis(500));
        assert_eq!(interval.interval(1), Duration::from_secs(1));
        assert_eq!(interval.interval(2), Duration::from_secs(2));
        assert_eq!(interval.interval(3), Duration::from_secs(4));
        assert_eq!(interval.interval(4), Duration::from_secs(4));
        assert_eq!(interval.interval(40), Duration::from_secs(4));
    }

    #[test]
    fn test_policy_builder_defaults_and_validation() {
        let policy = ExecutionPolicy::builder()
            .max_attempts(5)
            .interval(BackoffInterval::Fixed(Duration::ZERO))
            .build()
            .expect("valid policy");
        assert_eq!(policy.max_attempts, 5);
        assert!(policy.should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!policy.should_retry(StatusCode::NOT_FOUND));

        assert!(ExecutionPolicy::builder().max_attempts(0).build().is_err());
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::builder()
            .on_success(true)
            .suppressed_statuses(vec![StatusCode::NOT_FOUND])
            .build()
            .expect("log config");
        assert!(config.on_success);
        assert!(!config.request_body);
        assert_eq!(config.suppressed_statuses, vec![StatusCode::NOT_FOUND]);
    }
}
