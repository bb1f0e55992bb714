//!
//! # Request pipeline
//!
//! Drives one unary request to completion under an [`ExecutionPolicy`]:
//! per-attempt deadline, retry on retryable statuses and transport faults,
//! backoff between attempts, cooperative cancellation, and a logger report
//! for every attempt.
//!
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, StatusError};
use crate::policy::{AttemptOutcome, AttemptRecord, ExecutionPolicy, LogConfig, RequestLogger};
use crate::session::Session;
use crate::transport::{ApiRequest, ApiResponse, Transport};

pub struct RequestPipeline<T> {
    transport: Arc<T>,
    logger: Arc<dyn RequestLogger>,
}

/// pends forever when no token is given, so `select!` arms stay simple
pub(crate) async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => futures_util::future::pending().await,
    }
}

impl<T: Transport> RequestPipeline<T> {
    pub fn new(transport: Arc<T>, logger: Arc<dyn RequestLogger>) -> Self {
        Self { transport, logger }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Executes `request` against `session` until it succeeds, exhausts its
    /// attempts, or hits a deadline. Statuses listed in `accept` are returned
    /// as responses even though they are not 2xx.
    pub async fn execute(
        &self,
        session: &Session,
        request: &ApiRequest,
        policy: &ExecutionPolicy,
        log: &LogConfig,
        accept: &[StatusCode],
        cancel: Option<&CancellationToken>,
    ) -> Result<ApiResponse, ClientError> {
        match policy.overall_timeout {
            Some(deadline) => {
                tokio::time::timeout(
                    deadline,
                    self.attempt_loop(session, request, policy, log, accept, cancel),
                )
                .await
                .map_err(|_| ClientError::Timeout(deadline))?
            }
            None => {
                self.attempt_loop(session, request, policy, log, accept, cancel)
                    .await
            }
        }
    }

    async fn attempt_loop(
        &self,
        session: &Session,
        request: &ApiRequest,
        policy: &ExecutionPolicy,
        log: &LogConfig,
        accept: &[StatusCode],
        cancel: Option<&CancellationToken>,
    ) -> Result<ApiResponse, ClientError> {
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let outcome = tokio::select! {
                _ = cancelled(cancel) => return Err(ClientError::Cancelled),
                result = tokio::time::timeout(
                    policy.attempt_timeout,
                    self.transport.execute(session, request),
                ) => result,
            };
            let elapsed = started.elapsed();
            let last = attempt + 1 >= policy.max_attempts;

            match outcome {
                Ok(Ok(response)) => {
                    let status = response.status;
                    if status.is_success() || accept.contains(&status) {
                        self.report(
                            request,
                            attempt,
                            policy,
                            log,
                            elapsed,
                            AttemptOutcome::Success { status },
                            log.suppressed_statuses.contains(&status),
                            Some(&response),
                        );
                        return Ok(response);
                    }
                    if policy.should_retry(status) && !last {
                        let delay = policy.interval.interval(attempt);
                        self.report(
                            request,
                            attempt,
                            policy,
                            log,
                            elapsed,
                            AttemptOutcome::Retrying {
                                status: Some(status),
                                next_delay: delay,
                            },
                            log.suppressed_statuses.contains(&status),
                            Some(&response),
                        );
                        self.backoff(delay, cancel).await?;
                    } else {
                        let error = StatusError::new(status, response.status_body());
                        self.report(
                            request,
                            attempt,
                            policy,
                            log,
                            elapsed,
                            AttemptOutcome::Failed {
                                status: Some(status),
                                detail: error.to_string(),
                            },
                            log.suppressed_statuses.contains(&status),
                            Some(&response),
                        );
                        return Err(error.into());
                    }
                }
                Ok(Err(transport_error)) => {
                    if last {
                        self.report(
                            request,
                            attempt,
                            policy,
                            log,
                            elapsed,
                            AttemptOutcome::Failed {
                                status: None,
                                detail: transport_error.to_string(),
                            },
                            false,
                            None,
                        );
                        return Err(transport_error.into());
                    }
                    let delay = policy.interval.interval(attempt);
                    self.report(
                        request,
                        attempt,
                        policy,
                        log,
                        elapsed,
                        AttemptOutcome::Retrying {
                            status: None,
                            next_delay: delay,
                        },
                        false,
                        None,
                    );
                    self.backoff(delay, cancel).await?;
                }
                // attempt deadline elapsed
                Err(_) => {
                    if last {
                        self.report(
                            request,
                            attempt,
                            policy,
                            log,
                            elapsed,
                            AttemptOutcome::Failed {
                                status: None,
                                detail: format!(
                                    "attempt deadline of {:?} exceeded",
                                    policy.attempt_timeout
                                ),
                            },
                            false,
                            None,
                        );
                        return Err(ClientError::Timeout(policy.attempt_timeout));
                    }
                    let delay = policy.interval.interval(attempt);
                    self.report(
                        request,
                        attempt,
                        policy,
                        log,
                        elapsed,
                        AttemptOutcome::Retrying {
                            status: None,
                            next_delay: delay,
                        },
                        false,
                        None,
                    );
                    self.backoff(delay, cancel).await?;
                }
            }
            attempt += 1;
        }
    }

    async fn backoff(
        &self,
        delay: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), ClientError> {
        tokio::select! {
            _ = cancelled(cancel) => Err(ClientError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        request: &ApiRequest,
        attempt: u32,
        policy: &ExecutionPolicy,
        log: &LogConfig,
        elapsed: Duration,
        outcome: AttemptOutcome,
        suppressed: bool,
        response: Option<&ApiResponse>,
    ) {
        let request_body = (log.request_body)
            .then(|| request.body.as_ref())
            .flatten()
            .map(|body| String::from_utf8_lossy(body).into_owned());
        let response_body = (log.response_body)
            .then_some(response)
            .flatten()
            .map(|response| String::from_utf8_lossy(&response.body).into_owned());
        let record = AttemptRecord {
            method: request.method.to_string(),
            path: request.path.clone(),
            attempt,
            max_attempts: policy.max_attempts,
            elapsed,
            outcome,
            suppressed,
            request_body,
            response_body,
        };
        self.logger.on_attempt(&record, log);
    }
}

impl<T> Clone for RequestPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            logger: self.logger.clone(),
        }
    }
}
