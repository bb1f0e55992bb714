mod common;

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use kubesdk_client::{
    AttemptOutcome, BackoffInterval, CallOptions, ClientError, ExecutionPolicy, LogConfig,
    StatusKind,
};

use common::{
    config_map_json, logged_in_client_with_logger, status_json, ConfigMapType, MockLogger,
    MockTransport, TestConfigMap,
};

fn fast_policy(max_attempts: u32) -> ExecutionPolicy {
    ExecutionPolicy::builder()
        .max_attempts(max_attempts)
        .interval(BackoffInterval::Fixed(Duration::ZERO))
        .build()
        .expect("policy")
}

#[tokio::test]
async fn test_retries_until_success_with_suppressed_logs() {
    let transport = MockTransport::new();
    for _ in 0..3 {
        transport.push_reply(503, status_json(503, "ServiceUnavailable"));
    }
    transport.push_reply(200, config_map_json("app", "1", json!({"k": "v"})));

    let logger = Arc::new(MockLogger::default());
    let client = logged_in_client_with_logger(transport.clone(), logger.clone())
        .await
        .with_policy(fast_policy(5))
        .with_log(
            LogConfig::builder()
                .on_success(true)
                .suppressed_statuses(vec![StatusCode::SERVICE_UNAVAILABLE])
                .build()
                .expect("log config"),
        );

    let item: TestConfigMap = client
        .retrieve_item::<ConfigMapType, _>("default", "app", &CallOptions::default())
        .await
        .expect("succeeds on the fourth attempt");
    assert_eq!(item.metadata.name, "app");
    assert_eq!(transport.recorded().len(), 4);

    let records = logger.records();
    assert_eq!(records.len(), 4);
    for record in &records[..3] {
        assert!(record.suppressed);
        assert!(matches!(
            record.outcome,
            AttemptOutcome::Retrying { status: Some(s), .. }
                if s == StatusCode::SERVICE_UNAVAILABLE
        ));
    }
    assert!(matches!(
        records[3].outcome,
        AttemptOutcome::Success { status } if status == StatusCode::OK
    ));
}

#[tokio::test]
async fn test_terminal_status_is_not_retried() {
    let transport = MockTransport::new();
    transport.push_reply(404, status_json(404, "NotFound"));

    let logger = Arc::new(MockLogger::default());
    let client = logged_in_client_with_logger(transport.clone(), logger.clone())
        .await
        .with_policy(fast_policy(5));

    let err = client
        .retrieve_item::<ConfigMapType, TestConfigMap>("default", "gone", &CallOptions::default())
        .await
        .unwrap_err();
    match err {
        ClientError::Status(status) => {
            assert_eq!(status.kind, StatusKind::NotFound);
            assert_eq!(
                status.body.as_ref().and_then(|b| b.reason.as_deref()),
                Some("NotFound")
            );
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert_eq!(transport.recorded().len(), 1);
    assert_eq!(logger.records().len(), 1);
}

#[tokio::test]
async fn test_retry_exhaustion_returns_last_status() {
    let transport = MockTransport::new();
    for _ in 0..3 {
        transport.push_reply(503, status_json(503, "ServiceUnavailable"));
    }

    let logger = Arc::new(MockLogger::default());
    let client = logged_in_client_with_logger(transport.clone(), logger.clone())
        .await
        .with_policy(fast_policy(3));

    let err = client
        .retrieve_item::<ConfigMapType, TestConfigMap>("default", "app", &CallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(transport.recorded().len(), 3);

    let records = logger.records();
    assert!(matches!(records[2].outcome, AttemptOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_transport_failures_are_retried() {
    let transport = MockTransport::new();
    transport.push_failure("connection refused");
    transport.push_failure("connection refused");
    transport.push_reply(200, config_map_json("app", "1", json!({})));

    let client = logged_in_client_with_logger(transport.clone(), Arc::new(MockLogger::default()))
        .await
        .with_policy(fast_policy(3));

    let item: TestConfigMap = client
        .retrieve_item::<ConfigMapType, _>("default", "app", &CallOptions::default())
        .await
        .expect("third attempt succeeds");
    assert_eq!(item.metadata.name, "app");
    assert_eq!(transport.recorded().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_overall_deadline_cuts_across_attempts() {
    let transport = MockTransport::new();
    transport.push_hang();

    let policy = ExecutionPolicy::builder()
        .max_attempts(3)
        .interval(BackoffInterval::Fixed(Duration::ZERO))
        .attempt_timeout(Duration::from_secs(60))
        .overall_timeout(Some(Duration::from_millis(100)))
        .build()
        .expect("policy");
    let client = logged_in_client_with_logger(transport.clone(), Arc::new(MockLogger::default()))
        .await
        .with_policy(policy);

    let err = client
        .retrieve_item::<ConfigMapType, TestConfigMap>("default", "app", &CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout(d) if d == Duration::from_millis(100)));
}

#[tokio::test(start_paused = true)]
async fn test_attempt_deadline_triggers_retry() {
    let transport = MockTransport::new();
    transport.push_hang();
    transport.push_reply(200, config_map_json("app", "1", json!({})));

    let policy = ExecutionPolicy::builder()
        .max_attempts(2)
        .interval(BackoffInterval::Fixed(Duration::ZERO))
        .attempt_timeout(Duration::from_millis(50))
        .build()
        .expect("policy");
    let logger = Arc::new(MockLogger::default());
    let client = logged_in_client_with_logger(transport.clone(), logger.clone())
        .await
        .with_policy(policy);

    let item: TestConfigMap = client
        .retrieve_item::<ConfigMapType, _>("default", "app", &CallOptions::default())
        .await
        .expect("second attempt succeeds");
    assert_eq!(item.metadata.name, "app");

    let records = logger.records();
    assert!(matches!(
        records[0].outcome,
        AttemptOutcome::Retrying { status: None, .. }
    ));
}

#[tokio::test]
async fn test_cancellation_aborts_the_request() {
    let transport = MockTransport::new();
    transport.push_hang();

    let client =
        logged_in_client_with_logger(transport.clone(), Arc::new(MockLogger::default())).await;

    let token = CancellationToken::new();
    token.cancel();
    let err = client
        .retrieve_item::<ConfigMapType, TestConfigMap>(
            "default",
            "app",
            &CallOptions::default().cancel(token),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
}

#[tokio::test]
async fn test_accepted_status_skips_error_mapping() {
    let transport = MockTransport::new();
    transport.push_reply(404, status_json(404, "NotFound"));

    let client =
        logged_in_client_with_logger(transport.clone(), Arc::new(MockLogger::default())).await;

    let found = client
        .exists::<ConfigMapType>("default", "missing", &CallOptions::default())
        .await
        .expect("404 is an answer, not an error");
    assert!(!found);
}
