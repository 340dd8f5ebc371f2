use lifeline::{
    CancellationToken, InstantSleeper, RecordingSleeper, ResilienceError, RetryPolicy,
    TransportError,
};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn always_offline() -> impl Future<Output = Result<(), TransportError>> {
    async { Err(TransportError::no_response("offline")) }
}

#[tokio::test]
async fn backoff_doubles_between_attempts() {
    for base in [250u64, 500] {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .base_delay(Duration::from_millis(base))
            .with_sleeper(sleeper.clone())
            .build()
            .unwrap();

        let _ = policy.execute(always_offline).await;

        let expected: Vec<_> =
            (0..4).map(|k| Duration::from_millis(base * 2u64.pow(k))).collect();
        assert_eq!(sleeper.waits(), expected, "base {base}");
    }
}

#[tokio::test]
async fn attempt_budget_is_never_exceeded() {
    for max_attempts in 1..=6 {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::builder()
            .max_attempts(max_attempts)
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();

        let result = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                always_offline()
            })
            .await;

        assert!(result.unwrap_err().is_retry_exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), max_attempts);
    }
}

#[tokio::test]
async fn client_errors_run_exactly_once() {
    let calls = AtomicUsize::new(0);
    let result = RetryPolicy::builder()
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap()
        .execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TransportError::status(404, "no such product")) }
        })
        .await;

    match result {
        Err(ResilienceError::Inner(TransportError::Status { status, .. })) => assert_eq!(status, 404),
        other => panic!("expected inner 404, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_use_every_attempt_then_fail() {
    let calls = AtomicUsize::new(0);
    let policy = RetryPolicy::builder()
        .max_attempts(4)
        .retry_on_server_error(true)
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap();

    let result = policy
        .execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TransportError::status(500, "internal")) }
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(err.last_failure(), Some(&TransportError::status(500, "internal")));
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_prevents_next_attempt() {
    let token = CancellationToken::new();
    let policy = RetryPolicy::builder()
        .max_attempts(4)
        .base_delay(Duration::from_secs(10))
        .build()
        .unwrap();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let started = tokio::time::Instant::now();
    let result = policy
        .execute_with_cancel(&token, || {
            counter.fetch_add(1, Ordering::SeqCst);
            always_offline()
        })
        .await;

    assert!(matches!(result, Err(ResilienceError::Cancelled { attempts: 1 })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn uncancelled_token_behaves_like_execute() {
    let token = CancellationToken::new();
    let calls = AtomicUsize::new(0);
    let policy = RetryPolicy::builder().with_sleeper(InstantSleeper).build().unwrap();

    let result = policy
        .execute_with_cancel(&token, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TransportError::status(503, "warming up"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 1);
}
