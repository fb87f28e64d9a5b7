/*!
 * Tests for the compute lifecycle manager
 */

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use whisperbot::errors::ProvisionError;
use whisperbot::lifecycle::{LifecycleSettings, Readiness};
use whisperbot::providers::mock::{MockComputeResource, StartOutcome};
use whisperbot::retry::RetryPolicy;

use crate::common;

fn settings() -> LifecycleSettings {
    LifecycleSettings {
        start_policy: RetryPolicy::from_secs(3, 10),
        status_poll_policy: RetryPolicy::from_secs(4, 5),
        settle_delay: Duration::ZERO,
    }
}

#[tokio::test(start_paused = true)]
async fn test_acquire_withCapacityErrors_shouldBackOffThenStart() {
    let pod = Arc::new(MockComputeResource::without_capacity(2));
    let manager = common::lifecycle_for(pod.clone(), settings());

    let started = Instant::now();
    let lease = manager.acquire().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(pod.start_calls(), 3);
    // Two capacity backoffs plus one status poll interval
    assert!(elapsed >= Duration::from_secs(25), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(26), "elapsed {:?}", elapsed);

    lease.release().await;
    assert_eq!(pod.pause_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_withOverlappingJobs_shouldStartPodOnce() {
    let pod = Arc::new(MockComputeResource::stopped().with_boot_polls(3));
    let manager = common::lifecycle_for(pod.clone(), settings());

    let acquires = (0..5).map(|_| {
        let manager = manager.clone();
        async move { manager.acquire().await }
    });
    let leases: Vec<_> = futures::future::join_all(acquires)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(pod.start_calls(), 1);
    assert_eq!(manager.active_jobs().await, 5);
    assert_eq!(manager.readiness(), Readiness::Ready);

    for lease in leases {
        lease.release().await;
    }
    assert_eq!(pod.pause_calls(), 1);
    assert_eq!(manager.active_jobs().await, 0);
    assert!(!pod.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_release_withOtherLeaseHeld_shouldNotPause() {
    let pod = Arc::new(MockComputeResource::stopped());
    let manager = common::lifecycle_for(pod.clone(), settings());

    let first = manager.acquire().await.unwrap();
    let second = manager.acquire().await.unwrap();

    first.release().await;
    assert_eq!(pod.pause_calls(), 0);
    assert!(pod.is_running());

    second.release().await;
    assert_eq!(pod.pause_calls(), 1);
    assert_eq!(manager.readiness(), Readiness::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_withAlreadyRunningPod_shouldNotRequestStart() {
    let pod = Arc::new(MockComputeResource::running());
    let manager = common::lifecycle_for(pod.clone(), settings());

    let lease = manager.acquire().await.unwrap();
    assert_eq!(pod.start_calls(), 0);
    assert_eq!(pod.status_calls(), 1);
    lease.release().await;
}

#[tokio::test(start_paused = true)]
async fn test_acquire_withNoCapacity_shouldFailAndUnregister() {
    let pod = Arc::new(MockComputeResource::without_capacity(100));
    let manager = common::lifecycle_for(pod.clone(), settings());

    let err = manager.acquire().await.unwrap_err();
    assert_eq!(
        err,
        ProvisionError::NotRunning {
            attempts: 3,
            last_status: "NO_CAPACITY".to_string(),
        }
    );
    assert_eq!(pod.start_calls(), 3);
    assert_eq!(manager.active_jobs().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_whileWarmupFails_shouldReportWarmupFailedToWaiter() {
    let pod = Arc::new(MockComputeResource::without_capacity(100));
    let manager = common::lifecycle_for(pod.clone(), settings());

    let warmer = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.acquire().await })
    };
    // Let the first job claim the warm-up before the second arrives
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.readiness(), Readiness::WarmingUp);

    let waiter = manager.acquire().await.unwrap_err();
    let first = warmer.await.unwrap().unwrap_err();

    assert!(matches!(first, ProvisionError::NotRunning { .. }));
    assert_eq!(waiter, ProvisionError::WarmupFailed);
    assert_eq!(pod.start_calls(), 3);
    assert_eq!(manager.active_jobs().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_afterFailedWarmup_shouldTryAgain() {
    let pod = Arc::new(MockComputeResource::without_capacity(3));
    let manager = common::lifecycle_for(pod.clone(), settings());

    assert!(manager.acquire().await.is_err());
    let lease = manager.acquire().await.unwrap();

    assert_eq!(pod.start_calls(), 4);
    assert_eq!(manager.readiness(), Readiness::Ready);
    lease.release().await;
}

#[tokio::test(start_paused = true)]
async fn test_acquire_withFailedStartRequest_shouldStillPollThenRetry() {
    let pod = Arc::new(MockComputeResource::stopped().with_start_outcomes([StartOutcome::Fail]));
    let manager = common::lifecycle_for(pod.clone(), settings());

    let lease = manager.acquire().await.unwrap();
    assert_eq!(pod.start_calls(), 2);
    // 1 initial + 4 polls after the failed request + 1 after the accepted one
    assert_eq!(pod.status_calls(), 6);
    lease.release().await;
}

#[tokio::test(start_paused = true)]
async fn test_acquire_withSettleDelay_shouldWaitAfterRunning() {
    let pod = Arc::new(MockComputeResource::running());
    let manager = common::lifecycle_for(
        pod.clone(),
        LifecycleSettings {
            settle_delay: Duration::from_secs(50),
            ..settings()
        },
    );

    let started = Instant::now();
    let lease = manager.acquire().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(50));
    lease.release().await;
}

#[tokio::test(start_paused = true)]
async fn test_release_withFailingPause_shouldNotEscalate() {
    let pod = Arc::new(MockComputeResource::running().with_failing_pause());
    let manager = common::lifecycle_for(pod.clone(), settings());

    let lease = manager.acquire().await.unwrap();
    lease.release().await;

    assert_eq!(pod.pause_calls(), 1);
    assert_eq!(manager.active_jobs().await, 0);
    assert_eq!(manager.readiness(), Readiness::Idle);

    // The pod stayed up, so the next job needs no start
    let lease = manager.acquire().await.unwrap();
    assert_eq!(pod.start_calls(), 0);
    lease.release().await;
}
