/*!
 * Tests for the job dispatcher
 */

use std::sync::Arc;

use whisperbot::dispatcher::JobDispatcher;
use whisperbot::errors::DispatchError;
use whisperbot::providers::mock::{MockComputeResource, MockWorker, ScriptedStatus};
use whisperbot::providers::JobStatus;
use whisperbot::retry::RetryPolicy;

use crate::common;

fn dispatcher(pod: &Arc<MockComputeResource>, worker: &Arc<MockWorker>) -> JobDispatcher {
    let lifecycle = common::lifecycle_for(pod.clone(), common::fast_lifecycle_settings());
    JobDispatcher::new(lifecycle, worker.clone(), RetryPolicy::new(5, common::TICK))
}

#[tokio::test]
async fn test_dispatch_withHealthyWorker_shouldStoreTranscriptNextToAudio() {
    let dir = common::create_temp_dir().unwrap();
    let audio = common::create_audio_file(dir.path(), "1001_abc_1700000000.ogg").unwrap();
    let pod = Arc::new(MockComputeResource::stopped());
    let worker = Arc::new(MockWorker::new("  SPEAKER_00: bonjour  \nSPEAKER_01: salut\n"));

    let transcript = dispatcher(&pod, &worker)
        .dispatch(&audio, 2, 3, "fr")
        .await
        .unwrap();

    assert_eq!(transcript.path, dir.path().join("1001_abc_1700000000.txt"));
    assert!(transcript.path.exists());
    assert_eq!(transcript.lines, vec!["SPEAKER_00: bonjour", "SPEAKER_01: salut"]);

    let submitted = worker.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].audio_path, audio);
    assert_eq!(submitted[0].min_speakers, 2);
    assert_eq!(submitted[0].max_speakers, 3);
    assert_eq!(submitted[0].language, "fr");

    assert_eq!(pod.start_calls(), 1);
    assert_eq!(pod.pause_calls(), 1);
}

#[tokio::test]
async fn test_dispatch_withTransientPollFailures_shouldKeepPolling() {
    let dir = common::create_temp_dir().unwrap();
    let audio = common::create_audio_file(dir.path(), "a.ogg").unwrap();
    let pod = Arc::new(MockComputeResource::running());
    let worker = Arc::new(MockWorker::new("ok").with_statuses([
        ScriptedStatus::Reply(JobStatus::Pending),
        ScriptedStatus::Unreachable,
        ScriptedStatus::Reply(JobStatus::Running),
    ]));

    let transcript = dispatcher(&pod, &worker).dispatch(&audio, 1, 1, "en").await.unwrap();

    assert_eq!(transcript.text(), "ok");
    assert_eq!(worker.status_calls(), 4);
    assert_eq!(worker.fetch_calls(), 1);
}

#[tokio::test]
async fn test_dispatch_withRejectedSubmission_shouldFailAndRelease() {
    let dir = common::create_temp_dir().unwrap();
    let audio = common::create_audio_file(dir.path(), "a.ogg").unwrap();
    let pod = Arc::new(MockComputeResource::stopped());
    let worker = Arc::new(MockWorker::new("").rejecting("model not loaded"));

    let err = dispatcher(&pod, &worker).dispatch(&audio, 1, 2, "en").await.unwrap_err();

    assert!(matches!(err, DispatchError::SubmissionFailed(ref m) if m.contains("model not loaded")));
    assert_eq!(worker.status_calls(), 0);
    assert_eq!(pod.pause_calls(), 1);
}

#[tokio::test]
async fn test_dispatch_withRemoteJobError_shouldReportWorkerDetail() {
    let dir = common::create_temp_dir().unwrap();
    let audio = common::create_audio_file(dir.path(), "a.ogg").unwrap();
    let pod = Arc::new(MockComputeResource::running());
    let worker = Arc::new(MockWorker::new("").with_statuses([
        ScriptedStatus::Reply(JobStatus::Running),
        ScriptedStatus::Reply(JobStatus::Error("CUDA out of memory".to_string())),
    ]));

    let err = dispatcher(&pod, &worker).dispatch(&audio, 1, 2, "en").await.unwrap_err();

    assert!(matches!(err, DispatchError::RemoteError(ref m) if m == "CUDA out of memory"));
    assert_eq!(err.to_string(), "WhisperX error: CUDA out of memory");
    assert_eq!(worker.fetch_calls(), 0);
    assert_eq!(pod.pause_calls(), 1);
}

#[tokio::test]
async fn test_dispatch_withFailedDownload_shouldBeRemoteError() {
    let dir = common::create_temp_dir().unwrap();
    let audio = common::create_audio_file(dir.path(), "a.ogg").unwrap();
    let pod = Arc::new(MockComputeResource::running());
    let worker = Arc::new(MockWorker::new("").failing_fetch("Transcript not ready"));

    let err = dispatcher(&pod, &worker).dispatch(&audio, 1, 2, "en").await.unwrap_err();

    assert!(matches!(err, DispatchError::RemoteError(_)));
    assert!(!dir.path().join("a.txt").exists());
}

#[tokio::test]
async fn test_dispatch_withNeverFinishingJob_shouldTimeOut() {
    let dir = common::create_temp_dir().unwrap();
    let audio = common::create_audio_file(dir.path(), "a.ogg").unwrap();
    let pod = Arc::new(MockComputeResource::running());
    let worker = Arc::new(MockWorker::new("").never_finishing(100));

    let err = dispatcher(&pod, &worker).dispatch(&audio, 1, 2, "en").await.unwrap_err();

    assert!(matches!(err, DispatchError::Timeout { attempts: 5 }));
    assert_eq!(worker.status_calls(), 5);
    assert_eq!(pod.pause_calls(), 1);
}

#[tokio::test]
async fn test_dispatch_withUnavailablePod_shouldNotSubmit() {
    let dir = common::create_temp_dir().unwrap();
    let audio = common::create_audio_file(dir.path(), "a.ogg").unwrap();
    let pod = Arc::new(MockComputeResource::without_capacity(100));
    let worker = Arc::new(MockWorker::new("never"));
    let dispatcher = dispatcher(&pod, &worker);

    let err = dispatcher.dispatch(&audio, 1, 2, "en").await.unwrap_err();

    assert!(matches!(err, DispatchError::ResourceUnavailable(_)));
    assert!(err.to_string().starts_with("Pod did not start in time or not enough GPUs available"));
    assert!(worker.submitted().is_empty());
}

#[tokio::test]
async fn test_dispatch_withConcurrentJobs_shouldShareOnePodLifetime() {
    let dir = common::create_temp_dir().unwrap();
    let pod = Arc::new(MockComputeResource::stopped().with_boot_polls(2));
    let worker = Arc::new(MockWorker::new("line"));
    let dispatcher = dispatcher(&pod, &worker);

    let jobs = (0..4).map(|i| {
        let dispatcher = dispatcher.clone();
        let audio = common::create_audio_file(dir.path(), &format!("job{}.ogg", i)).unwrap();
        async move { dispatcher.dispatch(&audio, 1, 2, "en").await }
    });
    for result in futures::future::join_all(jobs).await {
        assert!(result.is_ok());
    }

    assert_eq!(worker.submitted().len(), 4);
    assert_eq!(pod.start_calls(), 1);
    // Jobs may finish at different times, but never pause a pod still in use
    assert!(pod.pause_calls() >= 1);
    assert!(!pod.is_running());
}
