/*!
 * End-to-end conversations through the controller
 */

use whisperbot::providers::mock::{MockComputeResource, MockWorker, ScriptedStatus, StartOutcome};
use whisperbot::providers::JobStatus;
use whisperbot::session::machine::{COMPLETION_NOTICE, TRANSCRIPT_CAPTION};
use whisperbot::transport::mock::Outbound;

use crate::common::{self, Harness, ALICE, WAIT};

/// Full conversation: add, upload, confirm the detected language with a
/// live reply, receive the transcript
#[tokio::test]
async fn test_conversation_withLanguageConfirmation_shouldDeliverTranscript() {
    common::init_logging();
    let harness = Harness::builder()
        .pod(
            MockComputeResource::stopped()
                .with_start_outcomes([StartOutcome::NoCapacity])
                .with_boot_polls(1),
        )
        .worker(
            MockWorker::new("SPEAKER_00: bonjour\nSPEAKER_01: salut\n")
                .with_statuses([ScriptedStatus::Reply(JobStatus::Pending), ScriptedStatus::Unreachable]),
        )
        .build()
        .unwrap();
    let running = harness.spawn();

    harness.say(ALICE, "add 2");
    harness.upload(ALICE);
    harness.wait_until_asked(ALICE).await;
    assert_eq!(harness.transport.waiting_replies(ALICE), 1);

    // Claimed by the waiting session, never routed as a new conversation
    harness.say(ALICE, "yes");
    harness
        .transport
        .wait_for_text(|t| t == COMPLETION_NOTICE, WAIT)
        .await
        .unwrap();

    harness.transport.close();
    tokio::time::timeout(WAIT, running).await.unwrap().unwrap().unwrap();

    let texts = harness.texts(ALICE);
    let expected_prefixes = [
        "Now upload your audio file.\nSpeakers: 2-2\nLanguage will be auto-detected.",
        "📥 Downloading audio file",
        "🔎 Detecting language",
        "🌐 Detected language: fr (French)",
        "👍 Got it!\nSpeakers: 2-2\nLanguage: fr",
        "⏳ Running WhisperX",
        "SPEAKER_00: bonjour\nSPEAKER_01: salut",
        COMPLETION_NOTICE,
    ];
    assert_eq!(texts.len(), expected_prefixes.len(), "texts: {:#?}", texts);
    for (text, prefix) in texts.iter().zip(expected_prefixes) {
        assert!(text.starts_with(prefix), "{:?} should start with {:?}", text, prefix);
    }

    let file = harness
        .transport
        .sent()
        .into_iter()
        .find_map(|o| match o {
            Outbound::File { path, caption, .. } => Some((path, caption)),
            _ => None,
        })
        .unwrap();
    assert_eq!(file.1, TRANSCRIPT_CAPTION);
    assert!(file.0.exists());
    assert!(file.0.starts_with(harness.dir.path()));

    let job = &harness.worker.submitted()[0];
    assert_eq!(job.language, "fr");
    assert_eq!(job.min_speakers, 2);
    assert_eq!(job.max_speakers, 2);
    assert_eq!(job.audio_path.with_extension("txt"), file.0);

    assert_eq!(harness.pod.start_calls(), 2);
    assert_eq!(harness.pod.pause_calls(), 1);
    assert!(!harness.pod.is_running());
    assert_eq!(harness.detector.calls(), 1);
    let registry = std::fs::read_to_string(harness.controller.config().registry_file_path()).unwrap();
    assert_eq!(registry, "0");
    assert!(harness.controller.router().sessions().is_empty());
}

/// A pod that never gets capacity: the user still gets an answer and a
/// transcript file explaining what went wrong
#[tokio::test]
async fn test_conversation_withoutCapacity_shouldReportResourceError() {
    let harness = Harness::builder()
        .pod(MockComputeResource::without_capacity(100))
        .build()
        .unwrap();

    harness.say(ALICE, "add 1 3 en");
    harness.upload(ALICE);
    harness.run_to_completion().await.unwrap();

    let texts = harness.texts(ALICE);
    assert!(texts
        .iter()
        .any(|t| t.starts_with("❌ Pod did not start in time or not enough GPUs available")));
    assert!(texts
        .iter()
        .any(|t| t.starts_with("Remote error: Pod did not start in time")));
    assert_eq!(texts.last().unwrap(), COMPLETION_NOTICE);

    assert!(harness.worker.submitted().is_empty());
    assert_eq!(harness.pod.start_calls(), 3);
    let registry = std::fs::read_to_string(harness.controller.config().registry_file_path()).unwrap();
    assert_eq!(registry, "0");
}

/// A user can run a second job right after the first one finishes
#[tokio::test]
async fn test_conversation_withBackToBackJobs_shouldRestartPod() {
    let harness = Harness::builder().build().unwrap();
    harness.transport.script_replies([Some("en".to_string())]);

    harness.say(ALICE, "add 2");
    harness.upload(ALICE);
    let running = harness.spawn();
    harness
        .transport
        .wait_for_text(|t| t == COMPLETION_NOTICE, WAIT)
        .await
        .unwrap();

    harness.say(ALICE, "add 3 de");
    harness.upload(ALICE);
    harness.transport.close();
    tokio::time::timeout(WAIT, running).await.unwrap().unwrap().unwrap();

    let submitted = harness.worker.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].language, "en");
    assert_eq!(submitted[1].language, "de");
    assert_eq!(submitted[1].min_speakers, 3);

    let notices = harness
        .texts(ALICE)
        .iter()
        .filter(|t| t.as_str() == COMPLETION_NOTICE)
        .count();
    assert_eq!(notices, 2);
    assert_eq!(harness.pod.start_calls(), 2);
    assert_eq!(harness.pod.pause_calls(), 2);
}
