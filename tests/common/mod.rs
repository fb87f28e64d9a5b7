/*!
 * Common test utilities for the whisperbot test suite
 */

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use whisperbot::app_config::Config;
use whisperbot::app_controller::Controller;
use whisperbot::dispatcher::JobDispatcher;
use whisperbot::lifecycle::{ComputeLifecycleManager, LifecycleSettings};
use whisperbot::providers::mock::{MockComputeResource, MockLanguageDetector, MockWorker};
use whisperbot::registry::ActiveJobRegistry;
use whisperbot::retry::RetryPolicy;
use whisperbot::session::SessionStateMachine;
use whisperbot::transport::mock::MockTransport;

/// Password used by every test configuration
pub const PASSWORD: &str = "open sesame";

/// A user already on the allow-list
pub const ALICE: i64 = 1001;

/// A second allow-listed user
pub const BOB: i64 = 1002;

/// Short policy interval so real-time tests stay fast
pub const TICK: Duration = Duration::from_millis(10);

/// Upper bound for waiting on asynchronous outcomes
pub const WAIT: Duration = Duration::from_secs(10);

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Optional logging for debugging a failing test: `RUST_LOG=debug`
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Configuration with fast policies rooted in `dir`
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage_dir = dir.to_path_buf();
    config.auth.password = PASSWORD.to_string();
    config.telegram.bot_token = "123:test".to_string();
    config.compute.api_key = "rp-key".to_string();
    config.compute.pod_id = "pod-1".to_string();
    config.compute.start_policy = RetryPolicy::new(3, TICK);
    config.compute.status_poll_policy = RetryPolicy::new(4, TICK);
    config.compute.settle_delay_secs = 0;
    config.worker.endpoint = "http://worker.invalid:8000".to_string();
    config.worker.poll_policy = RetryPolicy::new(5, TICK);
    config
}

/// Lifecycle settings matching `test_config`
pub fn fast_lifecycle_settings() -> LifecycleSettings {
    LifecycleSettings {
        start_policy: RetryPolicy::new(3, TICK),
        status_poll_policy: RetryPolicy::new(4, TICK),
        settle_delay: Duration::ZERO,
    }
}

/// A lifecycle manager over an in-memory registry
pub fn lifecycle_for(pod: Arc<MockComputeResource>, settings: LifecycleSettings) -> ComputeLifecycleManager {
    ComputeLifecycleManager::new(Arc::new(ActiveJobRegistry::in_memory()), pod, settings)
}

/// Write an audio file the worker mocks can "upload"
pub fn create_audio_file(dir: &Path, name: &str) -> Result<std::path::PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, b"RIFF....WAVEfmt ")?;
    Ok(path)
}

/// Everything a conversation test needs, wired through the controller
pub struct Harness {
    pub dir: TempDir,
    pub transport: Arc<MockTransport>,
    pub pod: Arc<MockComputeResource>,
    pub worker: Arc<MockWorker>,
    pub detector: Arc<MockLanguageDetector>,
    pub controller: Arc<Controller>,
}

/// Builder for [`Harness`]
pub struct HarnessBuilder {
    pod: MockComputeResource,
    worker: MockWorker,
    detector: MockLanguageDetector,
    users: Vec<i64>,
    configure: Option<Box<dyn FnOnce(&mut Config)>>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            pod: MockComputeResource::stopped(),
            worker: MockWorker::new("SPEAKER_00: hello\nSPEAKER_01: hi there\n"),
            detector: MockLanguageDetector::detecting("fr"),
            users: vec![ALICE, BOB],
            configure: None,
        }
    }
}

impl HarnessBuilder {
    pub fn pod(mut self, pod: MockComputeResource) -> Self {
        self.pod = pod;
        self
    }

    pub fn worker(mut self, worker: MockWorker) -> Self {
        self.worker = worker;
        self
    }

    pub fn detector(mut self, detector: MockLanguageDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Users on the allow-list before start-up
    pub fn users(mut self, users: &[i64]) -> Self {
        self.users = users.to_vec();
        self
    }

    /// Adjust the configuration before the controller is built
    pub fn configure(mut self, f: impl FnOnce(&mut Config) + 'static) -> Self {
        self.configure = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Result<Harness> {
        let dir = create_temp_dir()?;
        let mut config = test_config(dir.path());
        if let Some(configure) = self.configure {
            configure(&mut config);
        }

        let users: Vec<String> = self.users.iter().map(|u| format!("{}\n", u)).collect();
        std::fs::write(config.users_file_path(), users.concat())?;

        let transport = Arc::new(MockTransport::new());
        let pod = Arc::new(self.pod);
        let worker = Arc::new(self.worker);
        let detector = Arc::new(self.detector);
        let controller = Controller::with_services(
            config,
            transport.clone(),
            pod.clone(),
            worker.clone(),
            detector.clone(),
        )?;

        Ok(Harness {
            dir,
            transport,
            pod,
            worker,
            detector,
            controller: Arc::new(controller),
        })
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Push `add` text from `user`
    pub fn say(&self, user: i64, text: &str) {
        self.transport.push(self.transport.text_message(user, text));
    }

    /// Push an audio upload from `user`
    pub fn upload(&self, user: i64) {
        self.transport.push(self.transport.media_message(user, b"OggS fake audio"));
    }

    /// Close the transport and run the bot until every session is done
    pub async fn run_to_completion(&self) -> Result<()> {
        self.transport.close();
        tokio::time::timeout(WAIT, self.controller.run())
            .await
            .map_err(|_| anyhow::anyhow!("bot did not finish in time"))?
    }

    /// Run the bot on a background task
    pub fn spawn(&self) -> tokio::task::JoinHandle<Result<()>> {
        let controller = self.controller.clone();
        tokio::spawn(async move { controller.run().await })
    }

    /// Wait until a session of `user` is waiting for a reply
    pub async fn wait_until_asked(&self, user: i64) {
        tokio::time::timeout(WAIT, async {
            while self.transport.waiting_replies(user) == 0 {
                tokio::time::sleep(TICK).await;
            }
        })
        .await
        .expect("no session asked for a reply in time");
    }

    /// Texts sent to `user`, in order
    pub fn texts(&self, user: i64) -> Vec<String> {
        self.transport.texts(user)
    }
}

/// A state machine over the given mocks, for tests that drive sessions
/// without the router
pub fn machine_for(
    dir: &Path,
    transport: Arc<MockTransport>,
    pod: Arc<MockComputeResource>,
    worker: Arc<MockWorker>,
    detector: Arc<MockLanguageDetector>,
) -> SessionStateMachine {
    let config = test_config(dir);
    let lifecycle = lifecycle_for(pod, fast_lifecycle_settings());
    let dispatcher = JobDispatcher::from_config(lifecycle, worker, &config.worker);
    SessionStateMachine::new(transport, detector, dispatcher, dir, config.session)
}
