use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::app_config::Config;
use crate::auth::AllowList;
use crate::dispatcher::JobDispatcher;
use crate::file_utils::FileManager;
use crate::lifecycle::{ComputeLifecycleManager, LifecycleSettings};
use crate::providers::runpod::RunPod;
use crate::providers::whisper_detect::WhisperLanguageDetector;
use crate::providers::whisperx::WhisperX;
use crate::providers::{ComputeResource, LanguageDetector, TranscriptionWorker};
use crate::registry::ActiveJobRegistry;
use crate::router::ConversationRouter;
use crate::session::SessionStateMachine;
use crate::transport::telegram::Telegram;
use crate::transport::Transport;

// @module: Application controller wiring the bot together

/// Owns the wired components and runs the bot
pub struct Controller {
    // @field: App configuration
    config: Config,
    // @field: Message router, entry point for every chat message
    router: ConversationRouter,
    // @field: Shared pod lifecycle, kept for diagnostics
    lifecycle: ComputeLifecycleManager,
}

impl Controller {
    // @method: Build the bot against the real services named in the configuration
    pub fn with_config(config: Config) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(Telegram::from_config(&config.telegram));
        let resource: Arc<dyn ComputeResource> = Arc::new(RunPod::from_config(&config.compute));
        let worker: Arc<dyn TranscriptionWorker> = Arc::new(WhisperX::from_config(&config.worker));
        let detector: Arc<dyn LanguageDetector> =
            Arc::new(WhisperLanguageDetector::from_config(&config.language_detection));
        Self::with_services(config, transport, resource, worker, detector)
    }

    // @method: Build the bot against the given services
    pub fn with_services(
        config: Config,
        transport: Arc<dyn Transport>,
        resource: Arc<dyn ComputeResource>,
        worker: Arc<dyn TranscriptionWorker>,
        detector: Arc<dyn LanguageDetector>,
    ) -> Result<Self> {
        FileManager::ensure_dir(&config.storage_dir)
            .context("Failed to prepare the storage directory")?;

        let registry = Arc::new(ActiveJobRegistry::open(
            config.registry_file_path(),
            config.registry.reset_on_start,
        ));
        let lifecycle = ComputeLifecycleManager::new(
            registry,
            resource,
            LifecycleSettings::from_config(&config.compute),
        );
        let dispatcher = JobDispatcher::from_config(lifecycle.clone(), worker, &config.worker);
        let machine = Arc::new(SessionStateMachine::new(
            transport.clone(),
            detector,
            dispatcher,
            config.storage_dir.clone(),
            config.session.clone(),
        ));
        let allow_list = Arc::new(AllowList::open(config.users_file_path(), config.auth.password.clone()));
        let router = ConversationRouter::new(transport, machine, allow_list);

        Ok(Self {
            config,
            router,
            lifecycle,
        })
    }

    /// The configuration the controller was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The message router
    pub fn router(&self) -> &ConversationRouter {
        &self.router
    }

    /// Token that stops the bot
    pub fn shutdown_token(&self) -> CancellationToken {
        self.router.shutdown_token()
    }

    /// Jobs currently holding a claim on the pod
    pub async fn active_jobs(&self) -> u64 {
        self.lifecycle.active_jobs().await
    }

    /// Run until the transport closes or the shutdown token fires
    pub async fn run(&self) -> Result<()> {
        info!("Storage directory: {:?}", self.config.storage_dir);
        self.router.run().await?;

        let remaining = self.active_jobs().await;
        if remaining > 0 {
            warn!("Stopped with {} job(s) still registered as active", remaining);
        }
        Ok(())
    }

    /// Run until Ctrl-C, then stop accepting messages and cancel running
    /// sessions
    pub async fn run_until_interrupted(&self) -> Result<()> {
        let shutdown = self.shutdown_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                shutdown.cancel();
            }
        });
        self.run().await
    }
}
