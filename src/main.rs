// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{info, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::path::PathBuf;

use whisperbot::app_config::{self, Config};
use whisperbot::app_controller::Controller;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bot (default command)
    Run,

    /// Write a default configuration file and exit
    InitConfig,

    /// Generate shell completions for whisperbot
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// whisperbot - audio transcription chat bot
///
/// Accepts audio uploads over Telegram, runs WhisperX transcription with
/// speaker diarization on a shared RunPod GPU pod and sends the transcript
/// back. The pod is started for the first job and paused after the last.
#[derive(Parser, Debug)]
#[command(name = "whisperbot")]
#[command(version)]
#[command(about = "Telegram transcription bot on a shared GPU pod")]
#[command(long_about = "whisperbot accepts audio over Telegram and transcribes it with WhisperX on a shared GPU pod.

EXAMPLES:
    whisperbot                                  # Run with conf.json
    whisperbot -c /etc/whisperbot.json run      # Run with another config file
    whisperbot --log-level debug                # Run with debug logging
    whisperbot init-config                      # Write a default conf.json
    whisperbot completions bash > whisperbot.bash

CONFIGURATION:
    Configuration is stored in conf.json by default. If the file doesn't
    exist, a default one is created. Secrets can also be given through the
    environment variables listed below, which override the file.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", global = true)]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,

    /// Directory for audio, transcripts and state files
    #[arg(long, env = "WHISPERBOT_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Password new users must send
    #[arg(long, env = "BOT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// RunPod API key
    #[arg(long, env = "RUNPOD_API_KEY", hide_env_values = true)]
    runpod_api_key: Option<String>,

    /// RunPod pod id
    #[arg(long, env = "RUNPOD_POD_ID")]
    pod_id: Option<String>,

    /// Base URL of the WhisperX server on the pod
    #[arg(long, env = "WORKER_ENDPOINT_URL")]
    worker_url: Option<String>,

    /// Hugging Face token forwarded to WhisperX for diarization
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,

    /// API key of the language detection service
    #[arg(long, env = "LANGUAGE_DETECTION_API_KEY", hide_env_values = true)]
    detection_api_key: Option<String>,
}

impl CommandLineOptions {
    /// Apply command line and environment overrides to the loaded config
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = dir.clone();
        }
        if let Some(token) = &self.bot_token {
            config.telegram.bot_token = token.clone();
        }
        if let Some(password) = &self.password {
            config.auth.password = password.clone();
        }
        if let Some(key) = &self.runpod_api_key {
            config.compute.api_key = key.clone();
        }
        if let Some(pod_id) = &self.pod_id {
            config.compute.pod_id = pod_id.clone();
        }
        if let Some(url) = &self.worker_url {
            config.worker.endpoint = url.clone();
        }
        if let Some(token) = &self.hf_token {
            config.worker.hf_token = token.clone();
        }
        if let Some(key) = &self.detection_api_key {
            config.language_detection.api_key = key.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone().into();
        }
    }
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(LevelFilter::Trace));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI colour for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }

    // @returns: Emoji prefix for log level
    fn emoji_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "❌",
            Level::Warn => "🚧",
            Level::Info => "✅",
            Level::Debug => "🔍",
            Level::Trace => "📋",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let _ = writeln!(
                std::io::stderr(),
                "{}{} {} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                Self::emoji_for_level(record.level()),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Info until the config says otherwise
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();
    if let Some(level) = &cli.log_level {
        let level: app_config::LogLevel = level.clone().into();
        log::set_max_level(level.to_level_filter());
    }

    match cli.command {
        Some(Commands::Completions { shell }) => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "whisperbot", &mut std::io::stdout());
            Ok(())
        }
        Some(Commands::InitConfig) => {
            Config::default().save(&cli.config_path)?;
            info!("Default configuration written to {}", cli.config_path.display());
            Ok(())
        }
        Some(Commands::Run) | None => run_bot(&cli).await,
    }
}

async fn run_bot(cli: &CommandLineOptions) -> Result<()> {
    let mut config = Config::load_or_create(&cli.config_path)?;
    cli.apply_overrides(&mut config);
    config.validate().context("Configuration validation failed")?;
    log::set_max_level(config.log_level.to_level_filter());

    let controller = Controller::with_config(config)?;
    controller.run_until_interrupted().await
}
