/*!
 * Tests for error types and conversions
 */

use std::error::Error;
use std::time::Duration;
use whisperbot::errors::{
    DispatchError, PersistenceError, ProviderError, ProvisionError, SessionError, TransportError,
};

#[test]
fn test_providerError_apiError_shouldDisplayStatusAndMessage() {
    let error = ProviderError::ApiError {
        status_code: 502,
        message: "Bad gateway".to_string(),
    };
    let display = format!("{}", error);
    assert!(display.contains("502"));
    assert!(display.contains("Bad gateway"));
}

#[test]
fn test_providerError_capacityExhausted_shouldDisplayCorrectly() {
    let error = ProviderError::CapacityExhausted("not enough free GPUs".to_string());
    assert!(error.to_string().contains("Capacity exhausted"));
}

#[test]
fn test_dispatchError_fromProvisionError_shouldBeResourceUnavailable() {
    let provision = ProvisionError::NotRunning {
        attempts: 40,
        last_status: "EXITED".to_string(),
    };
    let error: DispatchError = provision.into();
    assert!(matches!(error, DispatchError::ResourceUnavailable(_)));
    let display = error.to_string();
    assert!(display.contains("not enough GPUs"));
    assert!(display.contains("40 attempts"));
    assert!(display.contains("EXITED"));
}

#[test]
fn test_dispatchError_timeout_shouldMentionAttempts() {
    let error = DispatchError::Timeout { attempts: 720 };
    assert!(error.to_string().contains("720"));
}

#[test]
fn test_transportError_timedOut_shouldDisplayDuration() {
    let error = TransportError::TimedOut(Duration::from_secs(60));
    assert!(error.to_string().contains("60s"));
}

#[test]
fn test_sessionError_fromTransportError_shouldWrapAsDownload() {
    let error: SessionError = TransportError::NoMedia.into();
    assert!(matches!(error, SessionError::Download(TransportError::NoMedia)));
    assert!(error.to_string().contains("download failed"));
}

#[test]
fn test_persistenceError_shouldNameThePath() {
    let error = PersistenceError {
        path: "/data/active_jobs.txt".to_string(),
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
    };
    let display = error.to_string();
    assert!(display.contains("/data/active_jobs.txt"));
    assert!(display.contains("denied"));
}

#[test]
fn test_sessionError_asAnyhow_shouldKeepTypedSourceForDowncast() {
    let error = anyhow::Error::from(SessionError::Download(TransportError::NoMedia))
        .context("Failed to handle upload");
    let session = error.downcast_ref::<SessionError>().unwrap();
    assert!(matches!(session, SessionError::Download(TransportError::NoMedia)));
    assert!(session.source().is_some());
}
