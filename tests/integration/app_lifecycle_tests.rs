/*!
 * Integration tests for application lifecycle
 */

use anyhow::Result;
use std::sync::Arc;
use tokio_test;
use whisperbot::app_controller::Controller;
use whisperbot::providers::mock::{MockComputeResource, MockLanguageDetector, MockWorker};
use whisperbot::transport::mock::MockTransport;

use crate::common;

/// Test the controller initialization against the real service clients
#[test]
fn test_controller_initialization_withTestConfig_shouldPrepareStorage() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let storage = temp_dir.path().join("files");
    let mut config = common::test_config(&storage);
    config.storage_dir = storage.clone();

    let controller = Controller::with_config(config)?;

    assert!(storage.is_dir());
    assert_eq!(std::fs::read_to_string(controller.config().registry_file_path())?, "0");
    assert_eq!(tokio_test::block_on(controller.active_jobs()), 0);
    Ok(())
}

/// Test that a stale count is resumed when reset is disabled
#[test]
fn test_controller_withoutReset_shouldResumePersistedCount() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let mut config = common::test_config(temp_dir.path());
    config.registry.reset_on_start = false;
    std::fs::write(config.registry_file_path(), "3")?;

    let controller = Controller::with_config(config.clone())?;
    assert_eq!(tokio_test::block_on(controller.active_jobs()), 3);

    // The default start-up zeroes it again
    config.registry.reset_on_start = true;
    let controller = Controller::with_config(config)?;
    assert_eq!(tokio_test::block_on(controller.active_jobs()), 0);
    Ok(())
}

/// Test a run over a transport that is already closed
#[test]
fn test_run_withClosedTransport_shouldReturnCleanly() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let transport = Arc::new(MockTransport::new());
    transport.close();

    let controller = Controller::with_services(
        common::test_config(temp_dir.path()),
        transport.clone(),
        Arc::new(MockComputeResource::stopped()),
        Arc::new(MockWorker::new("")),
        Arc::new(MockLanguageDetector::detecting("en")),
    )?;

    let result = tokio_test::block_on(async { controller.run().await });

    assert!(result.is_ok(), "Run should end when the transport closes");
    assert!(transport.sent().is_empty());
    Ok(())
}
