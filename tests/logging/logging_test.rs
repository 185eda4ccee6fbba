//! Tests for `src/logging.rs`.

use erp_kernel::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_file_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs").join("kernel");
    assert!(!logs_dir.exists());

    // Only one global subscriber per process; a second install returns Err
    // after the directory has been created.
    let _result = erp_kernel::logging::init_file(&logs_dir, "info");
    assert!(logs_dir.exists(), "logs directory should be created");
}
