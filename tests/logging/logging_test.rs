//! Tests for `src/logging.rs`.

use warden::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_daemon_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // The global subscriber can only be installed once per process, so a
    // second init in the same test binary returns an error. The directory
    // side effect is what this asserts.
    let _result = warden::logging::init_daemon(&logs_dir);
    assert!(logs_dir.exists(), "logs directory should be created");
}
