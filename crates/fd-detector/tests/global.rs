//! The global detector is per process, so its entry points get their own
//! test binary and a single test.

use fd_detector::{global, initialize_monitor, stop_monitoring_all, ErrorKind, FailureDetectorError};

#[test]
fn global_entry_points() {
    assert!(!global().is_initialized());

    let err = initialize_monitor(-1).unwrap_err();
    assert!(matches!(err, FailureDetectorError::InvalidEpoch));
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let channel = initialize_monitor(80085).unwrap();
    assert!(channel.try_recv().is_none());
    assert_eq!(global().epoch(), Some(80085));

    for epoch in [80085, 1, -1] {
        let err = initialize_monitor(epoch).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
    assert_eq!(global().epoch(), Some(80085));

    assert!(!global().is_monitoring_disabled());
    stop_monitoring_all();
    assert!(global().is_monitoring_disabled());
}
