use std::io;
use std::time::{Duration, Instant};

use conduit::server::failure::{DefaultFailureHandler, FailureHandler, Retry};

fn handler(max_retries: u32) -> DefaultFailureHandler {
    DefaultFailureHandler::new(
        Duration::from_millis(300),
        max_retries,
        Duration::from_secs(300),
    )
}

#[test]
fn test_defaults() {
    let mut handler = DefaultFailureHandler::default();
    let now = Instant::now();
    assert_eq!(handler.failed_at(now), Retry::After(Duration::from_millis(300)));
}

#[test]
fn test_backoff_grows_exponentially() {
    let mut handler = handler(10);
    let now = Instant::now();

    assert_eq!(handler.failed_at(now), Retry::After(Duration::from_millis(300)));
    assert_eq!(handler.failed_at(now), Retry::After(Duration::from_millis(600)));
    assert_eq!(handler.failed_at(now), Retry::After(Duration::from_millis(1200)));
    assert_eq!(handler.retries(), 3);
}

#[test]
fn test_gives_up_after_max_retries() {
    let mut handler = handler(3);
    let now = Instant::now();

    for _ in 0..3 {
        assert!(matches!(handler.failed_at(now), Retry::After(_)));
    }
    assert_eq!(handler.failed_at(now), Retry::GiveUp);
}

#[test]
fn test_run_resets_after_interval() {
    let mut handler = DefaultFailureHandler::new(
        Duration::from_millis(10),
        2,
        Duration::from_secs(60),
    );
    let start = Instant::now();

    handler.failed_at(start);
    handler.failed_at(start + Duration::from_secs(1));
    assert_eq!(handler.retries(), 2);

    // First failure of the run is now older than the reset interval
    let later = start + Duration::from_secs(61);
    assert_eq!(handler.failed_at(later), Retry::After(Duration::from_millis(10)));
    assert_eq!(handler.retries(), 1);
}

#[test]
fn test_success_resets_retry_counter() {
    let mut handler = handler(2);
    let error = io::Error::from(io::ErrorKind::ConnectionAborted);

    assert!(matches!(handler.failed(&error), Retry::After(_)));
    assert!(matches!(handler.failed(&error), Retry::After(_)));
    handler.succeeded();
    assert_eq!(handler.retries(), 0);
    assert_eq!(handler.failed(&error), Retry::After(Duration::from_millis(300)));
}

#[test]
fn test_delay_is_capped_by_reset_interval() {
    let mut handler = DefaultFailureHandler::new(
        Duration::from_secs(10),
        100,
        Duration::from_secs(30),
    );
    let now = Instant::now();

    for _ in 0..5 {
        handler.failed_at(now);
    }
    assert_eq!(handler.failed_at(now), Retry::After(Duration::from_secs(30)));
}
