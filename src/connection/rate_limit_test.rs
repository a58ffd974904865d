use std::time::{Duration, Instant};

use super::*;

#[test]
fn allows_events_under_the_cap() {
    let limiter = RateLimiter::new(3, 10);
    let conn = Uuid::new_v4();
    let now = Instant::now();
    assert!(limiter.check_event_at(conn, now).is_ok());
    assert!(limiter.check_event_at(conn, now).is_ok());
    assert!(limiter.check_event_at(conn, now).is_ok());
}

#[test]
fn rejects_once_the_cap_is_reached_within_the_window() {
    let limiter = RateLimiter::new(2, 10);
    let conn = Uuid::new_v4();
    let now = Instant::now();
    limiter.check_event_at(conn, now).unwrap();
    limiter.check_event_at(conn, now).unwrap();
    assert!(matches!(limiter.check_event_at(conn, now), Err(RateLimitError::EventRateExceeded(2))));
}

#[test]
fn window_slides_and_frees_capacity() {
    let limiter = RateLimiter::new(1, 10);
    let conn = Uuid::new_v4();
    let t0 = Instant::now();
    limiter.check_event_at(conn, t0).unwrap();
    assert!(limiter.check_event_at(conn, t0).is_err());

    let later = t0 + Duration::from_millis(1100);
    assert!(limiter.check_event_at(conn, later).is_ok());
}

#[test]
fn cursor_bucket_is_independent_of_the_event_bucket() {
    let limiter = RateLimiter::new(1, 2);
    let conn = Uuid::new_v4();
    let now = Instant::now();
    limiter.check_event_at(conn, now).unwrap();
    assert!(limiter.check_event_at(conn, now).is_err());

    // The event bucket is exhausted, but cursor has its own budget.
    assert!(limiter.check_cursor_at(conn, now).is_ok());
    assert!(limiter.check_cursor_at(conn, now).is_ok());
    assert!(limiter.check_cursor_at(conn, now).is_err());
}

#[test]
fn different_connections_do_not_share_a_bucket() {
    let limiter = RateLimiter::new(1, 10);
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let now = Instant::now();
    limiter.check_event_at(a, now).unwrap();
    assert!(limiter.check_event_at(b, now).is_ok());
}

#[test]
fn remove_clears_a_connections_counters() {
    let limiter = RateLimiter::new(1, 10);
    let conn = Uuid::new_v4();
    let now = Instant::now();
    limiter.check_event_at(conn, now).unwrap();
    limiter.remove(conn);
    assert!(limiter.check_event_at(conn, now).is_ok());
}
