//! Timestamp tests

use hubload_core::Timestamp;
use serde_json::json;
use std::time::Duration;

#[test]
fn test_timestamp_now() {
    let ts = Timestamp::now();
    assert!(ts.as_micros() > 0);
}

#[test]
fn test_timestamp_from_micros() {
    let ts = Timestamp::from_micros(1234567890);
    assert_eq!(ts.as_micros(), 1234567890);
}

#[test]
fn test_timestamp_arithmetic() {
    let ts1 = Timestamp::from_micros(1000);
    let ts2 = Timestamp::from_micros(500);

    assert_eq!(ts1.duration_since(&ts2), Duration::from_micros(500));
    assert_eq!(ts2.duration_since(&ts1), Duration::ZERO);
}

#[test]
fn test_millis_since_is_fractional() {
    let sent = Timestamp::from_micros(10_000);
    let received = Timestamp::from_micros(12_500);

    assert!((received.millis_since(&sent) - 2.5).abs() < f64::EPSILON);
}

#[test]
fn test_timestamp_from_argument() {
    assert_eq!(
        Timestamp::from_value(&json!(1_700_000_000_000_000u64)),
        Some(Timestamp::from_micros(1_700_000_000_000_000))
    );
    assert_eq!(
        Timestamp::from_value(&json!(42.0)),
        Some(Timestamp::from_micros(42))
    );
    assert_eq!(Timestamp::from_value(&json!("2024-01-01T00:00:00Z")), None);
    assert_eq!(Timestamp::from_value(&json!(-1.0)), None);
}

#[test]
fn test_timestamp_value_roundtrip() {
    let ts = Timestamp::from_micros(987654321);
    assert_eq!(Timestamp::from_value(&ts.to_value()), Some(ts));
}
