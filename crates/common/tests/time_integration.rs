//! Integration tests for the `time` and `resilience` modules.
//!
//! Drives schedules with the mock clock the way the collection scheduler
//! does: fire, complete, compute the next due time, back off on failure.

#![cfg(feature = "runtime")]

use std::time::Duration;

use chrono::{TimeZone, Utc};
use dora_common::{Clock, ExponentialBackoff, Jitter, MockClock, Schedule};

#[test]
fn interval_schedule_skips_fires_missed_during_a_long_run() {
    let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
    let schedule = Schedule::parse("15m").unwrap();

    // run started at 09:00 and took 40 minutes
    clock.advance(Duration::from_secs(40 * 60));
    let next = schedule.next_after(clock.now()).unwrap();

    assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 9, 55, 0).unwrap());
}

#[test]
fn cron_schedule_aligns_to_wall_clock_after_completion() {
    let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 7, 13).unwrap());
    let schedule = Schedule::parse("*/30 * * * *").unwrap();

    let next = schedule.next_after(clock.now()).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
    assert_eq!(schedule.period_after(clock.now()), Some(Duration::from_secs(30 * 60)));
}

#[test]
fn weekday_cron_uses_or_semantics_with_day_of_month() {
    // the 1st of the month or any Monday
    let schedule = Schedule::parse("0 6 1 * 1").unwrap();
    let friday = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap();

    assert_eq!(schedule.next_after(friday), Some(Utc.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).unwrap()));
}

#[test]
fn backoff_delays_stay_within_bounds_across_retries() {
    let backoff = ExponentialBackoff::new(Duration::from_secs(30), Duration::from_secs(300));
    let raw: Vec<_> = (1..=6).map(|retry| backoff.raw_delay(retry).as_secs()).collect();
    assert_eq!(raw, vec![30, 60, 120, 240, 300, 300]);

    let jittered = backoff.with_jitter(Jitter::Full);
    for retry in 1..=6 {
        assert!(jittered.delay(retry) <= backoff.raw_delay(retry));
    }
}
