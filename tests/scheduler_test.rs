//! Scheduler eligibility against a manual clock

mod common;

use chrono::{Duration, TimeZone, Utc};

use call_learner::scheduler::StateStore;
use common::*;

#[tokio::test]
async fn test_first_start_runs_then_waits_for_cron() -> anyhow::Result<()> {
    let h = Harness::seeded();
    let mut records = routine_calls(37, now());
    records.extend(issue_calls(now()));
    h.source.set(records);

    let scheduler = h.scheduler();
    assert!(scheduler.is_eligible(now()));
    assert!(scheduler.run_if_due().await?.is_some());

    let next = StateStore::new(h.dir.path())
        .load()
        .next_eligible_run
        .expect("next run scheduled");
    assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 11, 3, 0, 0).unwrap());

    h.clock.advance(Duration::hours(2));
    assert!(scheduler.run_if_due().await?.is_none());

    h.clock.set(next);
    let report = scheduler.run_if_due().await?.expect("eligible at cron time");
    assert_eq!(report.window.map(|w| w.start), Some(now()));
    Ok(())
}

#[tokio::test]
async fn test_manual_trigger_ignores_eligibility() -> anyhow::Result<()> {
    let h = Harness::seeded();
    let scheduler = h.scheduler();

    scheduler.trigger_now().await?;
    assert!(!scheduler.is_eligible(now()));

    let report = scheduler.trigger_now().await?;
    assert_eq!(report.outcome.status(), "insufficient_data");
    assert_eq!(StateStore::new(h.dir.path()).load().last_attempt_at, Some(now()));
    Ok(())
}
