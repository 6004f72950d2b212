use std::path::PathBuf;
use std::sync::Arc;

use herald_core::config::ZoneMode;
use herald_core::testing::RecordingMessenger;
use herald_core::{Clock, ManualClock};
use herald_scheduler::{
    Dispatcher, JobStore, NewSchedule, RunNow, SchedulePatch, Ticker, TickerConfig,
};
use rusqlite::Connection;
use serde_json::json;

const T0: i64 = 1_772_625_600_000; // Wed 2026-03-04 12:00 UTC

fn temp_db(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("herald-{name}-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

fn open(path: &PathBuf, clock: Arc<ManualClock>) -> JobStore {
    JobStore::new(Connection::open(path).unwrap(), clock, ZoneMode::Utc).unwrap()
}

#[test]
fn schedules_survive_reopen() {
    let path = temp_db("reopen");
    let clock = Arc::new(ManualClock::new(T0));

    let created = {
        let store = open(&path, clock.clone());
        store
            .create(
                NewSchedule::new("g1@g.us", "send", "text", "weekly", "FRI:08:30")
                    .with_label("standup")
                    .with_payload(json!({"text": "standup in 30"})),
            )
            .unwrap()
    };

    let store = open(&path, clock);
    let listed = store.list().unwrap();
    assert_eq!(listed, vec![created]);
    // Friday 2026-03-06 08:30 UTC.
    assert_eq!(listed[0].next_run_at, Some(1_772_785_800_000));

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn create_tick_patch_run_now_delete() {
    let clock = Arc::new(ManualClock::new(T0));
    let messenger = Arc::new(RecordingMessenger::new());
    let store = JobStore::open_in_memory(clock.clone(), ZoneMode::Utc).unwrap();
    let dispatcher = Arc::new(Dispatcher::with_default_routes(messenger.clone()));
    let ticker = Ticker::new(store, dispatcher, clock.clone(), TickerConfig::default());
    let store = ticker.store();

    let poll = store
        .create(
            NewSchedule::new("g1@g.us", "send-interactive", "custom_poll", "interval", 120.to_string())
                .with_payload(json!({"question": "Lunch?", "options": ["Pizza", "Sushi"]})),
        )
        .unwrap();

    // Not due yet.
    clock.advance_secs(60);
    assert!(ticker.tick().await.unwrap().outcomes.is_empty());

    // Due: fires once and the sent message is a poll.
    clock.advance_secs(61);
    let report = ticker.tick().await.unwrap();
    assert_eq!(report.fired(), 1);
    let sent = report.outcomes[0].sent.as_ref().unwrap();
    assert_eq!(sent.poll().unwrap().options, vec!["Pizza", "Sushi"]);
    let fired_at = clock.now_ms();
    assert_eq!(
        store.get(poll.id).unwrap().unwrap().next_run_at,
        Some(fired_at + 120_000)
    );

    // Switch to a daily slot; next run recomputed from now.
    let patched = store
        .patch(poll.id, SchedulePatch::recurrence("daily", "18:00"))
        .unwrap()
        .unwrap();
    assert_eq!(patched.next_run_at, Some(T0 + 6 * 3_600_000));

    // Fire immediately regardless of the slot.
    assert!(matches!(
        ticker.run_now(poll.id).await.unwrap(),
        RunNow::Fired(ref o) if o.success
    ));
    assert_eq!(messenger.sent_to("g1@g.us"), 2);

    assert!(store.remove(poll.id).unwrap());
    assert!(store.list().unwrap().is_empty());
    assert!(matches!(ticker.run_now(poll.id).await.unwrap(), RunNow::NotFound));
}
