use std::sync::{Arc, Mutex, MutexGuard};

use herald_core::{config::ZoneMode, Clock};
use rusqlite::{types::Type, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    recurrence::{next_fire_ms, Recurrence},
    types::{NewSchedule, RecurrenceKind, ScheduleJob, SchedulePatch},
};

const SELECT_COLUMNS: &str = "SELECT id, label, target, category, message_type, payload,
        recurrence_kind, recurrence_value, enabled, next_run_at, last_run_at, created_at
     FROM schedules";

/// Durable CRUD for schedule rows; the only writer of `next_run_at` / `enabled`.
///
/// Cheap to clone: clones share one connection behind a mutex, so every
/// operation is atomic with respect to the ticker and the HTTP handlers.
#[derive(Clone)]
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    zone: ZoneMode,
}

impl JobStore {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection, clock: Arc<dyn Clock>, zone: ZoneMode) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
            zone,
        })
    }

    /// A store on a private in-memory database.
    pub fn open_in_memory(clock: Arc<dyn Clock>, zone: ZoneMode) -> Result<Self> {
        Self::new(Connection::open_in_memory()?, clock, zone)
    }

    pub fn zone(&self) -> ZoneMode {
        self.zone
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    /// All schedules, most recently created first.
    pub fn list(&self) -> Result<Vec<ScheduleJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC"
        ))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn get(&self, id: i64) -> Result<Option<ScheduleJob>> {
        let conn = self.lock()?;
        select_job(&conn, id)
    }

    /// Enabled rows whose `next_run_at` is at or before `now_ms`.
    pub fn due(&self, now_ms: i64) -> Result<Vec<ScheduleJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{SELECT_COLUMNS}
             WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at, id"
        ))?;
        let jobs = stmt
            .query_map([now_ms], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Validate `spec`, compute its first fire time and persist it enabled.
    #[instrument(skip(self, spec), fields(chat = %spec.target, kind = %spec.recurrence_kind))]
    pub fn create(&self, spec: NewSchedule) -> Result<ScheduleJob> {
        require("target", &spec.target)?;
        require("messageType", &spec.message_type)?;
        require("category", &spec.category)?;
        if spec.recurrence_kind.trim().is_empty() || spec.recurrence_value.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule(
                "recurrenceKind and recurrenceValue are required".to_string(),
            ));
        }
        let kind: RecurrenceKind = spec.recurrence_kind.parse()?;
        let recurrence = Recurrence::parse(kind, &spec.recurrence_value)?;

        let now = self.clock.now_ms();
        let next_run_at = next_fire_ms(&recurrence, now, self.zone)?;
        let payload = normalise_payload(spec.payload);
        let payload_json = serde_json::to_string(&payload)?;
        let label = spec.label.unwrap_or_default();
        let recurrence_value = spec.recurrence_value.trim().to_string();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO schedules
             (label, target, category, message_type, payload, recurrence_kind,
              recurrence_value, enabled, next_run_at, last_run_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, NULL, ?9)",
            rusqlite::params![
                label,
                spec.target,
                spec.category,
                spec.message_type,
                payload_json,
                kind.as_str(),
                recurrence_value,
                next_run_at,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(job_id = id, next_run_at, "schedule created");

        Ok(ScheduleJob {
            id,
            label,
            target: spec.target,
            category: spec.category,
            message_type: spec.message_type,
            payload,
            recurrence_kind: kind,
            recurrence_value,
            enabled: true,
            next_run_at: Some(next_run_at),
            last_run_at: None,
            created_at: now,
        })
    }

    /// Apply a partial update. Returns `None` when no such row exists.
    ///
    /// `run_now` only forces `next_run_at = 0`. Otherwise a recurrence change
    /// recomputes `next_run_at` from the current time and every other field is
    /// written verbatim.
    #[instrument(skip(self, patch), fields(job_id = id, run_now = patch.run_now))]
    pub fn patch(&self, id: i64, patch: SchedulePatch) -> Result<Option<ScheduleJob>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(mut job) = select_job(&tx, id)? else {
            return Ok(None);
        };

        if patch.run_now {
            tx.execute("UPDATE schedules SET next_run_at = 0 WHERE id = ?1", [id])?;
            tx.commit()?;
            job.next_run_at = Some(0);
            info!(job_id = id, "schedule forced due");
            return Ok(Some(job));
        }

        if patch.changes_recurrence() {
            let kind: RecurrenceKind = match patch.recurrence_kind.as_deref() {
                Some(kind) => kind.parse()?,
                None => job.recurrence_kind,
            };
            let value = patch
                .recurrence_value
                .as_deref()
                .unwrap_or(&job.recurrence_value)
                .trim()
                .to_string();
            let recurrence = Recurrence::parse(kind, &value)?;
            job.next_run_at = Some(next_fire_ms(&recurrence, self.clock.now_ms(), self.zone)?);
            job.recurrence_kind = kind;
            job.recurrence_value = value;
        }
        if let Some(label) = patch.label {
            job.label = label;
        }
        if let Some(target) = patch.target {
            require("target", &target)?;
            job.target = target;
        }
        if let Some(category) = patch.category {
            require("category", &category)?;
            job.category = category;
        }
        if let Some(message_type) = patch.message_type {
            require("messageType", &message_type)?;
            job.message_type = message_type;
        }
        if let Some(payload) = patch.payload {
            job.payload = normalise_payload(payload);
        }
        if let Some(enabled) = patch.enabled {
            job.enabled = enabled;
        }

        tx.execute(
            "UPDATE schedules
             SET label = ?1, target = ?2, category = ?3, message_type = ?4, payload = ?5,
                 recurrence_kind = ?6, recurrence_value = ?7, enabled = ?8, next_run_at = ?9
             WHERE id = ?10",
            rusqlite::params![
                job.label,
                job.target,
                job.category,
                job.message_type,
                serde_json::to_string(&job.payload)?,
                job.recurrence_kind.as_str(),
                job.recurrence_value,
                job.enabled,
                job.next_run_at,
                id,
            ],
        )?;
        tx.commit()?;
        info!(job_id = id, next_run_at = ?job.next_run_at, enabled = job.enabled, "schedule updated");
        Ok(Some(job))
    }

    /// Delete a row. Idempotent: returns whether a row was actually removed.
    #[instrument(skip(self))]
    pub fn remove(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM schedules WHERE id = ?1", [id])?;
        if n > 0 {
            info!(job_id = id, "schedule removed");
        } else {
            debug!(job_id = id, "remove: no such schedule");
        }
        Ok(n > 0)
    }

    /// Record a successful dispatch at `fired_at`.
    ///
    /// `once` rows are disabled; recurring rows get `next_run_at` recomputed
    /// from their current recurrence with `now = fired_at`. Returns `None`
    /// when the row was deleted while its dispatch was in flight.
    #[instrument(skip(self))]
    pub fn mark_fired(&self, id: i64, fired_at: i64) -> Result<Option<ScheduleJob>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(mut job) = select_job(&tx, id)? else {
            debug!(job_id = id, "mark_fired: schedule removed mid-dispatch");
            return Ok(None);
        };

        match job.recurrence_kind {
            RecurrenceKind::Once => {
                tx.execute(
                    "UPDATE schedules SET enabled = 0, last_run_at = ?1 WHERE id = ?2",
                    rusqlite::params![fired_at, id],
                )?;
                job.enabled = false;
            }
            kind => {
                let recurrence = Recurrence::parse(kind, &job.recurrence_value)?;
                let next = next_fire_ms(&recurrence, fired_at, self.zone)?;
                tx.execute(
                    "UPDATE schedules SET last_run_at = ?1, next_run_at = ?2 WHERE id = ?3",
                    rusqlite::params![fired_at, next, id],
                )?;
                job.next_run_at = Some(next);
            }
        }
        tx.commit()?;
        job.last_run_at = Some(fired_at);
        Ok(Some(job))
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SchedulerError::InvalidJob(format!("{field} is required")));
    }
    Ok(())
}

fn normalise_payload(payload: Value) -> Value {
    match payload {
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

fn select_job(conn: &Connection, id: i64) -> Result<Option<ScheduleJob>> {
    let job = conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id], row_to_job)
        .optional()?;
    Ok(job)
}

/// Map a SQLite row to a `ScheduleJob`.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleJob> {
    let payload_json: String = row.get(5)?;
    let payload: Value = serde_json::from_str(&payload_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    let kind_str: String = row.get(6)?;
    let recurrence_kind: RecurrenceKind = kind_str
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    Ok(ScheduleJob {
        id: row.get(0)?,
        label: row.get(1)?,
        target: row.get(2)?,
        category: row.get(3)?,
        message_type: row.get(4)?,
        payload,
        recurrence_kind,
        recurrence_value: row.get(7)?,
        enabled: row.get(8)?,
        next_run_at: row.get(9)?,
        last_run_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::next_fire_time;
    use herald_core::ManualClock;
    use serde_json::json;

    const T0: i64 = 1_772_625_600_000; // 2026-03-04T12:00:00Z

    fn store() -> (JobStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let store = JobStore::open_in_memory(clock.clone(), ZoneMode::Utc).unwrap();
        (store, clock)
    }

    fn text_job(kind: &str, value: &str) -> NewSchedule {
        NewSchedule::new("123@s.whatsapp.net", "send", "text", kind, value)
            .with_payload(json!({"text": "hi"}))
    }

    #[test]
    fn create_computes_next_run_and_enables() {
        let (store, _) = store();
        let job = store.create(text_job("interval", "60")).unwrap();
        assert!(job.enabled);
        assert_eq!(job.next_run_at, Some(T0 + 60_000));
        assert_eq!(job.created_at, T0);
        assert_eq!(store.get(job.id).unwrap(), Some(job));
    }

    #[test]
    fn create_rejects_missing_fields_and_bad_values() {
        let (store, _) = store();
        let mut no_target = text_job("daily", "09:00");
        no_target.target = String::new();
        assert!(matches!(store.create(no_target), Err(SchedulerError::InvalidJob(_))));

        let mut no_type = text_job("daily", "09:00");
        no_type.message_type = " ".into();
        assert!(matches!(store.create(no_type), Err(SchedulerError::InvalidJob(_))));

        assert!(matches!(
            store.create(text_job("daily", "")),
            Err(SchedulerError::InvalidSchedule(_))
        ));
        assert!(matches!(
            store.create(text_job("daily", "9am")),
            Err(SchedulerError::InvalidSchedule(_))
        ));
        assert!(matches!(
            store.create(text_job("monthly", "1")),
            Err(SchedulerError::UnknownRecurrenceKind(_))
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn list_is_newest_first() {
        let (store, clock) = store();
        let a = store.create(text_job("interval", "60")).unwrap();
        clock.advance_secs(1);
        let b = store.create(text_job("interval", "60")).unwrap();
        let ids: Vec<i64> = store.list().unwrap().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn patch_recurrence_recomputes_next_run() {
        let (store, clock) = store();
        let job = store.create(text_job("interval", "60")).unwrap();
        clock.advance_secs(30);
        let now = clock.now_ms();

        store
            .patch(job.id, SchedulePatch::recurrence("daily", "09:00"))
            .unwrap()
            .unwrap();
        let listed = store.list().unwrap().remove(0);
        let expected = next_fire_time("daily", "09:00", now, ZoneMode::Utc).unwrap();
        assert_eq!(listed.next_run_at, Some(expected));
        assert_eq!(listed.recurrence_kind, RecurrenceKind::Daily);
        assert_eq!(listed.recurrence_value, "09:00");
    }

    #[test]
    fn patch_value_only_keeps_kind() {
        let (store, _) = store();
        let job = store.create(text_job("interval", "60")).unwrap();
        let patch = SchedulePatch {
            recurrence_value: Some("120".into()),
            ..SchedulePatch::default()
        };
        let updated = store.patch(job.id, patch).unwrap().unwrap();
        assert_eq!(updated.recurrence_kind, RecurrenceKind::Interval);
        assert_eq!(updated.next_run_at, Some(T0 + 120_000));
    }

    #[test]
    fn patch_unrelated_fields_keeps_next_run() {
        let (store, clock) = store();
        let job = store.create(text_job("interval", "60")).unwrap();
        clock.advance_secs(45);

        let patch = SchedulePatch {
            label: Some("renamed".into()),
            payload: Some(json!({"text": "bye"})),
            enabled: Some(false),
            ..SchedulePatch::default()
        };
        let updated = store.patch(job.id, patch).unwrap().unwrap();
        assert_eq!(updated.next_run_at, job.next_run_at);
        assert_eq!(updated.label, "renamed");
        assert!(!updated.enabled);
        assert_eq!(store.get(job.id).unwrap().unwrap(), updated);
    }

    #[test]
    fn patch_with_bad_recurrence_changes_nothing() {
        let (store, _) = store();
        let job = store.create(text_job("interval", "60")).unwrap();
        let patch = SchedulePatch {
            label: Some("x".into()),
            recurrence_kind: Some("weekly".into()),
            recurrence_value: Some("NOPE:10:00".into()),
            ..SchedulePatch::default()
        };
        assert!(store.patch(job.id, patch).is_err());
        assert_eq!(store.get(job.id).unwrap().unwrap(), job);
    }

    #[test]
    fn run_now_forces_zero_and_nothing_else() {
        let (store, _) = store();
        let job = store.create(text_job("daily", "09:00")).unwrap();
        let patch = SchedulePatch {
            run_now: true,
            label: Some("ignored".into()),
            ..SchedulePatch::default()
        };
        let updated = store.patch(job.id, patch).unwrap().unwrap();
        assert_eq!(updated.next_run_at, Some(0));
        assert_eq!(updated.label, "");
        assert_eq!(store.due(T0).unwrap().len(), 1);
    }

    #[test]
    fn patch_missing_row_is_none() {
        let (store, _) = store();
        assert!(store.patch(42, SchedulePatch::enabled(false)).unwrap().is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let (store, _) = store();
        let job = store.create(text_job("interval", "60")).unwrap();
        assert!(store.remove(job.id).unwrap());
        assert!(!store.remove(job.id).unwrap());
        assert!(store.get(job.id).unwrap().is_none());
    }

    #[test]
    fn due_only_returns_enabled_rows_at_or_before_now() {
        let (store, _) = store();
        let past = store.create(text_job("once", "2020-01-01T00:00:00Z")).unwrap();
        let future = store.create(text_job("interval", "3600")).unwrap();
        let disabled = store.create(text_job("once", "2020-01-01T00:00:00Z")).unwrap();
        store.patch(disabled.id, SchedulePatch::enabled(false)).unwrap();

        let due: Vec<i64> = store.due(T0).unwrap().iter().map(|j| j.id).collect();
        assert_eq!(due, vec![past.id]);
        assert!(store.due(T0 + 3_600_000).unwrap().iter().any(|j| j.id == future.id));
    }

    #[test]
    fn mark_fired_disables_once_jobs() {
        let (store, _) = store();
        let job = store.create(text_job("once", "2020-01-01T00:00:00Z")).unwrap();
        let fired = store.mark_fired(job.id, T0 + 5).unwrap().unwrap();
        assert!(!fired.enabled);
        assert_eq!(fired.last_run_at, Some(T0 + 5));
        assert!(store.due(i64::MAX).unwrap().is_empty());
    }

    #[test]
    fn mark_fired_reschedules_from_fire_time() {
        let (store, _) = store();
        let job = store.create(text_job("interval", "60")).unwrap();
        let fired_at = T0 + 61_000;
        let fired = store.mark_fired(job.id, fired_at).unwrap().unwrap();
        assert_eq!(fired.next_run_at, Some(fired_at + 60_000));
        assert_eq!(fired.last_run_at, Some(fired_at));
        assert!(fired.enabled);
    }

    #[test]
    fn mark_fired_on_removed_row_is_none() {
        let (store, _) = store();
        assert!(store.mark_fired(9, T0).unwrap().is_none());
    }

    #[test]
    fn payload_defaults_to_empty_object() {
        let (store, _) = store();
        let job = store
            .create(NewSchedule::new("c@s", "send", "disappear_on", "interval", "60"))
            .unwrap();
        assert_eq!(job.payload, json!({}));
        assert_eq!(store.get(job.id).unwrap().unwrap().payload, json!({}));
    }
}
