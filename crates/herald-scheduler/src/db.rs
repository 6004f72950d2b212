use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `schedules` table (idempotent) and an index covering the
/// due-job query so a tick stays cheap with thousands of rows.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedules (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            label            TEXT    NOT NULL DEFAULT '',
            target           TEXT    NOT NULL,
            category         TEXT    NOT NULL,
            message_type     TEXT    NOT NULL,
            payload          TEXT    NOT NULL DEFAULT '{}',  -- JSON
            recurrence_kind  TEXT    NOT NULL,               -- once|daily|weekly|interval
            recurrence_value TEXT    NOT NULL,
            enabled          INTEGER NOT NULL DEFAULT 1,
            next_run_at      INTEGER,                        -- epoch ms or NULL
            last_run_at      INTEGER,                        -- epoch ms or NULL
            created_at       INTEGER NOT NULL
        ) STRICT;

        -- Due-job polling: WHERE enabled = 1 AND next_run_at <= ?
        CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules (enabled, next_run_at);
        ",
    )?;
    Ok(())
}
