//! `herald-scheduler`: persistent recurring message scheduler on SQLite.
//!
//! # Overview
//!
//! Schedules live in a SQLite `schedules` table owned by [`store::JobStore`].
//! The [`ticker::Ticker`] runs one reconciliation pass per minute (plus a
//! catch-up pass shortly after start): every enabled row whose `next_run_at`
//! has arrived is handed to the [`dispatch::Dispatcher`], which turns it into
//! exactly one send on the messaging collaborator.
//!
//! # Recurrence kinds
//!
//! | Kind       | Value          | Next fire time                                  |
//! |------------|----------------|-------------------------------------------------|
//! | `once`     | timestamp      | the instant itself (past instants are due now)  |
//! | `daily`    | `HH:MM`        | today at that time, else tomorrow               |
//! | `weekly`   | `DAY:HH:MM`    | next such weekday/time, up to 7 days ahead      |
//! | `interval` | seconds        | `now + seconds`, measured from the last fire    |

pub mod db;
pub mod dispatch;
pub mod error;
pub mod recurrence;
pub mod store;
pub mod ticker;
pub mod types;

pub use dispatch::{DispatchError, Dispatcher};
pub use error::{Result, SchedulerError};
pub use store::JobStore;
pub use ticker::{FireOutcome, RunNow, TickReport, Ticker, TickerConfig};
pub use types::{NewSchedule, RecurrenceKind, ScheduleJob, SchedulePatch};
