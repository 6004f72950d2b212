use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The store's connection mutex was poisoned by a panicking writer.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// The recurrence value does not parse for its kind.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The recurrence kind is not one of once/daily/weekly/interval.
    #[error("Unknown recurrence kind: {0}")]
    UnknownRecurrenceKind(String),

    /// A required schedule field is missing or empty.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Payload could not be encoded or decoded as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl From<SchedulerError> for herald_core::HeraldError {
    fn from(e: SchedulerError) -> Self {
        use herald_core::HeraldError;
        match e {
            SchedulerError::Database(_) | SchedulerError::LockPoisoned => {
                HeraldError::Database(e.to_string())
            }
            SchedulerError::InvalidSchedule(msg)
            | SchedulerError::UnknownRecurrenceKind(msg)
            | SchedulerError::InvalidJob(msg) => HeraldError::InvalidSchedule(msg),
            SchedulerError::Serialization(e) => HeraldError::Serialization(e),
        }
    }
}
