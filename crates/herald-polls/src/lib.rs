pub mod aggregator;
pub mod error;
pub mod registry;
pub mod types;

pub use aggregator::VoteAggregator;
pub use error::{PollError, Result};
pub use registry::PollRegistry;
pub use types::{ActivePoll, MessageUpdate, OptionTally, PollSession, PollTally, UpsertBatch};
