//! `herald-core`: types shared by the scheduler, the poll aggregator and the gateway.
//!
//! The messaging network itself is out of reach of this workspace: everything
//! that talks to it goes through the [`messenger::Messenger`] trait.

pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod messenger;
pub mod outbound;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{HeraldError, Result};
pub use messenger::{Messenger, MessengerError};
