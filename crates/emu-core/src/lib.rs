//! Core timing primitives for cycle-accurate emulation.
//!
//! Everything is sequenced by the event wheel in units of the chipset's
//! colour clock. Components never poll; they arm a slot and get called back
//! when the machine advances past the trigger cycle.

mod component;
mod cycle;
mod wheel;

pub use component::Component;
pub use cycle::Cycle;
pub use wheel::{Event, EventKind, EventSlot, EventWheel, PendingEvent, SchedulerError, NEVER};
