//! Sessions: which slides are open on the connection and under which slot.

mod registry;

pub use registry::{Assignment, OpenOutcome, SessionRegistry, SlotState, DEFAULT_SLOT_CAPACITY};
