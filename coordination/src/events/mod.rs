//! Event-driven coordination plumbing.
//!
//! Every lifecycle, cleanup, and consensus decision is announced as a typed
//! event on a broadcast bus. Components subscribe for the events they care
//! about (the signal protocol watches for `coordinator:dead`, for example),
//! and an audit relay mirrors everything onto the store's pub/sub channel
//! for external observers.
//!
//! Events are a closed enum: there is no string-keyed listener registration,
//! so a typo in an event name is a compile error, not a silent no-op.

pub mod bus;
pub mod types;

pub use bus::{
    AuditRelay, EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter,
    FilteredReceiver, SharedEventBus,
};
pub use types::{AuditRecord, CoordinationEvent, EventId, ExclusionReason};
