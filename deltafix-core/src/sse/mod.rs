//! Incremental handling of upstream server-sent event streams.
//!
//! Bytes flow `LineReader` -> `EventStream` -> `PatchState` -> client, one
//! event at a time; `Relay` ties the stages together for one response.

pub mod event;
pub mod lines;
pub mod patch;
pub mod relay;

pub use event::{DATA_FIELD, Event, EventStream};
pub use lines::LineReader;
pub use patch::{PatchOutcome, PatchState};
pub use relay::{Relay, RelayStats};
