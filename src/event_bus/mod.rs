//! Structured event plumbing for workflow runs.
//!
//! Nodes and the runner push [`Event`]s through a shared intake channel; a
//! background listener fans them out to registered [`EventSink`]s and to
//! broadcast [`EventStream`] subscriptions. The stream surface is what
//! `App::stream` hands to callers: a finite feed of per-superstep
//! [`Event::Step`] payloads terminated by a [`STREAM_END_SCOPE`]
//! diagnostic.

mod bus;
mod emitter;
mod event;
mod sink;

pub use bus::{DEFAULT_BROADCAST_CAPACITY, EventBus, EventStream};
pub use emitter::{BusEmitter, EmitterError, EventEmitter};
pub use event::{DiagnosticEvent, Event, NodeEvent, STREAM_END_SCOPE, StepEvent};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
