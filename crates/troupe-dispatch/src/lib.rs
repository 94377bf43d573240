//! # troupe-dispatch
//!
//! The coordination core: the [`Dispatcher`] pairs queued execution
//! requests with idle workers and fans their output out to the store and
//! the bus; the [`event_tick`] and [`trigger_tick`] processors feed it from
//! the event and trigger tables; [`prompt`] and [`materializer`] build the
//! prompt and environment each assignment carries.

#![deny(unsafe_code)]

pub mod cron;
pub mod dispatcher;
pub mod event_tick;
pub mod materializer;
pub mod matching;
pub mod prompt;
pub mod trigger_tick;

pub use dispatcher::{
    ActiveExecution, Dispatcher, DispatcherConfig, ExecutionView, WORKER_DISCONNECTED,
};
pub use matching::{match_event, source_filter_matches};
