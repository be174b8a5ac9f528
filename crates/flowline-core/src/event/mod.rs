//! Event bus for flow execution.
//!
//! Provides an `EventBus` that distributes `FlowEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
