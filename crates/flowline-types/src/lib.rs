//! Shared domain types for Flowline.
//!
//! This crate contains the types shared between the engine, the CLI and any
//! embedding application: error enums, flow events, engine configuration and
//! the declarative flow definition IR.
//!
//! Zero runtime dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod definition;
pub mod error;
pub mod event;
