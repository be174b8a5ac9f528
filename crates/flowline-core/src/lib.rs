//! In-process flow engine for Flowline.
//!
//! Callers compose synchronous steps, asynchronous operations, sequences and
//! parallel groups into a tree and run it as one flow with a single shared
//! context, one overall-success callback and one overall-failure callback.
//! This crate depends only on `flowline-types`; logging setup lives in
//! `flowline-observe`.

pub mod config;
pub mod event;
pub mod flow;

pub use flow::{
    ActionRegistry, Environment, FlowEngine, FlowHandle, FlowNode, FlowRun, Parallel, Plain,
    Sequence, SharedContext, Singular, Terminal, action_fn,
};
