//! Baton: Dynamic Task Pipelines
//!
//! An in-process task queue with composable pipelines (chains, groups,
//! chords) and dynamic tasks that splice a returned pipeline into their own
//! place at runtime, inheriting the callbacks and chord or group
//! obligations of the invocation they replace.

pub mod app;
pub mod backend;
pub mod broker;
pub mod chord;
pub mod composition;
pub mod config;
pub mod context;
pub mod dynamic;
pub mod error;
pub mod logging;
pub mod registry;
pub mod signature;
pub mod types;
pub mod worker;
