//! Core types and trait definitions for Waypoint learner progress tracking.
//!
//! This crate is deliberately free of database dependencies. It owns the
//! progress record, the status state machine, the storage contracts both
//! backends satisfy, the repository selector, and the legacy-to-relational
//! migration runner.

pub mod clock;
pub mod error;
pub mod memory;
pub mod migration;
pub mod model;
pub mod quiz;
pub mod selector;
pub mod status;
pub mod store;
pub mod tracker;

pub use error::{Error, Result};
