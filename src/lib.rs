//! Huella - In-process call tracer with hook pipelines and trace export
//!
//! This library provides the core functionality for recording function
//! call and return events delivered by a host runtime, with support for
//! user hook dispatch, return-value verification, and Chrome trace-event
//! export.

pub mod clock;
pub mod event;
pub mod export;
pub mod hooks;
pub mod identity;
pub mod ledger;
pub mod registry;
pub mod session;
pub mod threads;
pub mod value;
pub mod verifier;
pub mod warnings;
