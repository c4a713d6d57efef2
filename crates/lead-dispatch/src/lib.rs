//! Lead scoring, assignment and dispatch engine.
//!
//! A lead moves through `new → qualified → assigned → dispatched` while the engine scores the
//! eligible companies, persists a ranked assignment set and notifies every assigned company.
//! The HTTP and CLI surfaces live in the `lead-dispatch-api` service.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
