//! Run execution engine.
//!
//! Contains the process-wide queue worker that claims queued runs across
//! every indicator kind, scores them and writes the outcome back to the
//! store.

pub mod worker;

pub use worker::RunQueueWorker;
