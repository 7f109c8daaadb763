//! The bounded turn loop.
//!
//! Converts a user prompt into a final assistant message by iterating
//! {LM call → maybe code run} under step, per-step and total budgets.

pub mod driver;

pub use driver::{TurnDriver, TurnOutcome};
