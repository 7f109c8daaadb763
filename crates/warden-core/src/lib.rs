//! Warden core — approval-gated agent runtime.
//!
//! One turn flows: a user prompt starts a session, the agent loop drives
//! the language model, model-emitted tool scripts execute in the code-mode
//! runner, and every sensitive tool call suspends on a human decision in
//! the approval registry. Results stream back as session events.
//!
//! ## Components
//! - `tools` - namespaced tool tree with approval modes and input schemas
//! - `approval` - pending-decision bookkeeping, timeouts, rules
//! - `runner` - sandboxed tool-script execution with receipts
//! - `agent` - the bounded LM loop
//! - `session` - per-turn state, event fan-out, lifecycle
//! - `lm` - the language-model contract and adapters
//!
//! The HTTP surface lives in the `warden-server` crate; this crate is
//! transport-agnostic.

pub mod agent;
pub mod approval;
pub mod config;
pub mod error;
pub mod events;
pub mod lm;
pub mod runner;
pub mod session;
pub mod tools;
pub mod types;

pub use approval::{ApprovalRegistry, ResolveStatus, RuleSpec};
pub use config::RuntimeConfig;
pub use events::{EventSink, TurnEvent};
pub use session::{SessionManager, StartTurn};
pub use tools::{Tool, ToolRegistry};
pub use types::{ApprovalMode, Decision, FailReason, Receipt, TurnState};
