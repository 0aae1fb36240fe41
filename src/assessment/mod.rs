//! Assessment domain services.
//!
//! Covers the per-action authorization gate, the gated agent actions
//! (search/read/grep/evidence/finding), evidence span merging, session
//! batch carving, and the human review lifecycle operations.

pub mod action_gate;
pub mod actions;
pub mod evidence_merger;
pub mod factory;
pub mod review;
