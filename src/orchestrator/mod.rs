//! Session orchestration modules.
//!
//! Covers the single-flight execution scheduler, the work dispatch
//! abstraction, the external agent process runner with its completion
//! monitor, and the stall-recovery sweep.

pub mod dispatch;
pub mod runner;
pub mod scheduler;
pub mod stall_sweep;
