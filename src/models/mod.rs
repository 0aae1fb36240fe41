//! Domain model module declarations.

pub mod action_log;
pub mod evidence;
pub mod finding;
pub mod job;
pub mod queue;
pub mod session;
