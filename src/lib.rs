#![forbid(unsafe_code)]

//! `assessd` — compliance assessment orchestration engine.
//!
//! Coordinates long-running agent sessions over a bounded batch of
//! compliance-control findings: a validated session state machine, a
//! single-flight execution queue, an external agent process runner,
//! and a stall-recovery sweep that keeps the pipeline moving.

pub mod assessment;
pub mod backend;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
