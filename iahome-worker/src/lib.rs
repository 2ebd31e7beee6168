//! # IAHome Worker Library
//!
//! Periodic database maintenance for the IAHome gateway.
//!
//! ## Modules
//!
//! - `config`: Environment configuration
//! - `jobs`: Maintenance jobs (expire grants, purge reset tokens)
//! - `orchestrator`: The interval loop running the jobs

pub mod config;
pub mod jobs;
pub mod orchestrator;
