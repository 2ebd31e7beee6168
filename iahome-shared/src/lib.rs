//! # IAHome Shared Library
//!
//! This crate contains the types, persistence and access-control logic shared
//! by the IAHome API server and the maintenance worker.
//!
//! ## Module Organization
//!
//! - `models`: Database models (profiles, modules, grants, QR codes)
//! - `db`: Connection pool and embedded migrations
//! - `auth`: Session JWTs, module access tokens, passwords, secret tokens
//! - `access`: Module token + grant validation
//! - `usage`: Atomic per-grant usage counter
//! - `redis`: Redis client and chunked-upload session store

pub mod access;
pub mod auth;
pub mod db;
pub mod models;
pub mod redis;
pub mod usage;

/// Current version of the IAHome shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
