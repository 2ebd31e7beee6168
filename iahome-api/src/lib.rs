//! # IAHome API Server Library
//!
//! Access gateway for IAHome modules: accounts, catalog, grants, module
//! tokens, usage quotas, the authenticated reverse proxy, QR codes and
//! chunked uploads.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `middleware`: Session auth, edge gate, security headers
//! - `proxy`: Module reverse proxy and HTML path rewriting
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod proxy;
pub mod routes;
