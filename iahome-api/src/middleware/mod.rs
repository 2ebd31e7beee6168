/// Middleware modules for the API server
///
/// - `auth`: session JWT authentication and the admin guard
/// - `edge_gate`: token-presence gate for module host names
/// - `security`: security headers on API responses

pub mod auth;
pub mod edge_gate;
pub mod security;
