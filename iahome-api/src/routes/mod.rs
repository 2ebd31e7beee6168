/// API route handlers
///
/// Organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: Accounts (register, login, refresh, email verification, password reset)
/// - `modules`: Public catalog
/// - `admin`: Catalog management and manual grants
/// - `applications`: The caller's own grants
/// - `tokens`: Module token issue and validation
/// - `usage`: Usage recording from inside a module
/// - `qr`: QR codes and the public redirect
/// - `uploads`: Chunked uploads forwarded to module backends

pub mod admin;
pub mod applications;
pub mod auth;
pub mod health;
pub mod modules;
pub mod qr;
pub mod tokens;
pub mod uploads;
pub mod usage;

use iahome_shared::models::module::is_valid_slug;
use std::borrow::Cow;
use validator::ValidationError;

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

/// Only `http` and `https` URLs; pair with the `url` rule
pub fn validate_http_scheme(candidate: &str) -> Result<(), ValidationError> {
    let lower = candidate.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(())
    } else {
        Err(invalid("http_scheme", "URL must use http or https"))
    }
}

pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    if is_valid_slug(slug) {
        Ok(())
    } else {
        Err(invalid(
            "slug",
            "Slug must be lowercase letters, digits and dashes (max 64)",
        ))
    }
}
