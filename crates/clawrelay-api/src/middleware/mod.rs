//! API Middleware

pub mod internal_auth;

pub use internal_auth::{require_internal_secret, secrets_match, InternalAuth, INTERNAL_SECRET_HEADER};
