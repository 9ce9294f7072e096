//! Security utilities and middleware

pub mod headers;
pub mod production_warnings;
pub mod timing;

pub use headers::add_api_security_headers;
pub use production_warnings::{ProductionChecker, ProductionWarning};
pub use timing::{add_auth_delay, AuthTimer};
