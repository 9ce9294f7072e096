//! Core authentication flows

pub mod gateway;

// Re-export main components for convenience
pub use gateway::AuthGateway;
