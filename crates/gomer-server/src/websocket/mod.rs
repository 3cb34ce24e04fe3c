//! Viewer connections, the registry that tracks them, and fan-out.

pub mod broadcast;
pub mod connection;
pub mod registry;
pub mod session;
