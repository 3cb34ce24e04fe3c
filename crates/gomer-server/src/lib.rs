//! # gomer-server
//!
//! Axum HTTP + `WebSocket` surface for the shared Go buffer.
//!
//! - `GET /conn`: viewer connection. Sends the current buffer on open, then
//!   relays every edit to all other viewers.
//! - `POST /run`: builds and runs the posted source, broadcasting the output
//!   (or a timeout notice) to every viewer.
//! - `POST /format`: runs `gofmt` over the posted source and, when it succeeds,
//!   replaces the shared buffer with the result.
//! - `GET /health`, `GET /metrics`: liveness and Prometheus text.
//!
//! The moving parts are [`ConnectionRegistry`], [`SharedDocument`],
//! [`Broadcaster`] and the [`SessionCoordinator`] that wires them to the
//! sandbox.

#![deny(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod document;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use coordinator::SessionCoordinator;
pub use document::{DocumentSnapshot, SharedDocument};
pub use server::{ApiError, AppState, GomerServer};
pub use shutdown::ShutdownCoordinator;
pub use websocket::broadcast::{BroadcastError, BroadcastReport, Broadcaster, DeliveryFailure};
pub use websocket::connection::{ClientConnection, SendError};
pub use websocket::registry::ConnectionRegistry;
