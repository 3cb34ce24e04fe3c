//! # gomer-core
//!
//! Shared vocabulary for the gomer crates:
//!
//! - **Connection IDs**: [`ConnectionId`], the registry key for a live viewer
//! - **Wire envelope**: [`Envelope`] with `codeUpdate` / `runResult` payloads
//! - **Fixed notices**: timeout and format-success strings shown to viewers
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod messages;

pub use ids::ConnectionId;
pub use messages::{
    CodeUpdate, Envelope, FORMAT_SUCCESS_NOTICE, Inbound, InboundError, RunResult, TIMEOUT_NOTICE,
    parse_inbound, timeout_notice,
};
