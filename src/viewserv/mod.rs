//! View service: tracks KV server liveness through heartbeats and publishes
//! the authoritative `(view number, primary, backup)` assignment.

mod state;

mod service;

pub use state::View;

pub use service::{CtrlReply, CtrlRequest, ViewService, ViewServiceConfig};
