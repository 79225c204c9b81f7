//! End-to-end flows through the public API.

pub mod gate_flow;
pub mod login_flow;
