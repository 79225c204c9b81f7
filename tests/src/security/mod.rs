//! Attack simulations against the auth gate.
//!
//! Each module names the attack it models; every test asserts that the
//! attack fails closed.

pub mod abuse_controls;
pub mod identity_forgery;
pub mod session_attacks;
