//! # Lumon Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs        # Wired core on a manual clock
//! ├── integration/      # End-to-end flows through the public API
//! └── security/         # Attack simulations against the auth gate
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p lumon-tests
//! cargo test -p lumon-tests integration::
//! cargo test -p lumon-tests security::
//! cargo bench -p lumon-tests
//! ```

pub mod integration;
pub mod security;
