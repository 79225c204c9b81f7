//! # HTTP Adapter
//!
//! Thin axum transport over [`crate::ports::AuthApi`]: routes, envelope
//! responses, header extraction and the origin check layer.

pub mod extract;
pub mod origin;
pub mod response;
pub mod router;

pub use origin::{OriginLayer, OriginPolicy};
pub use response::HttpError;
pub use router::{router, AppState};
