//! finfeed-common — Shared error type and the host-capped HTTP client used across finfeed crates.

pub mod error;
pub mod sandbox;

pub use error::{FinfeedError, Result};
pub use sandbox::{SandboxClient, SandboxConfig};
