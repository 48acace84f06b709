//! Device and host tracing.
//!
//! The device ring captures scheduler boundaries inside the megakernel;
//! host tracing captures launch boundaries on the host side and persists
//! them as a binary blob. Both are best-effort observability, never
//! control flow.

pub mod device;
pub mod host;
pub mod print;
