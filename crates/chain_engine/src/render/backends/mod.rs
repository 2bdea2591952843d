//! Backend implementations for the render module
//!
//! Only the headless backend ships today; a hardware backend implements the
//! same `render::api` traits.

/// Software-executed backend used by the demo and the tests
pub mod headless;
