//! Fuzzing harnesses for the in-memory driver and the session layer.
//!
//! Each model runs an operation sequence against the real implementation
//! and a simple reference side by side, so the harnesses need no kernel
//! driver.

pub mod ring_model;
pub mod session_model;
