//! Testing utilities and mock implementations
//!
//! Mocks for the mesh's outbound seams (transport, discovery backend, health
//! probe) so the adapter can be tested without live services.

pub mod mocks;

pub use mocks::*;
