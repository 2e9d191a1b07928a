//! Deterministic, pure logic of the decision kernel.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod calmness;
pub mod compare;
pub mod consistency;
pub mod context;
pub mod decision_index;
pub mod error;
pub mod types;
pub mod variants;
