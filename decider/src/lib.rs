//! Decision pipeline kernel.
//!
//! A decision runs through four fixed stages (idea validation, market analysis, strategy
//! advice, reflection) and is then scored into a decision index, optionally gated by a
//! calmness self-check. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (context model, scorers, variant generator).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side effects (configuration, generation backends, run records, reports).
//! - **[`agents`]**: Stage agents that prompt a backend and repair its output into typed
//!   results.
//!
//! [`pipeline`] runs one decision; [`expand`] runs the three scenario variants side by side.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod expand;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
