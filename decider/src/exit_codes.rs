//! Stable exit codes for `decider` commands.

/// Command succeeded; a run reached `DONE`.
pub const OK: i32 = 0;
/// Invalid input, configuration or record, or any other error.
pub const INVALID: i32 = 1;
/// The pipeline halted in `FAILED`. Exit code 2 is left to clap usage errors.
pub const FAILED: i32 = 3;
