// ============================================================================
// src/cmd/mod.rs – command subsystem root
// ============================================================================
pub mod base; // bounded process execution (CommandExecutor, Runner)

// Re-export common types for convenience:
pub use base::{command_argv, CommandExecutor, CommandResult, Runner};
