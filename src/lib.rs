//! Toolgate Library
//!
//! Allowlisted, injection-safe execution of the Foundry toolchain (`forge`,
//! `cast`, `anvil`). See [`tools`] for the execution pipeline.

pub mod config;
pub mod error;
pub mod logging;
pub mod tools;

pub use error::{Diagnostics, ToolError};
pub use tools::{ExecutionOptions, ExecutionResult, ToolExecutor, ToolId};
