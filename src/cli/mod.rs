//! CLI-specific functionality for dealchat
//!
//! Argument parsing and terminal rendering. Configuration discovery lives in
//! [`crate::config`].

pub mod args;
pub mod output;

pub use args::{Args, ChatConfig, Commands, ExecutionMode};
pub use output::{render_footer, render_result};
