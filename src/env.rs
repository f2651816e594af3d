//! Environment constants and path utilities for dealchat.
//!
//! This module centralizes the environment variable names and configuration
//! file locations used throughout the application, making them easier to
//! maintain and modify.

use std::path::{Path, PathBuf};

/// Main application directory name (hidden directory like .git, .vscode)
pub const DEALCHAT_DIR_NAME: &str = ".dealchat";

/// Configuration file name inside [`DEALCHAT_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Stand-alone configuration file name in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "dealchat.toml";

/// System-wide configuration file (Unix-like systems)
pub const SYSTEM_CONFIG_PATH: &str = "/etc/dealchat/config.toml";

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "dealchat=info";

/// Environment variables read by the configuration overlay
pub mod vars {
    /// Active backend: `openai`, `anthropic` or `gemini`
    pub const PROVIDER: &str = "LLM_PROVIDER";

    /// Secondary backend used by the one-shot fallback
    pub const FALLBACK_PROVIDER: &str = "LLM_FALLBACK_PROVIDER";

    /// Model requested from the secondary backend
    pub const FALLBACK_MODEL: &str = "LLM_FALLBACK_MODEL";

    /// Model used for the simple complexity tier
    pub const MODEL_SIMPLE: &str = "LLM_MODEL_SIMPLE";

    /// Model used for the complex complexity tier
    pub const MODEL_COMPLEX: &str = "LLM_MODEL_COMPLEX";

    /// Embedding model name
    pub const MODEL_EMBEDDING: &str = "LLM_MODEL_EMBEDDING";

    /// Request timeout for every backend, in seconds
    pub const TIMEOUT_SECS: &str = "LLM_TIMEOUT_SECS";

    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
    pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
    pub const ANTHROPIC_BASE_URL: &str = "ANTHROPIC_BASE_URL";
    pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
    pub const GEMINI_BASE_URL: &str = "GEMINI_BASE_URL";

    /// Master switch for the chat feature
    pub const CHAT_ENABLED: &str = "CHAT_ENABLED";

    /// Enables token streaming
    pub const CHAT_STREAMING_ENABLED: &str = "CHAT_STREAMING_ENABLED";

    /// Enables the exact-match response cache
    pub const CHAT_CACHE_ENABLED: &str = "CHAT_CACHE_ENABLED";

    /// Maximum accepted message length in characters
    pub const CHAT_MAX_INPUT_LENGTH: &str = "CHAT_MAX_INPUT_LENGTH";
}

/// Build the main .dealchat directory path from a root directory
pub fn dealchat_dir_path(root: &Path) -> PathBuf {
    root.join(DEALCHAT_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    dealchat_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file paths in the current directory, in priority order
pub fn local_config_file_paths(current_dir: &Path) -> [PathBuf; 2] {
    [
        current_dir.join(LOCAL_CONFIG_FILE_NAME),
        dealchat_dir_path(current_dir).join(CONFIG_FILE_NAME),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.dealchat/config.toml")
        );

        let [flat, nested] = local_config_file_paths(current_dir);
        assert_eq!(flat, Path::new("/current/project/dealchat.toml"));
        assert_eq!(nested, Path::new("/current/project/.dealchat/config.toml"));
    }
}
