//! Command line argument parsing
//!
//! Subcommands:
//! - `chat`: Answer one message, optionally streaming
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write the default user configuration

use crate::orchestrator::Identity;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Guest address used when neither `--user` nor `--ip` is given.
pub const LOCAL_GUEST: &str = "127.0.0.1";

#[derive(Debug)]
pub enum ExecutionMode {
    Chat(ChatConfig),
    ShowConfig { config_override: Option<PathBuf> },
    InitConfig,
}

#[derive(Debug)]
pub struct ChatConfig {
    pub message: String,
    pub identity: Identity,
    pub stream: bool,
    pub json: bool,
    pub config_override: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub history: Option<PathBuf>,
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Parser)]
#[command(name = "dealchat")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Shopping assistant that answers deal and coupon questions through an LLM backend")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ask a single question
    Chat {
        /// The message to answer
        message: String,
        /// Print answer text as it streams
        #[arg(short = 's', long = "stream")]
        stream: bool,
        /// Print the full result as JSON
        #[arg(long = "json")]
        json: bool,
        /// Authenticated user id (uses the authenticated rate limits)
        #[arg(short = 'u', long = "user", conflicts_with = "ip")]
        user: Option<String>,
        /// Guest network address
        #[arg(long = "ip")]
        ip: Option<String>,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Deal catalog (JSON)
        #[arg(long = "catalog")]
        catalog: Option<PathBuf>,
        /// Prior conversation turns (JSON array of messages)
        #[arg(long = "history")]
        history: Option<PathBuf>,
        /// Extra facts for the system prompt (can be used multiple times)
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },
    /// Show configuration discovery information
    ShowConfig {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Create ~/.dealchat/config.toml with default settings
    InitConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Chat {
                message,
                stream,
                json,
                user,
                ip,
                config,
                catalog,
                history,
                context,
            }) => {
                if message.trim().is_empty() {
                    return Err("Message must not be empty".to_string());
                }

                let identity = match (user, ip) {
                    (Some(user), _) => Identity::User(user.clone()),
                    (None, Some(ip)) => Identity::Guest(ip.clone()),
                    (None, None) => Identity::Guest(LOCAL_GUEST.to_string()),
                };

                Ok(ExecutionMode::Chat(ChatConfig {
                    message: message.clone(),
                    identity,
                    stream: *stream,
                    json: *json,
                    config_override: config.clone(),
                    catalog: catalog.clone(),
                    history: history.clone(),
                    context: Self::parse_context(context)?,
                }))
            }
            Some(Commands::ShowConfig { config }) => Ok(ExecutionMode::ShowConfig {
                config_override: config.clone(),
            }),
            Some(Commands::InitConfig) => Ok(ExecutionMode::InitConfig),
            None => Err(
                "No command specified. Use 'dealchat --help' to see available commands."
                    .to_string(),
            ),
        }
    }

    fn parse_context(pairs: &[String]) -> Result<BTreeMap<String, String>, String> {
        pairs
            .iter()
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Ok((key.trim().to_string(), value.trim().to_string()))
                }
                _ => Err(format!("Invalid context '{}', expected KEY=VALUE", pair)),
            })
            .collect()
    }
}
