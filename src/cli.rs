use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

/// Chat with a rulebook PDF through Gemini
#[derive(Debug, Parser)]
#[command(name = "rulebook-chat")]
#[command(version)]
#[command(about = "Chat with a rulebook PDF through Gemini", long_about = None)]
pub struct Args {
    /// Model name (overrides config)
    #[arg(short = 'm', long = "model", global = true)]
    pub model: Option<String>,

    /// Session to act on; a new one is created when omitted
    #[arg(short = 's', long = "session", global = true)]
    pub session: Option<Uuid>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a document and attach it to the session
    Upload {
        /// Path to the document
        path: PathBuf,

        /// System instruction for this session (defaults to config)
        #[arg(long = "system-instruction")]
        system_instruction: Option<String>,

        /// Owner recorded on the session
        #[arg(long = "owner")]
        owner: Option<String>,
    },

    /// Ask a question in the session
    Chat {
        /// Wait for the whole answer instead of streaming it
        #[arg(long = "no-stream")]
        no_stream: bool,

        /// Prompt text
        #[arg(value_name = "PROMPT", required = true)]
        prompt: Vec<String>,
    },

    /// Delete one side of a turn; a turn left empty is removed
    Forget {
        /// Zero-based turn index
        #[arg(long = "turn")]
        turn: usize,

        #[arg(long = "side", value_enum)]
        side: SideArg,
    },

    /// Show a cached-content resource and its expiry
    Cache {
        /// Cache id, e.g. cachedContents/abc123 (defaults to the session's)
        id: Option<String>,
    },

    /// List stored sessions
    Sessions,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SideArg {
    User,
    Model,
}
