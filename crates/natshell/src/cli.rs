use clap::Parser;
use std::path::PathBuf;

/// NatShell — natural language shell interface.
#[derive(Parser, Debug)]
#[command(name = "natshell", version, about, long_about = None)]
pub struct Args {
    /// Path to a local model file (overrides config)
    #[arg(long, short = 'm')]
    pub model: Option<PathBuf>,

    /// URL of an OpenAI-compatible API to use instead of the local model
    /// (e.g. http://localhost:11434/v1)
    #[arg(long, conflicts_with = "local")]
    pub remote: Option<String>,

    /// Model name on the remote endpoint (e.g. qwen3:4b)
    #[arg(long)]
    pub remote_model: Option<String>,

    /// Force the local model, ignoring any remote configuration
    #[arg(long)]
    pub local: bool,

    /// Download the default model and exit
    #[arg(long)]
    pub download: bool,

    /// Alternate config file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Run a single prompt without the interactive loop and exit.
    /// Response text goes to stdout (pipeable), diagnostics to stderr.
    #[arg(long, value_name = "PROMPT")]
    pub headless: Option<String>,

    /// Auto-approve all confirmation prompts (headless only). Blocked
    /// commands are still blocked.
    #[arg(long, requires = "headless")]
    pub danger_fast: bool,

    /// Run as a JSON-RPC tool server over stdin/stdout
    #[arg(long)]
    pub mcp: bool,
}
