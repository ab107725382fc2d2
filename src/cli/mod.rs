//! Command-line interface parsing and handling
//!
//! Each subcommand lives in its own module and prints plain text to stdout.

pub mod resume_check;
pub mod stream_list;
pub mod tool_list;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::resume_check::check_resume;
use crate::cli::stream_list::list_streams;
use crate::cli::tool_list::list_tools;
use crate::core::config::Config;

#[derive(Parser)]
#[command(name = "relaychat")]
#[command(about = "Tool discovery and stream resumption for chat clients")]
#[command(
    long_about = "Relaychat discovers tools across configured MCP endpoints and \
decides whether an interrupted AI generation should be reattached.\n\n\
Environment Variables:\n\
  RELAYCHAT_LOG     Log filter for stderr output (defaults to warn)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file to use instead of the default location
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to every configured tool endpoint and list the merged tools
    Tools,
    /// Check whether a conversation has a generation to reattach to
    Resume {
        /// Conversation identifier
        conversation: String,
        /// Chat API base URL serving /{conversation}/stream
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,
        /// JSON file holding the conversation's persisted messages
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,
    },
    /// Print the stream registry records of a conversation
    Streams {
        /// Conversation identifier
        conversation: String,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Tools => list_tools(&config).await,
        Commands::Resume {
            conversation,
            base_url,
            history,
        } => check_resume(&config, &conversation, base_url, history.as_deref()).await,
        Commands::Streams { conversation } => list_streams(&config, &conversation).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config, Box<dyn Error>> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };
    Ok(Config::load_from_path(&path)?)
}
