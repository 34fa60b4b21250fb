use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "repurposer",
    about = "Repurposer - Turn Instagram and YouTube posts into LinkedIn, carousel, Threads and video-script copy",
    version,
    long_about = "Fetches an Instagram post/reel or a YouTube video, optionally transcribes it, and rewrites it in your brand voice for four channels. Every backend falls back to a deterministic mock mode when its credentials are missing."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./repurposer.yaml, then the user config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines (also enabled by LOG_FORMAT=json)
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to bind, overriding the config file
        #[arg(short, long, value_name = "ADDR", env = "REPURPOSER_BIND")]
        bind: Option<String>,
    },

    /// Generate content for a post URL
    Process {
        /// Instagram post/reel or YouTube video URL
        #[arg(value_name = "URL")]
        url: String,

        /// Output file path (prints to console if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Generate carousel images as well
        #[arg(long)]
        images: bool,

        /// Brand voice profile as a JSON file
        #[arg(long, value_name = "FILE")]
        voice: Option<PathBuf>,
    },

    /// Show what would be used as source content for a URL
    Preview {
        /// Instagram post/reel or YouTube video URL
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Show or initialise configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write the default configuration to the user config dir
        #[arg(long, conflicts_with = "show")]
        init: bool,
    },

    /// List supported platforms
    Platforms,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Readable sections per channel
    Text,
    /// The generated content as JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
