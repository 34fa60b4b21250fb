use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repurposer::cli::{Cli, Commands};
use repurposer::config::Config;
use repurposer::generate::BrandVoiceProfile;
use repurposer::pipeline::Pipeline;
use repurposer::{output, server, utils, Platform};

/// Rate-limit key for local CLI runs
const CLI_CLIENT_KEY: &str = "cli";

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.verbose {
        "repurposer=debug"
    } else {
        "repurposer=info"
    };
    let json = cli.log_json
        || std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

    // Logs go to stderr so stdout stays clean for generated content
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn spinner(quiet: bool, message: &'static str) -> Option<ProgressBar> {
    if quiet {
        return None;
    }
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.set_message(message);
    progress.enable_steady_tick(Duration::from_millis(100));
    Some(progress)
}

fn load_voice(path: &Path) -> Result<BrandVoiceProfile> {
    let content = fs_err::read_to_string(path).context("Failed to read brand voice file")?;
    serde_json::from_str(&content).context("Failed to parse brand voice file")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let pipeline = Arc::new(Pipeline::from_config(config.clone()));
            let availability = pipeline.availability();
            tracing::info!(
                ?availability,
                rate_limit = pipeline.rate_limit(),
                image_concurrency = pipeline.image_options().concurrency,
                "Backends resolved"
            );
            if availability.fully_mocked() {
                tracing::warn!("No credentials configured, every backend runs in mock mode");
            }
            server::serve(pipeline, &config).await?;
        }
        Commands::Process {
            url,
            output,
            format,
            images,
            voice,
        } => {
            if images {
                config.images.auto_generate = true;
            }
            let voice = voice.as_deref().map(load_voice).transpose()?;
            let pipeline = Pipeline::from_config(config);

            tracing::info!("Processing URL: {}", url);
            let started = Instant::now();
            let progress = spinner(cli.quiet, "Generating content...");
            let result = pipeline
                .process(CLI_CLIENT_KEY, &url, voice.as_ref())
                .await;
            if let Some(progress) = progress {
                progress.finish_and_clear();
            }
            let outcome = result.with_context(|| format!("Failed to process {url}"))?;
            tracing::info!(
                "Generated {} in {}",
                utils::plural(outcome.content.carousel.len(), "carousel slide"),
                utils::format_elapsed(started.elapsed())
            );

            match output {
                Some(path) => {
                    output::save_to_file(&outcome, &path, &format)?;
                    println!("Content saved to: {}", path.display());
                }
                None => {
                    output::print_to_console(&outcome, &format)?;
                }
            }
        }
        Commands::Preview { url } => {
            let pipeline = Pipeline::from_config(config);
            let progress = spinner(cli.quiet, "Fetching preview...");
            let result = pipeline.preview(&url).await;
            if let Some(progress) = progress {
                progress.finish_and_clear();
            }
            let preview = result.with_context(|| format!("Failed to preview {url}"))?;
            output::print_preview(&preview);
        }
        Commands::Config { show, init } => {
            if init {
                let path = Config::init()?;
                println!("Default configuration written to: {}", path.display());
            } else {
                config.display();
                if !show {
                    if let Some(path) = Config::user_config_path() {
                        println!("\nEdit the config file to change settings:");
                        println!("  {}", path.display());
                    }
                }
            }
        }
        Commands::Platforms => {
            println!("Supported platforms:");
            for platform in [Platform::Instagram, Platform::YouTube] {
                let shapes = match platform {
                    Platform::Instagram => "instagram.com/p/<code>, instagram.com/reel/<code>",
                    Platform::YouTube => {
                        "youtube.com/watch?v=<id>, youtube.com/shorts/<id>, youtube.com/embed/<id>, youtu.be/<id>"
                    }
                };
                println!("  • {} ({})", platform, shapes);
            }
        }
    }

    Ok(())
}
