#![deny(warnings)]

mod serve;

use anyhow::Context;
use clap::{Parser, Subcommand};
use podcast_narrator_core::config::{
    create_default_config, load_config, Settings, StdEnv, DEFAULT_CONFIG_PATH,
};
use podcast_narrator_core::dialogue::{distinct_speakers, extract_dialogues};
use podcast_narrator_core::pipeline::Pipeline;
use podcast_narrator_core::voices::{fetch_voice_catalog, DEFAULT_VOICES_FILE};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "podcast-narrator")]
#[command(about = "Narrate a multi-speaker dialogue transcript into one MP3 (MiniMax TTS)")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Transcript with one `speaker: text` line per utterance
    #[arg(short, long, value_name = "PATH")]
    input: Option<PathBuf>,

    /// Where to write the merged MP3
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the voices available to the account and save the raw catalog
    Voices {
        #[arg(long, value_name = "PATH", default_value = DEFAULT_VOICES_FILE)]
        save: PathBuf,
    },

    /// Write a sample config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Serve the voice preview page
    Serve {
        #[arg(long, default_value = "127.0.0.1:5000")]
        addr: SocketAddr,

        /// Catalog saved by `voices`
        #[arg(long, value_name = "PATH", default_value = DEFAULT_VOICES_FILE)]
        voices: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    match args.command {
        Some(Command::InitConfig { force }) => init_config(&args.config, force),
        Some(Command::Voices { save }) => list_voices(&args.config, &save).await,
        Some(Command::Serve { addr, voices }) => {
            let settings = load_settings(&args.config)?;
            serve::run(settings, addr, voices).await
        }
        None => {
            let (Some(input), Some(output)) = (args.input, args.output) else {
                anyhow::bail!("--input and --output are required to narrate a transcript");
            };
            narrate(&input, &output, &args.config).await
        }
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let settings = load_config(path, &StdEnv)
        .with_context(|| format!("failed to load config from {}", path.display()))?;

    if settings.has_placeholder_credentials() {
        tracing::warn!(
            path = %path.display(),
            "config still holds placeholder credentials, requests will be rejected"
        );
    }
    tracing::info!(
        model = %settings.model,
        output_format = settings.encoding.wire_name(),
        concurrency = settings.concurrency,
        request_delay_ms = settings.request_delay.as_millis() as u64,
        "config loaded"
    );
    Ok(settings)
}

async fn narrate(input: &Path, output: &Path, config: &Path) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    let transcript = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("failed to read transcript {}", input.display()))?;

    if let Ok(lines) = extract_dialogues(&transcript) {
        for speaker in distinct_speakers(&lines) {
            if !settings.voices.is_mapped(speaker) {
                tracing::warn!(
                    speaker,
                    voice = %settings.voices.default_voice,
                    "speaker has no voice_map entry, using default voice"
                );
            }
        }
    }

    let pipeline = Pipeline::from_settings(&settings)?;
    let summary = pipeline
        .run(&transcript, &settings.voices, output)
        .await
        .with_context(|| format!("failed to narrate {}", input.display()))?;

    println!("Extracted {} dialogue lines", summary.lines_parsed);
    println!("Synthesized {} audio clips", summary.lines_synthesized);
    if !summary.failed.is_empty() {
        let lines: Vec<String> = summary.failed.iter().map(|i| (i + 1).to_string()).collect();
        println!("Skipped lines: {}", lines.join(", "));
    }
    println!("Merged audio written to: {}", summary.output_path.display());
    Ok(())
}

async fn list_voices(config: &Path, save: &Path) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    let client = reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .build()
        .context("failed to build HTTP client")?;

    println!("Fetching available voices...");
    let catalog = fetch_voice_catalog(&client, &settings)
        .await
        .context("failed to fetch voice catalog")?;

    if catalog.is_empty() {
        println!("No voices returned");
    } else {
        print!("{}", catalog.render());
    }

    catalog
        .save(save)
        .await
        .with_context(|| format!("failed to save voice catalog to {}", save.display()))?;
    println!("\nVoice catalog saved to {}", save.display());
    Ok(())
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    create_default_config(path, force)
        .with_context(|| format!("failed to create {}", path.display()))?;
    println!("Created {}", path.display());
    println!("Fill in api_key and group_id, then map each speaker in voice_map to a voice ID.");
    Ok(())
}
