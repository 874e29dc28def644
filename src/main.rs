//! doorbot-fixture - fake doorbell signaling and media endpoint
//!
//! Answers a client's SIP call setup and replays captured audio/video RTP
//! with its original timing, so the client can be tested without hardware.

mod config;
mod fixture;
mod media;
mod models;
mod sip;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "doorbot-fixture")]
#[command(about = "Fake doorbell SIP responder and RTP replayer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Stream {
    Audio,
    Video,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling and media endpoints until Ctrl+C
    Serve,

    /// Load a stream's capture and report what a replay session would send
    Inspect {
        #[arg(short, long, value_enum, default_value = "audio")]
        stream: Stream,
    },

    /// Print the active-ding JSON the control plane should serve
    Ding,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            let fixture = fixture::Fixture::bind(&config).await?;
            tracing::info!(
                "Fixture ready, SIP on {} (advertised as {}:{})",
                fixture.signaling_addr()?,
                config.ip,
                config.signaling_port
            );
            fixture.run().await?;
        }
        Commands::Inspect { stream } => {
            let (label, stream) = match stream {
                Stream::Audio => ("audio", &config.audio),
                Stream::Video => ("video", &config.video),
            };
            let store = fixture::load_store(label, stream)?;
            println!("Capture:        {}", stream.capture.display());
            println!("Packets:        {}", store.len());
            println!("Start index:    {}", stream.start_index);
            println!("Replayed:       {}", store.len() - stream.start_index);
            println!(
                "Duration:       {:.3}s",
                store.replay_duration(stream.start_index).as_secs_f64()
            );
        }
        Commands::Ding => {
            let ding = models::ActiveDing::for_fixture(&config, chrono::Utc::now().timestamp_millis());
            println!("{}", serde_json::to_string_pretty(&vec![ding])?);
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
