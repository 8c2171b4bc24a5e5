use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use assistant_converse::{
    AudioSettings, Config, ConversationLoop, DeviceSink, DeviceSource, StaticCredentials, WsTransport,
};
use assistant_converse::utils;

/// Talk to the assistant from the terminal. Press Enter to speak.
#[derive(Parser)]
struct Cli {
    /// WebSocket URL of the converse endpoint
    #[arg(long, env = "ASSISTANT_ENDPOINT")]
    endpoint: Option<String>,

    /// Input device name; the default device if omitted
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name; the default device if omitted
    #[arg(long)]
    output_device: Option<String>,

    /// Per-call deadline in seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Bytes of audio per request
    #[arg(long)]
    iter_size: Option<usize>,

    /// Bytes per device block
    #[arg(long)]
    block_size: Option<usize>,

    /// Bytes of playback buffered ahead
    #[arg(long)]
    flush_size: Option<usize>,

    /// Starting playback volume, 0-100
    #[arg(long)]
    volume: Option<u8>,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    if cli.list_devices {
        println!("inputs:\n{}", utils::device::get_available_inputs()?);
        println!("outputs:\n{}", utils::device::get_available_outputs()?);
        return Ok(());
    }

    let env_config = Config::from_env().context("Failed to load client configuration")?;
    let deadline = cli
        .deadline_secs
        .map(Duration::from_secs)
        .unwrap_or(env_config.deadline());
    let config = Config::builder()
        .with_endpoint(cli.endpoint.as_deref().unwrap_or(env_config.endpoint()))
        .with_deadline(deadline)
        .build();

    let mut settings = AudioSettings::from_env().context("Failed to load audio settings")?;
    settings.iter_size = cli.iter_size.unwrap_or(settings.iter_size);
    settings.block_size = cli.block_size.unwrap_or(settings.block_size);
    settings.flush_size = cli.flush_size.unwrap_or(settings.flush_size);
    let settings = settings.validate()?;

    let source = DeviceSource::open(cli.input_device, settings).context("Failed to open input device")?;
    let sink = DeviceSink::open(cli.output_device, settings).context("Failed to open output device")?;

    let credentials = Arc::new(StaticCredentials::new(config.access_token().clone()));
    let transport = Arc::new(WsTransport::new(config, credentials));
    let (mut conversation, handle) = ConversationLoop::new(transport, source, sink);
    if let Some(volume) = cli.volume {
        conversation = conversation.with_initial_volume(volume);
    }

    let stdin_handle = handle.clone();
    tokio::spawn(async move {
        println!("Press Enter to talk, type \"reset\" to start over or \"q\" to quit.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let sent = match line.trim() {
                "q" | "quit" => {
                    let _ = stdin_handle.stop().await;
                    break;
                }
                "reset" => stdin_handle.reset().await,
                _ => stdin_handle.start().await,
            };
            if sent.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, stopping after the current turn...");
            let _ = handle.stop().await;
        }
    });

    let result = conversation.run().await;
    tracing::info!("stats: {}", serde_json::to_string(conversation.stats())?);
    result.context("Conversation ended with an error")
}
