//! Audio Receiver Application
//!
//! Plays an RTP L16 stream on the default (or configured) output device and
//! reports engine telemetry until interrupted.
//!
//! Usage: `receiver [--json] [--list-devices] [CONFIG.toml | udp://host:port/?...]`

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtp_audio_sink::{
    audio::{
        channel::ChannelSelector,
        device::{fallback_params, get_output_device, list_output_devices},
        playback::CpalOutput,
    },
    config::{AppConfig, EngineConfig},
    engine::Engine,
    telemetry::Telemetry,
};

fn print_devices() {
    println!("\n=== Available Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

fn report(snapshot: &Telemetry, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    tracing::info!(
        "Stats: {} received, {} invalid, {} lost ({:.1}% loss), {} reordered, buffer {}/{}, {} underruns, {} overflows",
        snapshot.packets_received,
        snapshot.packets_invalid,
        snapshot.packets_lost,
        snapshot.loss_rate() * 100.0,
        snapshot.packets_reordered,
        snapshot.buffer_occupancy,
        snapshot.buffer_capacity,
        snapshot.underruns,
        snapshot.overflows()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RTP audio receiver");

    let mut config = AppConfig::load().context("loading config")?;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => config.telemetry.json = true,
            "--list-devices" => {
                print_devices();
                return Ok(());
            }
            uri if uri.starts_with("udp://") => {
                config.engine = EngineConfig::from_uri(uri)?;
            }
            path => {
                let json = config.telemetry.json;
                config = AppConfig::load_from(Path::new(path))
                    .with_context(|| format!("loading {}", path))?;
                config.telemetry.json |= json;
            }
        }
    }

    tracing::info!("Stream: {}", config.engine.to_uri());

    let queried = get_output_device(config.output.device.as_deref()).and_then(|device| {
        let params = device.device_params(&config.output)?;
        tracing::info!(
            "Output device '{}': {} Hz, {} frames per burst, {} channels",
            device.name,
            params.sample_rate,
            params.frames_per_burst,
            params.channels
        );
        Ok(params)
    });
    let params = match queried {
        Ok(params) => params,
        Err(e) => {
            let channels = ChannelSelector::new(config.engine.num_channels, config.engine.channel_mask)?
                .output_channels();
            let params = fallback_params(&config.output, channels);
            tracing::warn!(
                "Cannot query output device ({}), assuming {} Hz, {} frames per burst",
                e,
                params.sample_rate,
                params.frames_per_burst
            );
            params
        }
    };

    let mut engine = Engine::new();
    engine.set_device_params(params)?;
    engine.create(
        config.engine.clone(),
        Box::new(CpalOutput::new(config.output.device.clone())),
    )?;

    tracing::info!("Waiting for audio - press Ctrl+C to stop");

    let mut ticker = tokio::time::interval(Duration::from_millis(config.telemetry.interval_ms.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            _ = ticker.tick() => report(&engine.telemetry(), config.telemetry.json)?,
        }
    }

    tracing::info!("Shutting down");
    engine.destroy();
    Ok(())
}
