//! adjustkitd - device communication daemon
//!
//! Drives the locator-kit mediator and the weather-kit listener against
//! the serial-to-Ethernet gateway.
//!
//! Usage:
//!   adjustkitd [OPTIONS] [settings.toml]
//!
//! Options:
//!   -H, --host <addr>  Gateway IP address (default 127.0.0.1)
//!
//! Missing settings keys are defaulted and written back to the file.

use std::path::PathBuf;
use std::sync::Arc;

use adjustkit_core::{MediatorEvent, Settings};
use adjustkit_locator::{LinkConfig, LocatorLink, Mediator};
use adjustkit_meteo::{MeteoConfig, MeteoEvent, MeteoServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parsed command-line arguments
struct Args {
    /// Gateway address
    host: String,
    /// Settings file (TOML)
    settings_path: PathBuf,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut result = Args {
        host: "127.0.0.1".to_string(),
        settings_path: PathBuf::from("adjustkit.toml"),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-H" => {
                if i + 1 < args.len() {
                    result.host = args[i + 1].clone();
                    i += 2;
                } else {
                    tracing::error!("Missing argument for --host");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                // Positional argument = settings file
                result.settings_path = PathBuf::from(arg);
                i += 1;
            }
            _ => {
                tracing::warn!("Unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"adjustkitd - device communication daemon

Usage: adjustkitd [OPTIONS] [settings.toml]

Options:
  -H, --host <addr>  Gateway IP address (default 127.0.0.1)
  -h, --help         Print this help message

Examples:
  # Run against a gateway on the bench
  adjustkitd --host 192.168.0.77

  # Run with an explicit settings file
  adjustkitd --host 192.168.0.77 /etc/adjustkit.toml
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "adjustkitd=info,adjustkit_locator=debug,adjustkit_meteo=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting adjustkitd");

    let args = parse_args();
    let settings = Settings::load_or_create(&args.settings_path)?;
    tracing::info!(
        locator_port = settings.locator.port,
        f = settings.locator.f,
        fref = settings.locator.fref,
        "Settings loaded"
    );

    let (link, link_events) =
        LocatorLink::spawn(LinkConfig::new(args.host.clone(), settings.locator.port));
    let (mediator, handle, mut mediator_events) = Mediator::new(
        Arc::new(link),
        link_events,
        settings.locator.f,
        settings.locator.fref,
    );
    tokio::spawn(mediator.run());

    let (_meteo, mut meteo_events) = MeteoServer::bind(MeteoConfig::new(
        settings.meteo.listen_port,
        settings.meteo.peer_port,
    ))
    .await?;

    // The workstation consumer drives requests through this handle;
    // keeping it alive keeps the mediator running.
    let _handle = handle;

    loop {
        tokio::select! {
            Some(event) = mediator_events.recv() => match event {
                MediatorEvent::Snapshot(snapshot) => {
                    tracing::info!(?snapshot, "Device snapshot");
                }
                MediatorEvent::LinkHealthy => {
                    tracing::debug!("Locator link healthy");
                }
            },
            Some(event) = meteo_events.recv() => match event {
                MeteoEvent::Frame(frame) => {
                    tracing::info!(frame = %hex::encode(&frame), "Weather frame");
                }
                MeteoEvent::NoAnswer => {
                    tracing::warn!("Weather kit did not answer");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
