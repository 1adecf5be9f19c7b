//! Scan and connect example
//!
//! Scans for peripherals advertising the RedBearLab service, connects to the
//! strongest one and reports signal strength until interrupted.
//!
//! Run with: cargo run --example scan_and_connect
//!
//! To connect to a specific peripheral:
//!   cargo run --example scan_and_connect -- --id <identifier>

use rbl_ble_central::{BleCentral, Error, Result, SessionEvent};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,rbl_ble_central=debug")),
        )
        .init();

    println!("RedBearLab Peripheral Scanner");
    println!("=============================\n");

    let args: Vec<String> = std::env::args().collect();
    let target_id = args
        .iter()
        .position(|arg| arg == "--id")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let central = BleCentral::new().await?;

    println!("Scanning for 3 seconds...\n");
    central.scan()?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let discovered = central.discovered();
    if discovered.is_empty() {
        println!("No peripherals found.");
        return Ok(());
    }

    for entry in &discovered {
        println!("  {}  RSSI {} dBm", entry.identifier(), entry.rssi);
    }
    println!();

    let identifier = match target_id {
        Some(id) => id,
        None => discovered
            .iter()
            .max_by_key(|entry| entry.rssi)
            .map(|entry| entry.identifier())
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: "any".to_string(),
            })?,
    };

    println!("Connecting to {}...", identifier);
    central.connect(&identifier)?;
    central.wait_for_connection(Duration::from_secs(10)).await?;
    println!(
        "Connected (framework version {:#06x})\n",
        central.framework_version()
    );

    let mut events = central.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match central.rssi().await {
                    Ok(rssi) => println!("RSSI: {} dBm", rssi),
                    Err(e) => println!("RSSI unavailable: {}", e),
                }
            }
            event = events.recv() => {
                if let Ok(SessionEvent::Disconnected) = event {
                    println!("Peripheral disconnected.");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    central.shutdown().await?;
    Ok(())
}
