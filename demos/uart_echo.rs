//! UART echo example
//!
//! Connects to a RedBearLab peripheral and bridges it to the terminal: each
//! line typed on stdin is written to the RX characteristic, and everything
//! the peripheral notifies on TX is printed.
//!
//! Run with: cargo run --example uart_echo -- --id <identifier>

use rbl_ble_central::{BleCentral, ReadinessPolicy, Result, SessionConfig, SessionEvent};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,rbl_ble_central=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let target_id = args
        .iter()
        .position(|arg| arg == "--id")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let config = SessionConfig::default().with_readiness(ReadinessPolicy::AwaitNotifyAck);
    let central = BleCentral::with_config(config).await?;

    central.scan()?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let identifier = match target_id.or_else(|| {
        central
            .discovered()
            .iter()
            .max_by_key(|entry| entry.rssi)
            .map(|entry| entry.identifier())
    }) {
        Some(id) => id,
        None => {
            println!("No peripherals found.");
            return Ok(());
        }
    };

    central.connect(&identifier)?;
    central.wait_for_connection(Duration::from_secs(10)).await?;
    println!("Connected to {}. Type a line to send it, Ctrl-C to quit.", identifier);

    let mut events = central.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Err(e) = central.write(line.as_bytes()) {
                            println!("Write failed: {}", e);
                        }
                    }
                    _ => break,
                }
            }
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::DataReceived(Some(data))) => {
                        println!("< {}", String::from_utf8_lossy(&data));
                    }
                    Ok(SessionEvent::Disconnected) => {
                        println!("Peripheral disconnected.");
                        break;
                    }
                    Ok(SessionEvent::Error(e)) => println!("Error: {}", e),
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    central.shutdown().await?;
    Ok(())
}
