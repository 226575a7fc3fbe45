//! Minimal SPP terminal: scan, connect, and send each stdin line.
//!
//! Run with: cargo run --features bluez --example spp_terminal [ADDRESS]
//!
//! Without an address the devices found by a scan are listed and the
//! program exits.

use spp_session::radio::bluez::BluezRadio;
use spp_session::{Result, SessionConfig, SppManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spp_session=debug".parse().unwrap()),
        )
        .init();

    let radio = BluezRadio::new().await?.with_discovery_window(Duration::from_secs(8));
    let config = SessionConfig::default().with_scan_timeout(Duration::from_secs(30));
    let manager = SppManager::with_config(Arc::new(radio), config);

    let Some(address) = std::env::args().nth(1) else {
        println!("Scanning...");
        for device in manager.scan().await? {
            println!("  {}  {}", device.address, device.name);
        }
        return Ok(());
    };

    manager.connect(&address).await?;
    println!("Connected to {}. Type lines to send, Ctrl-D to quit.", address);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut bytes = line.into_bytes();
        bytes.extend_from_slice(b"\r\n");

        if let Err(e) = manager.send(&bytes).await {
            eprintln!("Send failed: {}", e);
            break;
        }
    }

    manager.shutdown().await;
    println!("Disconnected");
    Ok(())
}
