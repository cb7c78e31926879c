//! Example: Scanning for Wave Plus Devices
//!
//! This example scans for Airthings Wave Plus devices using Bluetooth Low
//! Energy and prints the serial number and link address of each one.
//!
//! Run with: `cargo run --example scan_devices`

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use waveplus_core::{BtleRadio, Radio, ScanOptions, Scanner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let radio = Arc::new(BtleRadio::new());
    radio.open().await?;

    println!("Scanning for Wave Plus devices...");
    println!();

    let scanner = Scanner::new(
        radio.clone(),
        ScanOptions::new().duration(Duration::from_secs(10)),
    );
    let devices = scanner.scan(&CancellationToken::new()).await?;

    if devices.is_empty() {
        println!("No Wave Plus devices found.");
        println!();
        println!("Make sure:");
        println!("  - Your Wave Plus has batteries in it");
        println!("  - Bluetooth is enabled on this computer");
        println!("  - The device is within range");
    } else {
        println!("Found {} device(s):", devices.len());
        println!();

        for (identity, session) in &devices {
            println!("  Serial {}", identity);
            println!("    Address: {}", session.address());
            println!();
        }
    }

    radio.close().await?;
    Ok(())
}
