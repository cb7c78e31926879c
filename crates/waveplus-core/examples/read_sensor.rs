//! Example: Reading Current Sensor Values
//!
//! This example scans for a Wave Plus with the given serial number, connects
//! to it, and prints one set of measurements.
//!
//! Run with: `cargo run --example read_sensor -- <SERIAL>`

use std::env;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use waveplus_core::{AcquisitionConfig, BtleRadio, DeviceIdentity, Radio, Scanner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Get serial number from command line
    let args: Vec<String> = env::args().collect();
    let identity: DeviceIdentity = if args.len() > 1 {
        args[1].parse()?
    } else {
        eprintln!("Usage: {} <SERIAL>", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} 2930123456", args[0]);
        std::process::exit(1);
    };

    let cancel = CancellationToken::new();
    let radio = Arc::new(BtleRadio::new());
    radio.open().await?;

    println!("Looking for {}...", identity);
    let scanner = Scanner::new(radio.clone(), AcquisitionConfig::default().scan_options());
    let mut devices = scanner.scan(&cancel).await?;

    let Some(session) = devices.remove(&identity) else {
        eprintln!("Device {} not found", identity);
        radio.close().await?;
        std::process::exit(1);
    };

    println!("Reading from {}...", session.address());
    let values = session.receive(&cancel).await?;

    println!();
    println!("Current Readings:");
    println!("  Humidity:    {:.1} %", values.humidity);
    println!("  Radon (24h): {} Bq/m³", values.radon_short);
    println!("  Radon (avg): {} Bq/m³", values.radon_long);
    println!("  Temperature: {:.2} °C", values.temperature);
    println!("  Pressure:    {:.2} hPa", values.pressure);
    println!("  CO2:         {} ppm", values.co2);
    println!("  VOC:         {} ppb", values.voc);

    radio.close().await?;
    Ok(())
}
