mod cli;

use std::io;
use std::process::exit;

use anyhow::Result;
use clap::Parser;
use cli::Args;
use frootmon::dns::{Collector, IntervalPolicy};
use frootmon::pcap::{CaptureLoader, CaptureSource};
use frootmon::plugin::{FrootMonitor, Plugin};
use log::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_interfaces {
        let interfaces = CaptureLoader::list_interfaces()?;
        println!("Available network interfaces:");
        for device in interfaces {
            let status = if device.flags.is_up() { "UP" } else { "DOWN" };
            let loopback = if device.flags.is_loopback() {
                "LOOPBACK"
            } else {
                ""
            };

            println!("  {} [{}] {}", device.name, status, loopback);

            if let Some(desc) = device.desc {
                println!("    Description: {desc}");
            }
        }
        return Ok(());
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let source = match (args.read, args.interface) {
        (Some(path), _) => CaptureSource::File(path),
        (None, Some(iface)) => CaptureSource::Interface(iface),
        (None, None) => CaptureSource::Interface(CaptureLoader::select_default_interface()?),
    };

    let live = matches!(source, CaptureSource::Interface(_));
    let policy = IntervalPolicy::new(args.interval, args.packets).with_wall_clock(live);
    if policy.is_unbounded() {
        warn!("No interval trigger configured; reporting only at exit");
    }

    info!("Starting frootmon");
    info!("Source: {source:?}, interval: {policy:?}");

    let (_capture_handle, event_rx, cancel_token) = CaptureLoader::load(&source, &args.filter)?;

    let mut monitor = FrootMonitor::new(args.track_responses);
    monitor.start(Box::new(io::stderr()))?;

    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            ctrl_c_token.cancel();
        }
    });

    let collector = Collector::new(monitor, event_rx, policy, cancel_token.clone());
    let result = collector.run().await;
    // Stop the capture loop before reporting any error; it may still be
    // blocked in libpcap, so don't wait for it
    cancel_token.cancel();
    result?;

    info!("frootmon stopped");
    exit(0)
}
