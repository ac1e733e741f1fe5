use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "frootmon")]
#[command(about = "Count DNS header flag values per collection interval", long_about = None)]
pub struct Args {
    /// Network interface to capture on (defaults to the first active one)
    #[arg(short, long, conflicts_with = "read")]
    pub interface: Option<String>,

    /// Read packets from a pcap file instead of a live interface
    #[arg(short, long, value_name = "FILE")]
    pub read: Option<PathBuf>,

    /// Seconds per collection interval (0 disables time-based intervals)
    #[arg(short = 't', long, value_name = "SECS", default_value_t = 60)]
    pub interval: u64,

    /// Packets per collection interval (0 disables count-based intervals)
    #[arg(short = 'c', long, value_name = "N", default_value_t = 0)]
    pub packets: u64,

    /// BPF filter applied to the capture
    #[arg(short, long, default_value = "port 53")]
    pub filter: String,

    /// Count responses (QR bit set) in a separate table
    #[arg(long)]
    pub track_responses: bool,

    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    #[arg(long)]
    pub list_interfaces: bool,
}
