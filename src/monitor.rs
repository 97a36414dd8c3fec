//! Watches the LAN for LIFX bulbs and prints whatever they report.
//!
//! Run with `RUST_LOG=debug` to see every packet the client sends and drops.

use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use clap::Parser;
use lifx_client::{Callbacks, Client, Color, Config, PowerLevel};
use log::{error, info};

#[derive(Parser)]
#[command(name = "monitor")]
#[command(about = "Probe the network for LIFX bulbs and print what they report", long_about = None)]
struct Cli {
    /// Local IPv4 address to bind to (default: first non-loopback interface)
    #[arg(short, long)]
    bind: Option<Ipv4Addr>,

    /// Address probes are sent to (default: the /24 broadcast of the bind address)
    #[arg(long)]
    broadcast: Option<Ipv4Addr>,

    /// Seconds between probes
    #[arg(short, long, default_value = "10")]
    interval: u64,
}

fn main() -> Result<(), lifx_client::Error> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = Config::default();
    if let Some(addr) = cli.bind {
        config = config.with_local_addr(addr);
    }
    if let Some(addr) = cli.broadcast {
        config = config.with_broadcast_addr(addr);
    }

    let notifier = Callbacks::new(
        |addr, label: &str, power, color| {
            let state = if PowerLevel::from_raw(power).is_on() {
                "on"
            } else {
                "off"
            };
            println!(
                "{:<15}  {:<32}  {:<3}  {}",
                addr,
                label,
                state,
                color.describe(false)
            );
        },
        |addr, power| {
            let state = if PowerLevel::from_raw(power).is_on() {
                "on"
            } else {
                "off"
            };
            println!("{:<15}  power is now {}", addr, state)
        },
        |addr, color: Color| {
            println!(
                "{:<15}  color is now {}",
                addr,
                color.to_hsbk().describe(true)
            )
        },
    );

    let client = Client::new(config, notifier)?;
    info!(
        "Listening on {}, probing {} every {}s",
        client.bound_addr(),
        client.broadcast_addr(),
        cli.interval
    );

    loop {
        if let Err(e) = client.probe(None) {
            error!("Probe failed: {}", e);
            return Err(e);
        }
        thread::sleep(Duration::from_secs(cli.interval.max(1)));
    }
}
