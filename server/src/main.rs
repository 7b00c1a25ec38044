use clap::Parser;
use log::{error, info};
use server::config::{ServerConfig, TransportKind};
use server::runtime::{Server, World};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Virtual world server")]
struct Args {
    /// TOML configuration file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the configuration
    #[arg(short, long)]
    address: Option<String>,

    /// Transport to listen on, overrides the configuration
    #[arg(short, long, value_parser = parse_transport)]
    transport: Option<TransportKind>,

    /// Seconds between stats lines in the log, 0 to disable
    #[arg(long, default_value = "60")]
    stats_interval: u64,
}

fn parse_transport(value: &str) -> Result<TransportKind, String> {
    match value {
        "udp" => Ok(TransportKind::Udp),
        "tcp" => Ok(TransportKind::Tcp),
        other => Err(format!("unknown transport '{}' (expected udp or tcp)", other)),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    run(args).map_err(|e| {
        error!("Server failed: {}", e);
        e.into()
    })
}

fn run(args: Args) -> Result<(), server::ServerError> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(address) = args.address {
        config.listen.address = address;
    }
    if let Some(transport) = args.transport {
        config.listen.transport = transport;
    }
    config.validate()?;

    let world = World::bootstrap(&config)?;
    let server = Server::start(&config, &world)?;
    info!("Serving on {}", server.local_addr());

    // Runs until the process is killed
    let interval = Duration::from_secs(args.stats_interval.max(1));
    loop {
        thread::sleep(interval);
        if args.stats_interval > 0 {
            let stats = server.stats();
            info!(
                "{} users ({} leaving), {} packets in, {} dropped, {} reaped",
                stats.users, stats.pending_logouts, stats.received, stats.dropped, stats.reaped
            );
        }
    }
}
