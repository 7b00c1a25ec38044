use clap::{Args, Parser, Subcommand};
use client::{Comm, ObjectStore};
use log::{error, info, warn};
use shared::proto::access_name;
use shared::KeyPair;
use std::io::BufRead;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in to a server and read commands from stdin
    Connect(ConnectArgs),
    /// Generate an identity key and write it as PKCS#8 PEM
    Keygen {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Encrypt the key file with this passphrase
        #[arg(short, long)]
        passphrase: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ConnectArgs {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:4500")]
    server: String,

    #[arg(short = 'u', long)]
    username: String,

    /// Character name, defaults to the username
    #[arg(short = 'c', long)]
    charname: Option<String>,

    /// Identity key file; an ephemeral key is generated when omitted
    #[arg(short = 'k', long)]
    key_file: Option<PathBuf>,

    #[arg(short = 'p', long)]
    passphrase: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Keygen { output, passphrase } => {
            let keys = KeyPair::generate();
            keys.store(&output, passphrase.as_deref().filter(|p| !p.is_empty()))?;
            info!("Wrote identity key to {}", output.display());
            println!("{}", hex::encode(keys.public_der()?));
            Ok(())
        }
        Command::Connect(args) => run(args),
    }
}

fn run(args: ConnectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let server = args
        .server
        .to_socket_addrs()?
        .next()
        .ok_or("server address did not resolve")?;

    let identity = match &args.key_file {
        Some(path) => KeyPair::load(path, args.passphrase.as_deref())?,
        None => {
            warn!("No key file given, using an ephemeral identity key");
            KeyPair::generate()
        }
    };

    let cache = Arc::new(ObjectStore::new());
    let comm = Comm::new(server, identity, cache.clone())?;
    let charname = args.charname.as_deref().unwrap_or(&args.username);
    comm.send_login(&args.username, charname)?;

    info!("Commands: move X Y Z, stop, look X Y Z, stats, quit");
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["quit"] | ["logout"] => break,
            ["stats"] => {
                let stats = comm.stats();
                println!(
                    "sent {} received {} dispatched {} dropped {} objects {} access {}",
                    stats.sent,
                    stats.received,
                    stats.dispatched,
                    stats.dropped,
                    cache.len(),
                    access_name(comm.access_level().unwrap_or(0))
                );
            }
            [verb, rest @ ..] => {
                if let Err(e) = send_command(&comm, verb, rest) {
                    error!("{}", e);
                }
            }
        }
    }

    comm.send_logout()?;
    Ok(())
}

/// Action ids of the server's built-in `core` module, in registration order
const MOVE_TO: u16 = 1;
const STOP: u16 = 2;
const LOOK_AT: u16 = 3;

fn send_command(comm: &Comm, verb: &str, rest: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let object_id = comm.object_id().ok_or("not logged in yet")?;
    let action_id = match verb {
        "move" => MOVE_TO,
        "stop" => STOP,
        "look" => LOOK_AT,
        other => return Err(format!("unknown command '{}'", other).into()),
    };

    let mut dest = [0i64; 3];
    for (slot, word) in dest.iter_mut().zip(rest) {
        *slot = (word.parse::<f64>()? * shared::proto::POSITION_SCALE).round() as i64;
    }

    comm.send_action_request(object_id, action_id, 100, [0; 3], 0, dest)?;
    Ok(())
}
