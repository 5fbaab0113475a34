use std::io::Write as _;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};
use tokio::io::{AsyncBufReadExt, BufReader};

use chordswarm::address::Address;
use chordswarm::controller::Controller;
use chordswarm::id::Id;
use chordswarm::pool::NodePool;
use chordswarm::remote_node::RemoteNode;
use chordswarm::transport::Transport;

/// A Chord-with-swarms node pool: one process, one UDP socket, many
/// logical ring participants.
#[derive(Parser, Debug)]
#[command(name = "chordswarm")]
struct Args {
    /// IP address to bind the shared UDP socket to.
    bind_ip: String,

    /// UDP port to bind to; 0 requests an ephemeral port.
    bind_port: u16,

    /// Static bootstrap peer, `host:port`. May be repeated.
    #[arg(long = "bootstrap")]
    bootstrap: Vec<String>,

    /// Host one virtual node with a fixed-size random payload at startup.
    #[arg(long)]
    scenario_host_random: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    CombinedLogger::init(vec![TermLogger::new(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .expect("logger already initialized");

    let bind_addr = format!("{}:{}", args.bind_ip, args.bind_port);
    // The flag names only an address; the peer's real id is unknown until
    // contacted, so the bootstrap hint carries the sentinel id (see
    // `NodePool::handle_inbound`).
    let bootstrap = args
        .bootstrap
        .first()
        .map(|addr| RemoteNode::new(Id::default(), Address::new(addr.clone())));

    let pool = NodePool::new(Address::new(bind_addr.clone()), bootstrap);
    let pool_for_dispatch = Arc::clone(&pool);
    let transport = Transport::bind(&bind_addr, move |inbound| {
        let pool = Arc::clone(&pool_for_dispatch);
        tokio::spawn(async move {
            // The receive loop hands us the datagram; answering it needs the
            // same transport it arrived on, fetched lazily to avoid a cycle
            // between `Transport::bind`'s closure and the `Arc<Transport>`
            // it will eventually produce.
            if let Some(transport) = pool.transport_for_dispatch().await {
                pool.handle_inbound(inbound, &transport).await;
            }
        });
    })
    .await
    .unwrap_or_else(|e| {
        error!("failed to bind {bind_addr}: {e}");
        std::process::exit(1);
    });

    pool.attach_transport(Arc::clone(&transport)).await;

    info!("bound to {}", transport.local_addr().unwrap());
    let controller = Controller::new(Arc::clone(&pool), Arc::clone(&transport));

    if args.scenario_host_random {
        let mut payload = vec![0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut payload);
        match controller.host(payload).await {
            Ok(node) => info!("scenario-host-random: hosted {}", node.id),
            Err(e) => error!("scenario-host-random failed: {e}"),
        }
    }

    run_shell(&controller).await;
}

/// The interactive command-line shell (spec §6, listed as an external
/// collaborator): `ls`, `jr <id-hex> <file>`, `hl <file>`, `help`.
async fn run_shell(controller: &Controller) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_prompt();

    while let Ok(Some(line)) = lines.next_line().await {
        let args: Vec<&str> = line.trim().split_whitespace().collect();
        match args.as_slice() {
            ["ls"] => {
                for (id, has_value) in controller.list().await {
                    println!("{id} value={has_value}");
                }
            }
            ["jr", id_hex, path] => {
                if let Err(e) = join_and_fetch(controller, id_hex, path).await {
                    println!("error: {e}");
                }
            }
            ["hl", path] => {
                if let Err(e) = host_file(controller, path).await {
                    println!("error: {e}");
                }
            }
            ["help"] | [] => print_help(),
            _ => println!("unrecognized command; try `help`"),
        }
        print_prompt();
    }
}

async fn join_and_fetch(controller: &Controller, id_hex: &str, path: &str) -> std::io::Result<()> {
    let id = match parse_id_hex(id_hex) {
        Some(id) => id,
        None => {
            println!("invalid id: {id_hex}");
            return Ok(());
        }
    };

    match controller.fetch(id).await {
        Ok(bytes) => {
            std::fs::File::create(path)?.write_all(&bytes)?;
            println!("wrote {} bytes to {path}", bytes.len());
        }
        Err(e) => println!("fetch failed: {e}"),
    }
    Ok(())
}

async fn host_file(controller: &Controller, path: &str) -> std::io::Result<()> {
    let bytes = std::fs::read(path)?;
    match controller.host(bytes).await {
        Ok(node) => println!("{}", node.id),
        Err(e) => println!("host failed: {e}"),
    }
    Ok(())
}

fn parse_id_hex(hex: &str) -> Option<Id> {
    if hex.len() != chordswarm::ID_BYTES * 2 {
        return None;
    }
    let mut bytes = [0u8; chordswarm::ID_BYTES];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(Id::new(bytes))
}

fn print_help() {
    println!("commands:");
    println!("  ls                    list local virtual nodes and whether each has a value");
    println!("  jr <id-hex> <file>    fetch content for id, write it to file on success");
    println!("  hl <file>             host the contents of file, print the resulting id");
    println!("  help                  show this message");
}

fn print_prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
