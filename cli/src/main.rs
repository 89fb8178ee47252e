// nearwave — Nearby pairing and ranging CLI
//
// Cross-platform (macOS, Linux, Windows) command-line interface for Nearwave.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use nearwave_core::{
    start_lan_transport, DeviceIdentity, MemoryHub, MemoryStorage, NearwaveNode, NodeConfig,
    NodeEvent, RangingProvider, SimulatedRanging, SledStorage, StorageBackend, Transport,
    UnsupportedRanging,
};
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "nearwave")]
#[command(about = "Nearwave — Nearby peer pairing and ranging", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the pairing node on the local network
    Start {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long)]
        service: Option<String>,
        #[arg(short, long)]
        name: Option<String>,
        /// Run without a ranging provider
        #[arg(long)]
        no_ranging: bool,
    },
    /// Run a two-node pairing demo entirely in memory
    Demo,
    /// Show identity information
    Identity,
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            port,
            service,
            name,
            no_ranging,
        } => cmd_start(port, service, name, no_ranging).await,
        Commands::Demo => cmd_demo().await,
        Commands::Identity => cmd_identity().await,
        Commands::Config { action } => cmd_config(action).await,
    }
}

fn open_storage() -> Result<(Arc<dyn StorageBackend>, std::path::PathBuf)> {
    let storage_path = config::Config::data_dir()?.join("storage");
    let store = SledStorage::new(&storage_path)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to open storage")?;
    Ok((Arc::new(store), storage_path))
}

async fn cmd_start(
    port: Option<u16>,
    service: Option<String>,
    name: Option<String>,
    no_ranging: bool,
) -> Result<()> {
    let mut cfg = config::Config::load()?;
    if let Some(port) = port {
        cfg.listen_port = port;
    }
    if let Some(service) = service {
        cfg.service_id = service;
    }
    if let Some(name) = name {
        cfg.display_name = Some(name);
    }

    let node_config = cfg.node_config();
    node_config.validate()?;

    let (store, _) = open_storage()?;
    let identity = DeviceIdentity::load_or_generate(&store)?;
    let display_name = node_config.effective_display_name(identity.device_id());

    println!("{} Identity loaded", "✓".green());
    println!(
        "  Device ID: {}",
        identity.device_id().to_string().bright_cyan()
    );
    println!(
        "  Peer ID:   {}",
        identity.libp2p_keypair()?.public().to_peer_id()
    );
    println!();

    let keypair = identity.libp2p_keypair()?;
    let (event_tx, event_rx) = mpsc::channel(256);
    let transport: Arc<dyn Transport> = Arc::new(
        start_lan_transport(keypair, &node_config, display_name.clone(), event_tx).await?,
    );

    let (reading_tx, reading_rx) = mpsc::channel(8);
    let ranging: Arc<dyn RangingProvider> = if no_ranging || !cfg.simulate_ranging {
        drop(reading_tx);
        Arc::new(UnsupportedRanging::new())
    } else {
        Arc::new(SimulatedRanging::new(reading_tx)?)
    };

    let node = Arc::new(NearwaveNode::new(
        node_config,
        identity,
        transport,
        event_rx,
        ranging,
        reading_rx,
    )?);

    let mut events = node.events().context("Event stream already taken")?;

    node.start().await?;
    println!(
        "{} Advertising as {} on service {}",
        "✓".green(),
        display_name.bright_yellow(),
        cfg.service_id.bright_cyan()
    );
    println!();
    println!("Commands: {}", "status, peers, reading, quit".dimmed());
    print!("> ");
    std::io::stdout().flush()?;

    // Print node events as they arrive
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                NodeEvent::RosterChanged { connected } => {
                    if connected.is_empty() {
                        println!("\n{}", "Nobody nearby".dimmed());
                    } else {
                        println!(
                            "\n{} Nearby: {}",
                            "✓".green(),
                            connected.join(", ").bright_cyan()
                        );
                    }
                    print!("> ");
                    let _ = std::io::stdout().flush();
                }
                NodeEvent::RangingConfigured { peer } => {
                    println!(
                        "\n{} Ranging with {}",
                        "✓".green(),
                        peer.to_string().bright_cyan()
                    );
                    print!("> ");
                    let _ = std::io::stdout().flush();
                }
                NodeEvent::ReadingChanged { reading } => {
                    let [x, y, z] = reading.direction.unwrap_or([0.0, 0.0, 0.0]);
                    print!(
                        "\r{} {:.2} m  direction ({:+.2}, {:+.2}, {:+.2})   ",
                        "↔".bright_blue(),
                        reading.distance_m,
                        x,
                        y,
                        z
                    );
                    let _ = std::io::stdout().flush();
                }
            }
        }
    });

    // Handle user input
    let node_for_stdin = node.clone();
    let stdin_task = tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let input = line.trim();
            match input {
                "" => {}
                "quit" | "exit" => {
                    println!("Shutting down...");
                    node_for_stdin.stop().await;
                    break;
                }
                "status" => {
                    println!(
                        "  Device ID: {}",
                        node_for_stdin.device_id().to_string().bright_cyan()
                    );
                    println!("  Running:   {}", node_for_stdin.is_running());
                    println!("  Peers:     {}", node_for_stdin.connected_peers().len());
                    println!(
                        "  Distance:  {:.2} m",
                        node_for_stdin.current_reading().distance_m
                    );
                }
                "peers" => {
                    let peers = node_for_stdin.connected_peers();
                    if peers.is_empty() {
                        println!("  {}", "No peers.".dimmed());
                    } else {
                        for peer in peers {
                            println!("  {} {}", "•".bright_cyan(), peer);
                        }
                    }
                }
                "reading" => {
                    let reading = node_for_stdin.current_reading();
                    match reading.direction {
                        Some([x, y, z]) => println!(
                            "  {:.2} m  direction ({:+.2}, {:+.2}, {:+.2})",
                            reading.distance_m, x, y, z
                        ),
                        None => println!("  {:.2} m  direction unknown", reading.distance_m),
                    }
                }
                _ => {
                    println!("  {}", "Try: status, peers, reading, quit".dimmed());
                }
            }
            print!("> ");
            let _ = std::io::stdout().flush();
        }
    });

    tokio::select! {
        _ = event_task => {}
        _ = stdin_task => {}
    }

    node.stop().await;
    println!("{} Stopped", "✓".green());
    Ok(())
}

async fn cmd_demo() -> Result<()> {
    println!("{}", "Running two-node demo...".bold());
    println!();

    let hub = MemoryHub::new();
    let alice = demo_node(&hub, "alice").await?;
    let bob = demo_node(&hub, "bob").await?;
    println!("  {} Two nodes started", "✓".green());

    wait_for("pairing", || {
        alice.connected_peers() == vec!["bob".to_string()]
            && bob.connected_peers() == vec!["alice".to_string()]
    })
    .await?;
    println!(
        "  {} Paired: alice sees {:?}",
        "✓".green(),
        alice.connected_peers()
    );

    wait_for("ranging readings", || {
        alice.current_reading().distance_m > 0.0 && bob.current_reading().distance_m > 0.0
    })
    .await?;
    println!(
        "  {} alice reads {:.2} m",
        "✓".green(),
        alice.current_reading().distance_m
    );
    println!(
        "  {} bob reads {:.2} m",
        "✓".green(),
        bob.current_reading().distance_m
    );

    alice.stop().await;
    bob.stop().await;
    println!("  {} Clean shutdown", "✓".green());
    println!();
    println!("{}", "Demo complete!".green().bold());
    Ok(())
}

async fn demo_node(hub: &MemoryHub, name: &str) -> Result<Arc<NearwaveNode>> {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let identity = DeviceIdentity::load_or_generate(&store)?;

    let (event_tx, event_rx) = mpsc::channel(64);
    let transport: Arc<dyn Transport> = Arc::new(hub.endpoint(name, event_tx));

    let (reading_tx, reading_rx) = mpsc::channel(8);
    let ranging: Arc<dyn RangingProvider> =
        Arc::new(SimulatedRanging::new(reading_tx)?.with_interval(Duration::from_millis(50)));

    let node_config = NodeConfig::new("nearwave-demo").with_display_name(name);
    let node = Arc::new(NearwaveNode::new(
        node_config, identity, transport, event_rx, ranging, reading_rx,
    )?);
    node.start().await?;
    Ok(node)
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..200 {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    anyhow::bail!("Timed out waiting for {}", what)
}

async fn cmd_identity() -> Result<()> {
    let (store, storage_path) = open_storage()?;
    let identity = DeviceIdentity::load_or_generate(&store)?;

    println!("{}", "Device Identity".bold());
    println!(
        "  Device ID:   {}",
        identity.device_id().to_string().bright_cyan()
    );
    println!(
        "  Public Key:  {}",
        identity.keys().public_key_hex().bright_yellow()
    );
    println!("  Fingerprint: {}", identity.keys().fingerprint());
    println!(
        "  Peer ID:     {}",
        identity.libp2p_keypair()?.public().to_peer_id()
    );
    println!("  Storage:     {}", storage_path.display());
    Ok(())
}

async fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut cfg = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            cfg.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => {
            if let Some(value) = cfg.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in cfg.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}
