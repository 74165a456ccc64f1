//! DragonBus - Message catalog tooling
//!
//! Inspects the catalog, validates message bodies and runs a local
//! request/response demo on the in-process bus.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use dragonbus::config::{self, Config};
use dragonbus::protocol::{
    BodyFormat, GameType, GetJukeboxQueueMessage, MessageKind, NotifyInstanceCreatedMessage,
    RequestAddToQueueMessage, RequestCreateInstanceMessage, Variant,
};
use dragonbus::registry::Registry;
use dragonbus::rpc::{Messenger, RpcError};
use dragonbus::InMemoryBus;

/// DragonBus - game server message catalog
#[derive(Parser)]
#[command(name = "dragonbus")]
#[command(author = "DragonBus Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Inspect and exercise the game server message catalog", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every registered tag and its fields
    Catalog {
        /// Include the legacy un-namespaced tags
        #[arg(long)]
        legacy: bool,
    },

    /// Decode a JSON body against a tag and print its canonical form
    Validate {
        /// Wire tag of the message
        #[arg(short, long)]
        tag: String,

        /// JSON body
        #[arg(short, long)]
        json: String,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the queue/instance and jukebox scenarios on an in-process bus
    Demo {
        /// RPC timeout in milliseconds
        #[arg(short, long, default_value_t = 500)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Catalog { legacy } => {
            let mut codec = config.codec.clone();
            codec.accept_legacy_tags |= legacy;
            print_catalog(&Registry::from_config(&codec)?);
        }
        Commands::Validate { tag, json } => {
            let mut codec = config.codec.clone();
            codec.accept_legacy_tags = true;
            let registry = Registry::from_config(&codec)?;
            let message = registry.decode(&tag, json.as_bytes(), BodyFormat::Json)?;
            let (canonical_tag, body) = registry.encode(&message, BodyFormat::Json)?;
            println!("{}", canonical_tag);
            println!("{}", String::from_utf8(body)?);
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Demo { timeout } => {
            run_demo(config, Duration::from_millis(timeout)).await?;
        }
    }

    Ok(())
}

fn print_catalog(registry: &Registry) {
    println!("DragonBus Catalog ({} tags)", registry.len());
    println!("==========================\n");

    for descriptor in registry.descriptors() {
        let marker = if descriptor.alias { " (alias)" } else { "" };
        println!("{}{}", descriptor.tag, marker);
        println!("    {}", descriptor.shape);
        if let Some(response) = descriptor.kind.response_kind() {
            println!("    RPC, answered by {}", response.canonical_tag());
        }
    }
}

/// Plays a coordination service and one game server against each other
async fn run_demo(config: Config, timeout: Duration) -> anyhow::Result<()> {
    let bus = InMemoryBus::new(config.bus.channel_capacity);
    let registry = Arc::new(Registry::from_config(&config.codec)?);

    let container_id = Uuid::new_v4();
    let mut node_config = config.clone();
    node_config.general.node_id = Some(container_id);
    let mut service_config = config.clone();
    service_config.general.node_id = Some(Uuid::new_v4());

    let node = Messenger::new(&node_config, Arc::clone(&registry), Arc::new(bus.clone()));
    let service = Messenger::new(&service_config, Arc::clone(&registry), Arc::new(bus.clone()));

    // The game server creates instances on request
    node.handle(|request: RequestCreateInstanceMessage, ctx| async move {
        let created = NotifyInstanceCreatedMessage {
            container_id: request.container_id,
            instance_id: Uuid::new_v4(),
            game_type: request.game_type,
        };
        if let Err(e) = ctx.reply(created).await {
            tracing::error!("Failed to answer create-instance request: {}", e);
        }
    })?;

    // The service forwards queue requests to the main loop
    let (queue_tx, mut queue_rx) = mpsc::channel(16);
    service.handle(move |request: RequestAddToQueueMessage, _ctx| {
        let queue_tx = queue_tx.clone();
        async move {
            let _ = queue_tx.send(request).await;
        }
    })?;

    node.start().await?;
    service.start().await?;

    let player = Uuid::new_v4();
    println!("\n========================================");
    println!("  DragonBus Demo");
    println!("========================================");
    println!("  Game server: {}", container_id);
    println!("  Service:     {}", service.node_id());
    println!("  Player:      {}", player);
    println!("========================================\n");

    node.publish(RequestAddToQueueMessage {
        player,
        game_type: GameType::new("Skywars"),
    })
    .await?;

    let queued = tokio::time::timeout(timeout, queue_rx.recv())
        .await
        .ok()
        .flatten()
        .ok_or_else(|| anyhow::anyhow!("queue request never reached the service"))?;
    println!("Service received queue request for {}", queued.game_type);

    let created = service
        .request(
            &service.topic_of(&container_id),
            RequestCreateInstanceMessage {
                container_id,
                game_type: queued.game_type,
            },
            Some(timeout),
        )
        .await?;
    println!(
        "Instance {} created on {} for {}",
        created.instance_id, created.container_id, created.game_type
    );

    // Nobody answers jukebox queries in this demo
    match service
        .request(
            &service.topic_of(&container_id),
            GetJukeboxQueueMessage { player },
            Some(timeout),
        )
        .await
    {
        Err(RpcError::Timeout { elapsed, .. }) => {
            println!(
                "{} timed out after {:?} as expected",
                GetJukeboxQueueMessage::TAG,
                elapsed
            );
        }
        Ok(response) => println!("Unexpected jukebox response: {:?}", response),
        Err(e) => return Err(e.into()),
    }

    println!("\nService stats: {:?}", service.stats());
    println!("Node stats:    {:?}", node.stats());
    println!(
        "Requests still pending: {}",
        service.pending().len() + node.pending().len()
    );

    node.shutdown();
    service.shutdown();
    tracing::debug!("Demo finished, {} kinds in catalog", MessageKind::ALL.len());

    Ok(())
}
