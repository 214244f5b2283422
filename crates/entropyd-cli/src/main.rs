//! CLI for entropyd — hardware-backed random numbers over HTTP.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use entropyd_core::{
    spawn_periodic, Error, Fortuna, FortunaProcessor, ServiceConfig, Store, TrngProducer,
};
use entropyd_server::AppState;

#[derive(Parser)]
#[command(name = "entropyd")]
#[command(about = "entropyd — secure-element TRNG and Fortuna CSPRNG service")]
#[command(version = entropyd_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the TRNG producer, the Fortuna processor and the HTTP API
    Serve(ServeArgs),

    /// Probe the entropy source once and print one hash
    Probe(ProbeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Storage file location (overrides DB_PATH)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Two-wire bus id of the secure element (overrides I2C_BUS_NUMBER)
    #[arg(long)]
    i2c_bus: Option<u8>,

    /// Force software mode, never touching the bus
    #[arg(long)]
    force_mock: bool,
}

#[derive(Args)]
struct ProbeArgs {
    /// Two-wire bus id of the secure element (overrides I2C_BUS_NUMBER)
    #[arg(long)]
    i2c_bus: Option<u8>,

    /// Force software mode, never touching the bus
    #[arg(long)]
    force_mock: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve(args) => serve(&args),
        Commands::Probe(args) => probe(&args),
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "fatal");
        process::exit(e.exit_code());
    }
}

fn serve(args: &ServeArgs) -> entropyd_core::Result<()> {
    let mut config = ServiceConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(path) = &args.db_path {
        config.db_path = path.clone();
    }
    if let Some(bus) = args.i2c_bus {
        config.i2c_bus_number = bus;
    }
    if args.force_mock {
        config.force_mock_mode = true;
    }
    config.validate()?;

    let store = Arc::new(Store::open(&config)?);
    let producer = Arc::new(TrngProducer::init(&config)?);
    let mut fortuna = Fortuna::new(&config);
    fortuna.restore(&store)?;
    let fortuna = Arc::new(Mutex::new(fortuna));

    let shutdown = Arc::new(AtomicBool::new(false));
    let producer_loop = {
        let producer = Arc::clone(&producer);
        let store = Arc::clone(&store);
        spawn_periodic(
            "trng-producer",
            config.hash_interval,
            Arc::clone(&shutdown),
            move || {
                if let Err(e) = producer.tick(&store) {
                    tracing::error!(error = %e, "TRNG production tick failed");
                }
            },
        )
    };
    let processor = FortunaProcessor::new(Arc::clone(&store), Arc::clone(&fortuna), &config);
    let processor_loop = spawn_periodic(
        "fortuna-processor",
        config.process_interval,
        Arc::clone(&shutdown),
        move || {
            if let Err(e) = processor.tick() {
                tracing::error!(error = %e, "Fortuna processing tick failed");
            }
        },
    );

    let state = Arc::new(AppState::new(store, producer, fortuna));
    let runtime = tokio::runtime::Runtime::new()?;
    let served = runtime.block_on(entropyd_server::run_server(
        state,
        &config.host,
        config.port,
    ));

    // The listener is down; let both loops finish their current tick.
    shutdown.store(true, Ordering::Relaxed);
    let _ = producer_loop.join();
    let _ = processor_loop.join();
    served.map_err(Error::from)
}

fn probe(args: &ProbeArgs) -> entropyd_core::Result<()> {
    let mut config = ServiceConfig::from_env()?;
    if let Some(bus) = args.i2c_bus {
        config.i2c_bus_number = bus;
    }
    if args.force_mock {
        config.force_mock_mode = true;
    }

    let producer = TrngProducer::init(&config)?;
    let (hash, source) = producer.next_hash()?;
    println!("mode:   {}", producer.mode().as_str());
    println!("source: {source}");
    println!("hash:   {}", hex::encode(hash));
    if let Some(e) = producer.last_error() {
        println!("last error: {e}");
    }
    Ok(())
}
