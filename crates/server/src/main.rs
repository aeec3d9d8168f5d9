mod config;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::runtime::Runtime;

use config::ServerConfig;
use cpsr::{
    AuthoritativeServer, FixedFrequencyLoop, PacketLossSimulation, PeriodicSignal, ServerChannel,
    ServerTransport, SimulationConfig,
};

#[derive(Parser)]
#[command(name = "cpsr-server")]
#[command(about = "Authoritative server for client-side prediction")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = cpsr::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, help = "Simulation config shared with the client (TOML)")]
    config: Option<PathBuf>,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, default_value_t = 0.0, help = "Snapshot loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, help = "Write logs to this file instead of stderr")]
    log_file: Option<PathBuf>,

    #[arg(long, help = "Exit after this many seconds")]
    duration_secs: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    let simulation = match &args.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };

    let config = ServerConfig {
        bind: args.bind,
        port: args.port,
        max_clients: args.max_clients,
        packet_loss: PacketLossSimulation::new(args.loss_percent),
        run_for: args.duration_secs.map(Duration::from_secs),
        simulation,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start network runtime")?;
    let running = watch_ctrl_c(&runtime);

    let addr = config.bind_addr()?;
    let transport =
        ServerTransport::bind(runtime.handle(), addr, config.max_clients, config.packet_loss)?;
    log::info!(
        "Server started on {} (tick {} Hz, loop {} Hz, send {} Hz)",
        transport.local_addr(),
        config.simulation.tick_rate,
        config.simulation.loop_rate,
        config.simulation.send_rate
    );
    if config.packet_loss.enabled {
        log::info!("Simulating {}% snapshot loss", config.packet_loss.loss_percent);
    }

    let mut server = AuthoritativeServer::new(transport, config.simulation);
    let mut status = PeriodicSignal::new(1, config.simulation.loop_rate);
    let started = Instant::now();

    let loop_stats = FixedFrequencyLoop::new().start(
        config.simulation.loop_rate,
        |_| {
            server.tick();
            if status.process_and_get_signal() {
                let clients = server.client_count();
                let bps = server.channel_mut().average_bits_per_second_sent();
                log::debug!("{} clients, sending {:.0} bps", clients, bps);
            }
            Ok::<(), anyhow::Error>(())
        },
        || {
            !running.load(Ordering::Acquire)
                || config.run_for.is_some_and(|limit| started.elapsed() >= limit)
        },
    )?;

    let stats = server.stats();
    let network = server.channel().stats();
    log::info!(
        "Server shutting down after {} ticks ({} dropped): {} commands received, {} snapshots sent, {} malformed, {} lost",
        loop_stats.ticks,
        loop_stats.dropped_ticks,
        stats.commands_received,
        stats.snapshots_sent,
        network.malformed_dropped,
        network.simulated_losses
    );

    Ok(())
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        let file = File::create(path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn watch_ctrl_c(runtime: &Runtime) -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    runtime.spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::warn!("Unable to listen for ctrl-c: {}", err);
            return;
        }
        log::info!("Shutdown requested");
        flag.store(false, Ordering::Release);
    });
    running
}
