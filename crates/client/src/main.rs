mod config;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::runtime::Runtime;

use config::ClientConfig;
use cpsr::{
    ClientChannel, ClientTransport, EntityState, FixedFrequencyLoop, InputSource, PeriodicSignal,
    PredictingClient, ScriptedInput, SimulationConfig,
};

#[derive(Parser)]
#[command(name = "cpsr-client")]
#[command(about = "Headless predicting client")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "localhost:7777",
        help = "Server address to connect to"
    )]
    server: String,

    #[arg(short, long, help = "Simulation config shared with the server (TOML)")]
    config: Option<PathBuf>,

    #[arg(
        long,
        default_value = config::DEFAULT_SCRIPT,
        help = "Held keys per outer tick, e.g. \"right:120,forward+left:30,idle:60\""
    )]
    script: ScriptedInput,

    #[arg(long, default_value_t = 500, help = "Connect retry interval in ms")]
    retry_ms: u64,

    #[arg(long, default_value_t = 4, help = "Transform log rate in Hz")]
    present_rate: u32,

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

    let mut config = ClientConfig {
        server: args.server,
        retry: Duration::from_millis(args.retry_ms),
        script: args.script,
        present_rate: args.present_rate,
        run_for: args.duration_secs.map(Duration::from_secs),
        simulation,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start network runtime")?;
    let running = watch_ctrl_c(&runtime);

    let transport =
        ClientTransport::new(runtime.handle().clone(), config.server.clone(), config.retry);
    let mut client = PredictingClient::new(transport, config.simulation);
    log::info!("Connecting to {}", config.server);
    client.connect();

    let mut present = PeriodicSignal::new(config.present_rate, config.simulation.loop_rate);
    let started = Instant::now();

    let loop_stats = FixedFrequencyLoop::new().start(
        config.simulation.loop_rate,
        |_| {
            let input = config.script.poll();
            let summary = client.tick(input);

            if let Some(correction) = summary.correction.filter(|c| c.magnitude() > 0.0) {
                log::debug!(
                    "Corrected by {:.4} at tick {} ({} replayed, misprediction {:?})",
                    correction.magnitude(),
                    correction.reference,
                    correction.replayed,
                    correction.misprediction
                );
            }

            if present.process_and_get_signal() {
                present_transforms(&mut client);
            }
            Ok::<(), anyhow::Error>(())
        },
        || {
            !running.load(Ordering::Acquire)
                || config.run_for.is_some_and(|limit| started.elapsed() >= limit)
        },
    )?;

    let stats = client.stats();
    let reconciler = client.reconciler();
    let counters = client.world().counters();
    log::info!(
        "Client shutting down after {} ticks ({} dropped): {} commands sent, {} snapshots received, {} corrections ({} superseded, {} stale), {} live / {} replayed simulation ticks",
        loop_stats.ticks,
        loop_stats.dropped_ticks,
        stats.commands_sent,
        stats.snapshots_received,
        reconciler.corrections(),
        reconciler.superseded(),
        reconciler.stale_dropped(),
        counters.live_ticks,
        counters.replayed_ticks
    );

    Ok(())
}

/// Stands in for rendering: one line per transform.
fn present_transforms(client: &mut PredictingClient<ClientTransport>) {
    let world = client.world();
    let (predicted, authoritative, unreconciled) =
        (world.predicted(), world.authoritative(), world.unreconciled());

    log::info!("predicted     {}", describe(predicted));
    log::info!("authoritative {}", describe(authoritative));
    log::info!("client only   {}", describe(unreconciled));

    let bps = client.channel_mut().average_bits_per_second_sent();
    log::info!(
        "{:?}, sending {:.0} bps, {} snapshots received",
        client.channel().state(),
        bps,
        client.channel().stats().records_received
    );
}

fn describe(state: EntityState) -> String {
    format!(
        "pos ({:8.3}, {:8.3}) vel ({:6.3}, {:6.3})",
        state.position.x, state.position.y, state.velocity.x, state.velocity.y
    )
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
