//! Motion-controller daemon: bootstraps the EtherCAT bus, then hands off to
//! the fixed-period control loop until a shutdown signal or `--max-cycles`
//! is reached.

mod diagnostics;
mod signals;

use clap::Parser;
use diagnostics::{format_prometheus_metrics, DiagnosticsCollector};
use motion_common::command::Command;
use motion_common::config::{EthercatConfig, MotionConfig};
use motion_common::diagnostics::LoopTelemetry;
use motion_common::drive::StateBlock;
use motion_common::metrics::CycleMetrics;
use motion_common::state::{RuntimeState, StateMachine};
use motion_fieldbus::EthercatMaster;
use motion_runtime::{bootstrap, CouplingConfig, Watchdog};
use signals::SignalHandler;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the motion-controller daemon.
#[derive(Parser, Debug)]
#[command(name = "motion-daemon", about = "EtherCAT motion controller daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured bus adapter (network interface / capture device).
    #[arg(long, value_name = "ADAPTER")]
    adapter: Option<String>,

    /// Run against the simulated transport instead of a real EtherCAT adapter.
    #[arg(long)]
    simulated: bool,

    /// Stop after this many control-loop cycles (0 = run until signaled).
    #[arg(long, default_value_t = 0)]
    max_cycles: u64,

    /// Log level filter (e.g. "info", "motion_runtime=debug,motion_daemon=info").
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(?args, "starting motion-daemon");

    if let Err(e) = run_daemon(&args) {
        error!(error = %e, "motion-daemon exited with error");
        return Err(e);
    }

    info!("motion-daemon exited cleanly");
    Ok(())
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "motion_daemon={log_level},motion_runtime={log_level},motion_fieldbus={log_level},motion_common={log_level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<MotionConfig> {
    let mut config = match &args.config {
        Some(path) => MotionConfig::from_file(path)?,
        None => {
            warn!("no --config given, using built-in defaults");
            MotionConfig::default()
        }
    };

    if let Some(adapter) = &args.adapter {
        config.bus.adapter = Some(adapter.clone());
    }

    Ok(config)
}

fn build_master(config: &MotionConfig, simulated: bool) -> anyhow::Result<EthercatMaster> {
    let ethercat_cfg = EthercatConfig {
        interface: config.bus.adapter.clone(),
        dc_enabled: config.bus.dc_sync_enabled,
        dc_sync0_cycle: config.cycle_time,
        esi_path: None,
        wkc_error_threshold: 5,
    };

    if simulated {
        info!("using simulated EtherCAT transport");
        return Ok(EthercatMaster::new(ethercat_cfg));
    }

    #[cfg(feature = "soem")]
    {
        let interface = ethercat_cfg
            .interface
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--adapter or bus.adapter must be set for real hardware"))?;
        let transport = motion_fieldbus::SoemTransport::new(&interface)
            .map_err(|e| anyhow::anyhow!("failed to open SOEM transport: {e}"))?;
        return Ok(EthercatMaster::with_transport(ethercat_cfg, Box::new(transport)));
    }

    #[cfg(not(feature = "soem"))]
    {
        anyhow::bail!("real hardware support requires building with --features soem; pass --simulated otherwise")
    }
}

fn run_daemon(args: &Args) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let state_machine = Mutex::new(StateMachine::new());
    state_machine
        .lock()
        .unwrap()
        .transition(RuntimeState::Init)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let master = build_master(&config, args.simulated)?;
    let outcome = bootstrap::bootstrap(master, &config).map_err(|e| anyhow::anyhow!("bootstrap failed: {e}"))?;
    state_machine
        .lock()
        .unwrap()
        .transition(RuntimeState::Run)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let num_slaves = outcome.slots.len();
    let (command_tx, command_rx) = mpsc::channel::<Command>();
    let state_block = Arc::new(StateBlock::new(num_slaves));
    let coupling = Arc::new(CouplingConfig::new(config.safety.coupling_gain, config.safety.coupling_enabled));
    let telemetry = Arc::new(LoopTelemetry::new());
    let stop_requested = Arc::new(AtomicBool::new(false));

    let signal_handler = SignalHandler::new()?;

    let mut watchdog = Watchdog::new(config.watchdog_timeout);
    let watchdog_trip = Arc::clone(&stop_requested);
    watchdog
        .start(move || {
            error!("software watchdog timeout, requesting shutdown");
            watchdog_trip.store(true, Ordering::Relaxed);
        })
        .map_err(|e| anyhow::anyhow!("failed to start watchdog: {e}"))?;

    let control_loop = motion_runtime::ControlLoop::new(
        outcome,
        &config,
        command_rx,
        Arc::clone(&state_block),
        Arc::clone(&coupling),
        Arc::clone(&stop_requested),
        Arc::clone(&telemetry),
        Some(watchdog),
    );

    let realtime_config = config.realtime.clone();
    let max_cycles = args.max_cycles;
    let loop_handle = std::thread::Builder::new()
        .name("motion-control".into())
        .spawn(move || {
            let fail_fast = realtime_config.fail_fast;
            if let Err(e) = motion_runtime::init_realtime(&realtime_config) {
                if fail_fast {
                    return Err(e);
                }
                warn!(error = %e, "real-time initialization failed, continuing without it");
            }
            control_loop.run(max_cycles)
        })?;

    run_status_loop(&signal_handler, &stop_requested, &telemetry, &state_machine, &config);

    match loop_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(anyhow::anyhow!("control loop error: {e}")),
        Err(_) => return Err(anyhow::anyhow!("control loop thread panicked")),
    }

    state_machine
        .lock()
        .unwrap()
        .transition(RuntimeState::SafeStop)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    drop(command_tx);
    Ok(())
}

/// Blocks the main thread, logging periodic status until a shutdown signal
/// arrives or `stop_requested` is otherwise set (e.g. by a `stop-all` command
/// processed inside the control loop).
fn run_status_loop(
    signal_handler: &SignalHandler,
    stop_requested: &Arc<AtomicBool>,
    telemetry: &Arc<LoopTelemetry>,
    state_machine: &Mutex<StateMachine>,
    config: &MotionConfig,
) {
    let metrics = CycleMetrics::new(config.metrics.histogram_size, config.cycle_time);
    let collector = DiagnosticsCollector::new(Arc::clone(telemetry));
    let poll_interval = Duration::from_secs(1);

    loop {
        if signal_handler.shutdown_requested() || stop_requested.load(Ordering::Relaxed) {
            info!("shutdown requested, stopping control loop");
            stop_requested.store(true, Ordering::Relaxed);
            break;
        }

        let runtime_state = state_machine.lock().unwrap().state();
        let snapshot = collector.snapshot(runtime_state, &metrics);
        info!(
            health = %snapshot.health,
            cycles = snapshot.cycle_count,
            overruns = snapshot.overrun_count,
            moving_axes = snapshot.moving_axes,
            "status"
        );

        if config.metrics.enabled {
            let _ = format_prometheus_metrics(&snapshot, config.cycle_time.as_nanos() as u64);
        }

        std::thread::sleep(poll_interval);
    }
}
