//! p4lbctl entry point.
//!
//! Reads a fleet description, brings every switch up with its pipeline and
//! rules, and reports per-device and per-rule outcomes.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use p4lb_controller::config::FleetConfig;
use p4lb_controller::device::{DeviceRpc, DumpingRpc, SimulatedSwitch};
use p4lb_controller::fleet::{ApplyReport, FleetOrch, FleetReport};
use p4lb_controller::{init_logging, LogFormat};
use p4lb_pipeline::{rules::decode_record, EntryBuilder, PipelineProfile};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// P4 load-balancer fleet controller
#[derive(Parser, Debug)]
#[command(name = "p4lbctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fleet configuration file
    #[arg(short = 'c', long, default_value = "fleet.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Log format
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,

    /// Override runtime.rpc_timeout_ms
    #[arg(long)]
    rpc_timeout_ms: Option<u64>,

    /// Override runtime.max_concurrency
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Drive in-process simulated switches instead of the configured addresses
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap every device and apply its rules
    Run,
    /// Claim one device and read a counter, leaving its pipeline and entries alone
    Counters {
        device: String,
        counter: String,
        /// Counter cell; 0 reads every cell
        #[arg(default_value = "0")]
        index: u64,
    },
    /// Check rule files against their pipelines without contacting devices
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level, args.log_format) {
        eprintln!("p4lbctl: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{:#}", e), "p4lbctl failed");
            eprintln!("p4lbctl: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command finished without failures.
async fn run(args: Args) -> anyhow::Result<bool> {
    let mut config = FleetConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.apply_overrides(args.rpc_timeout_ms, args.max_concurrency)?;
    let profiles = config.load_profiles()?;

    match args.command {
        Command::Run => run_fleet(&config, &profiles, args.simulate).await,
        Command::Counters {
            device,
            counter,
            index,
        } => read_counters(&config, &profiles, args.simulate, &device, &counter, index).await,
        Command::Validate => Ok(validate(&config, &profiles)),
    }
}

/// Which switches a fleet talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    /// Fresh simulated switches with nothing installed.
    Simulated,
    /// Simulated switches already running their configured pipeline.
    SimulatedRunning,
}

fn select_transport(simulate: bool, running: bool) -> anyhow::Result<Transport> {
    match (simulate, running) {
        (false, _) => Err(anyhow!(
            "no P4Runtime gRPC transport is built into p4lbctl; \
             pass --simulate to drive in-process simulated switches"
        )),
        (true, false) => Ok(Transport::Simulated),
        (true, true) => Ok(Transport::SimulatedRunning),
    }
}

fn build_fleet(
    config: &FleetConfig,
    profiles: &HashMap<String, Arc<PipelineProfile>>,
    devices: &[&str],
    transport: Transport,
) -> anyhow::Result<FleetOrch> {
    let dump_dir = config.dump_dir();
    let mut orch = FleetOrch::new(config.fleet_orch_config());
    for device in config.devices.iter().filter(|d| devices.contains(&d.name.as_str())) {
        info!(device = %device.name, address = %device.address, ?transport, "Simulating device");
        let mut switch = SimulatedSwitch::new(device.device_id);
        if transport == Transport::SimulatedRunning {
            if let Some(profile) = profiles.get(&device.pipeline) {
                switch = switch.with_pipeline(profile.schema.clone());
            }
        }
        let mut rpc: Arc<dyn DeviceRpc> = Arc::new(switch);
        if let Some(dir) = &dump_dir {
            let dumping = DumpingRpc::new(dir, &device.name, rpc)
                .with_context(|| format!("opening request dump in {}", dir.display()))?;
            rpc = Arc::new(dumping);
        }
        orch.add_device(device.identity(), rpc)?;
    }
    Ok(orch)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling");
            token.cancel();
        }
    });
    cancel
}

async fn run_fleet(
    config: &FleetConfig,
    profiles: &HashMap<String, Arc<PipelineProfile>>,
    simulate: bool,
) -> anyhow::Result<bool> {
    let transport = select_transport(simulate, false)?;
    let names: Vec<&str> = config.devices.iter().map(|d| d.name.as_str()).collect();
    let mut orch = build_fleet(config, profiles, &names, transport)?;
    let cancel = cancel_on_ctrl_c();

    let report = orch.run(profiles, config.load_rule_sets(), &cancel).await;
    print_report(&report);
    info!(stats = ?orch.stats(), "Fleet run finished");
    Ok(!report.has_failures())
}

fn print_report(report: &FleetReport) {
    for device in &report.bootstrap.devices {
        match &device.result {
            Ok(()) => println!("{}: ready", device.device),
            Err(e) => println!("{}: FAILED: {}", device.device, e),
        }
    }
    for apply in &report.applies {
        print_apply(apply);
    }
    if report.cancelled {
        println!("run cancelled");
    }
}

fn print_apply(apply: &ApplyReport) {
    match &apply.result {
        Ok(outcomes) => {
            println!(
                "{} <- {}: {} rules, {} failed",
                apply.device,
                apply.source,
                outcomes.len(),
                apply.failure_count()
            );
            for outcome in outcomes {
                println!("  {}", outcome);
            }
        }
        Err(e) => println!("{} <- {}: FAILED: {}", apply.device, apply.source, e),
    }
}

async fn read_counters(
    config: &FleetConfig,
    profiles: &HashMap<String, Arc<PipelineProfile>>,
    simulate: bool,
    device: &str,
    counter: &str,
    index: u64,
) -> anyhow::Result<bool> {
    if config.device(device).is_none() {
        return Err(anyhow!("device '{}' is not in the configuration", device));
    }
    let transport = select_transport(simulate, true)?;
    let mut orch = build_fleet(config, profiles, &[device], transport)?;
    let cancel = cancel_on_ctrl_c();

    let attach = orch.attach(profiles, &cancel).await;
    let result = match attach.get(device).map(|d| &d.result) {
        Some(Ok(())) => orch.read_counters(device, counter, index).await,
        Some(Err(e)) => Err(e.clone()),
        None => Err(p4lb_controller::ControlError::UnknownDevice(device.to_string())),
    };
    orch.shutdown().await;

    match result {
        Ok(samples) => {
            for sample in samples {
                println!("{}: {}", device, sample);
            }
            Ok(true)
        }
        Err(e) => {
            println!("{}: FAILED: {}", device, e);
            Ok(false)
        }
    }
}

/// Decodes and builds every rule against its device's pipeline.
fn validate(config: &FleetConfig, profiles: &HashMap<String, Arc<PipelineProfile>>) -> bool {
    let mut clean = true;
    for set in config.load_rule_sets() {
        let profile = config
            .device(&set.device)
            .and_then(|d| profiles.get(&d.pipeline));
        let (batch, profile) = match (&set.batch, profile) {
            (Ok(batch), Some(profile)) => (batch, profile),
            (Err(e), _) => {
                println!("{} <- {}: FAILED: {}", set.device, set.source, e);
                clean = false;
                continue;
            }
            (Ok(_), None) => {
                println!("{} <- {}: FAILED: no pipeline", set.device, set.source);
                clean = false;
                continue;
            }
        };

        let builder = EntryBuilder::new(&profile.schema);
        let mut failed = 0;
        for (index, raw) in batch.entries.iter().enumerate() {
            let result = decode_record(index, raw).and_then(|rule| builder.build(&rule));
            if let Err(e) = result {
                println!("  rule #{}: {}", index, e);
                failed += 1;
            }
        }
        println!(
            "{} <- {}: {} rules, {} invalid",
            set.device,
            set.source,
            batch.entries.len(),
            failed
        );
        clean &= failed == 0;
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_config() -> FleetConfig {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/fleet.toml");
        let mut config = FleetConfig::load(path).unwrap();
        config.runtime.dump_dir = None;
        config
    }

    #[test]
    fn test_device_commands_need_simulate() {
        let err = select_transport(false, false).unwrap_err();
        assert!(err.to_string().contains("--simulate"), "{}", err);
        assert_eq!(select_transport(true, true).unwrap(), Transport::SimulatedRunning);
    }

    #[test]
    fn test_simulate_flag_parses() {
        let args =
            Args::try_parse_from(["p4lbctl", "--simulate", "counters", "s1", "egress_counter", "3"])
                .unwrap();
        assert!(args.simulate);
        assert!(matches!(args.command, Command::Counters { index: 3, .. }));

        let args = Args::try_parse_from(["p4lbctl", "validate"]).unwrap();
        assert!(!args.simulate);
    }

    #[tokio::test]
    async fn test_counters_attach_to_running_pipeline() {
        let config = demo_config();
        let profiles = config.load_profiles().unwrap();

        assert!(read_counters(&config, &profiles, false, "s1", "egress_counter", 0)
            .await
            .is_err());
        assert!(read_counters(&config, &profiles, true, "s1", "egress_counter", 3)
            .await
            .unwrap());

        let mut orch = build_fleet(&config, &profiles, &["s1"], Transport::SimulatedRunning).unwrap();
        let report = orch.attach(&profiles, &CancellationToken::new()).await;
        assert!(report.all_ready());
        let samples = orch.read_counters("s1", "egress_counter", 0).await.unwrap();
        assert_eq!(samples.len(), 16);
        orch.shutdown().await;
    }
}
