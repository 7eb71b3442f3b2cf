use clap::{CommandFactory, Parser};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use iodid::config::{Cli, Config, RunMode};
use iodid::engine::run_load;
use iodid::gauge::ConcurrencyGauge;
use iodid::logging::init_tracing;
use iodid::metrics::{
    gather_metrics_string, register_metrics, start_metrics_server, PrometheusGaugeSink,
};
use iodid::results::SlotReport;
use iodid::scheduler::replay_trace;
use iodid::slot::SlotRunner;
use iodid::statsd::StatsdClient;
use iodid::trace::InMemoryTrace;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let config = match Config::from_cli(cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            let _ = Cli::command().print_help();
            std::process::exit(1);
        }
    };

    init_tracing(config.verbose, config.quiet, config.log_format);
    register_metrics()?;

    if let Some(port) = config.metrics_port {
        let registry = prometheus::default_registry().clone();
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    let statsd = config.statsd_client()?;

    match config.mode {
        RunMode::Trace {
            ref path,
            time_unit,
        } => run_trace(&config, path, time_unit, statsd).await?,
        RunMode::Requests(_) | RunMode::Duration(_) => run_once(&config, statsd).await?,
    }

    if config.verbose > 0 {
        let final_metrics = gather_metrics_string(prometheus::default_registry());
        println!("\n--- FINAL METRICS ---\n{}", final_metrics);
        println!("--- END OF FINAL METRICS ---");
    }

    Ok(())
}

/// Fixed-count or duration run.
async fn run_once(config: &Config, statsd: Option<Arc<StatsdClient>>) -> Result<(), BoxError> {
    if !config.quiet && !config.json_output {
        config.print_summary();
    }

    let params = config.engine_params(statsd);
    let results = run_load(&params).await?;

    if config.json_output {
        println!("{}", results.to_json()?);
        return Ok(());
    }

    if results.error_count() > 0 {
        println!("-------- Errors --------");
        print!("{}", results.render_errors());
        println!();
    }
    print!("{}", results.render_stats());

    Ok(())
}

/// Trace replay: one engine run per slot, started every `time_unit`.
async fn run_trace(
    config: &Config,
    path: &Path,
    time_unit: Duration,
    statsd: Option<Arc<StatsdClient>>,
) -> Result<(), BoxError> {
    let trace = match InMemoryTrace::from_file(path) {
        Ok(trace) => trace,
        Err(e) => {
            error!(error = %e, "Cannot load trace");
            return Err(e.into());
        }
    };

    if !config.quiet && !config.json_output {
        println!(
            "-------- Injecting workload for {} timeslots --------",
            trace.len()
        );
    }
    if trace.skipped() > 0 {
        info!(skipped = trace.skipped(), "Trace lines ignored");
    }

    let mut gauge = ConcurrencyGauge::new("active_slots").with_sink(Arc::new(PrometheusGaugeSink));
    if let Some(ref client) = statsd {
        gauge = gauge.with_sink(client.clone());
    }

    let runner = Arc::new(SlotRunner::new(
        config.engine_params(statsd),
        Arc::new(gauge),
    ));
    let outcomes = replay_trace(&trace, time_unit, runner).await;

    if config.json_output {
        let reports: Vec<SlotReport> = outcomes
            .iter()
            .enumerate()
            .map(|(slot, outcome)| SlotReport::new(slot, outcome))
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!("--------TraceTest results--------");
    for (slot, outcome) in outcomes.iter().enumerate() {
        match outcome {
            Ok(results) => println!("{}", results.render_slot(slot)),
            Err(e) => println!("t={}, failed: {}", slot, e),
        }
    }

    Ok(())
}
