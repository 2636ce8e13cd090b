//! KappaBridge coupling simulator CLI
//!
//! Runs coupled continuous/stochastic scenarios against the built-in engine.

use clap::Parser;
use kappabridge_sim::scenarios::ScenarioId;
use kappabridge_sim::{ScenarioResult, ScenarioRunner};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// KappaBridge coupling simulation CLI
#[derive(Parser, Debug)]
#[command(name = "kappabridge-sim")]
#[command(about = "Run coupled reaction-diffusion / stochastic scenarios", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (ab_binding, bad_definition, unregister_midway, rpc_roundtrip, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Segments on the coupled dendrite
    #[arg(short, long, default_value = "3")]
    nseg: u32,

    /// Run length in ms
    #[arg(short, long, default_value = "100")]
    duration: f64,

    /// Continuous-engine step in ms
    #[arg(long, default_value = "1")]
    dt: f64,

    /// Definition file to load instead of the built-in A + B -> AB model
    #[arg(long)]
    definition: Option<PathBuf>,

    /// Write raw molecule counts into the field instead of mM
    #[arg(long)]
    no_convert: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

fn summary_json(results: &[ScenarioResult], failed: usize) -> serde_json::Value {
    serde_json::json!({
        "total": results.len(),
        "passed": results.len() - failed,
        "failed": failed,
        "results": results.iter().map(|r| {
            serde_json::json!({
                "scenario": r.scenario.name(),
                "seed": r.seed,
                "passed": r.passed,
                "steps": r.total_steps,
                "time_ms": r.final_time_ms,
                "compartments": r.metrics.compartments,
                "field_writes": r.metrics.field_writes,
                "final_total": r.metrics.final_total,
                "failure_reason": r.failure_reason,
            })
        }).collect::<Vec<_>>(),
    })
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("KappaBridge simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!(
                "Available scenarios: ab_binding, bad_definition, unregister_midway, rpc_roundtrip, all"
            );
            std::process::exit(1);
        })]
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);

        let mut runner = ScenarioRunner::new(seed)
            .with_nseg(args.nseg)
            .with_dt(args.dt)
            .with_duration(args.duration)
            .with_conversion(!args.no_convert);
        if let Some(path) = &args.definition {
            runner = runner.with_definition(path);
        }

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED in {} step(s), {} write(s)",
                        scenario.name(),
                        seed,
                        result.total_steps,
                        result.metrics.field_writes
                    );
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();

    if args.json {
        let summary = summary_json(&all_results, failed_count);
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Failed to encode summary: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("All {} scenario run(s) passed", total);
        } else {
            error!("{}/{} scenario run(s) failed", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed_count > 0 {
        std::process::exit(1);
    }
}
