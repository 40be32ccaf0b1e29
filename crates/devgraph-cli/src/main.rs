//! Runs a demo workload through the capturing converter, the eager converter, or both, and
//! prints a JSON report with timings and converter counters.

mod workloads;

use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use devgraph::capture_settings::set_blas_capture_allowed;
use devgraph::{
    CapturingConverter, ConverterOptions, ConverterStats, DeviceArray, FallbackPolicy,
    GraphConverter, MockConverter, SignaturePolicy,
};
use devgraph_backend_ref_cpu::{cpu_device, CpuBackend};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use workloads::Workload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum ConverterMode {
    /// Record once, replay afterwards.
    Capture,
    /// Eager execution with host-side control flow.
    Mock,
    /// Run both and compare outputs bit for bit.
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SignatureArg {
    /// Reject calls whose argument signature differs from the captured one.
    Strict,
    /// Capture one graph per signature, bounded by the cache capacity.
    Recapture,
}

impl From<SignatureArg> for SignaturePolicy {
    fn from(arg: SignatureArg) -> Self {
        match arg {
            SignatureArg::Strict => SignaturePolicy::Strict,
            SignatureArg::Recapture => SignaturePolicy::Recapture,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FallbackArg {
    /// Run eagerly when the device cannot record conditional nodes.
    Eager,
    /// Fail when the device cannot record conditional nodes.
    Error,
}

impl From<FallbackArg> for FallbackPolicy {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::Eager => FallbackPolicy::Eager,
            FallbackArg::Error => FallbackPolicy::Error,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "devgraph-cli")]
#[command(about = "Run capture/replay workloads on the reference CPU device")]
struct Cli {
    #[arg(value_enum)]
    workload: Workload,

    #[arg(long, value_enum, default_value_t = ConverterMode::Both)]
    converter: ConverterMode,

    /// Problem size (loop bound, points per cluster or samples).
    #[arg(long, default_value_t = 16)]
    size: usize,

    /// Number of calls, each with fresh inputs.
    #[arg(long, default_value_t = 8)]
    iterations: usize,

    #[arg(long, env = "DEVGRAPH_SEED", default_value_t = 7)]
    seed: u64,

    /// Defaults to `DEVGRAPH_SIGNATURE_POLICY`.
    #[arg(long, value_enum)]
    signature_policy: Option<SignatureArg>,

    /// Defaults to `DEVGRAPH_FALLBACK`.
    #[arg(long, value_enum)]
    fallback: Option<FallbackArg>,

    /// Emulate a device without conditional graph nodes.
    #[arg(long)]
    legacy_device: bool,

    /// Allow BLAS-backed kernels inside captures.
    #[arg(long)]
    allow_blas_capture: bool,

    /// Pretty-print the report.
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    workload: Workload,
    converter: ConverterMode,
    backend: String,
    size: usize,
    iterations: usize,
    seed: u64,
    options: ConverterOptions,
    capture_ms: Option<f64>,
    eager_ms: Option<f64>,
    mismatches: usize,
    /// Outputs of the last call.
    outputs: Vec<Vec<f64>>,
    capture_stats: Option<ConverterStats>,
    graph_nodes: Option<usize>,
}

fn converter_options(cli: &Cli) -> ConverterOptions {
    let mut options = ConverterOptions::from_env();
    if let Some(policy) = cli.signature_policy {
        options = options.with_signature_policy(policy.into());
    }
    if let Some(policy) = cli.fallback {
        options = options.with_fallback(policy.into());
    }
    options
}

fn hosts(arrays: &[DeviceArray]) -> Result<Vec<Vec<f64>>> {
    arrays.iter().map(DeviceArray::to_f64_vec).collect()
}

fn same_bits(lhs: &[Vec<f64>], rhs: &[Vec<f64>]) -> bool {
    lhs.len() == rhs.len()
        && lhs.iter().zip(rhs).all(|(a, b)| {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
        })
}

fn run(cli: &Cli) -> Result<Report> {
    if cli.iterations == 0 {
        bail!("--iterations must be at least 1");
    }
    if cli.allow_blas_capture {
        set_blas_capture_allowed(true);
    }
    let device = if cli.legacy_device {
        devgraph::Device::new(CpuBackend::new().without_conditional_nodes())?
    } else {
        cpu_device()?
    };
    let options = converter_options(cli);
    info!(
        workload = ?cli.workload,
        backend = device.backend_name(),
        size = cli.size,
        iterations = cli.iterations,
        "starting run"
    );

    let capturing = CapturingConverter::with_options(&device, options.clone())?;
    let eager = MockConverter::new(&device);
    let graphed = capturing.graphify(|args| cli.workload.run(&capturing, args));
    let mut rng = StdRng::seed_from_u64(cli.seed);

    let use_capture = cli.converter != ConverterMode::Mock;
    let use_eager = cli.converter != ConverterMode::Capture;
    let (mut capture_time, mut eager_time) = (0.0, 0.0);
    let mut mismatches = 0;
    let mut outputs = Vec::new();

    for iteration in 0..cli.iterations {
        let args = cli.workload.inputs(&device, cli.size, &mut rng)?;
        let captured = if use_capture {
            // Multicond writes through its operands, so each converter gets its own copies.
            let own = args
                .iter()
                .map(DeviceArray::copy)
                .collect::<Result<Vec<_>>>()?;
            let started = Instant::now();
            let result = hosts(&graphed.call(&own)?)
                .with_context(|| format!("capture call {iteration}"))?;
            capture_time += started.elapsed().as_secs_f64() * 1e3;
            Some(result)
        } else {
            None
        };
        let reference = if use_eager {
            let started = Instant::now();
            let result = hosts(&cli.workload.run(&eager, &args)?)
                .with_context(|| format!("eager call {iteration}"))?;
            eager_time += started.elapsed().as_secs_f64() * 1e3;
            Some(result)
        } else {
            None
        };
        if let (Some(captured), Some(reference)) = (&captured, &reference) {
            if !same_bits(captured, reference) {
                mismatches += 1;
                warn!(iteration, ?captured, ?reference, "converters disagree");
            }
        }
        debug!(iteration, "call finished");
        if let Some(last) = captured.or(reference) {
            outputs = last;
        }
    }

    let graph_nodes = graphed
        .captured_graphs()
        .first()
        .map(|graph| graph.node_count());
    Ok(Report {
        workload: cli.workload,
        converter: cli.converter,
        backend: device.backend_name().to_string(),
        size: cli.size,
        iterations: cli.iterations,
        seed: cli.seed,
        options,
        capture_ms: use_capture.then_some(capture_time),
        eager_ms: use_eager.then_some(eager_time),
        mismatches,
        outputs,
        capture_stats: use_capture.then(|| capturing.stats()),
        graph_nodes,
    })
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("devgraph=info,devgraph_cli=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let report = run(&cli)?;
    let json = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{json}");
    if report.mismatches > 0 {
        bail!(
            "{} of {} calls disagreed between converters",
            report.mismatches,
            report.iterations
        );
    }
    Ok(())
}
