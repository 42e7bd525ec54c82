//! Runs the sequence-data layer from a network file and reports what each batch holds.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p seqgather-demos --bin sequence_prefetch -- --config net.toml --steps 4
//! ```

use anyhow::{Context, Result, bail};
use clap::Parser;
use seqgather::distributed::{CpuBackend, ParallelMode};
use seqgather::layers::{LayerKind, build_layer};
use seqgather::{Blob, NetConfig};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "sequence_prefetch")]
#[command(about = "Prefetch segment batches described by a TOML network file")]
struct Args {
    /// Network description with a `sequence_data` layer
    #[arg(short, long)]
    config: PathBuf,

    /// Name of the layer to run; defaults to the first sequence_data layer
    #[arg(short, long)]
    layer: Option<String>,

    /// Number of forward passes
    #[arg(short, long, default_value_t = 3)]
    steps: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let net = NetConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let config = match &args.layer {
        Some(name) => net
            .layer(name)
            .with_context(|| format!("no layer named `{name}`"))?,
        None => net
            .layers
            .iter()
            .find(|layer| layer.kind() == LayerKind::SequenceData)
            .context("no sequence_data layer in the network")?,
    };
    if config.kind() != LayerKind::SequenceData {
        bail!("layer `{}` is a {} layer", config.name(), config.kind());
    }

    let mut layer = build_layer::<f32, CpuBackend>(config, &ParallelMode::Serial)?;
    let mut top = vec![Blob::default(), Blob::default()];
    layer.setup(&[], &mut top)?;

    for step in 0..args.steps {
        let start = Instant::now();
        layer.forward(&[], &mut top)?;
        let elapsed = start.elapsed();

        let data = top[0].data();
        let mean = data.iter().map(|&v| f64::from(v)).sum::<f64>() / data.len().max(1) as f64;
        let labels: Vec<i64> = top[1].data().iter().map(|&l| l as i64).collect();
        tracing::info!(
            "step {step}: labels {labels:?}, data mean {mean:.3}, waited {:.2} ms",
            elapsed.as_secs_f64() * 1e3
        );
    }
    Ok(())
}
