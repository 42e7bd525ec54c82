//! Runs the gather layer on an in-process ring of worker threads.
//!
//! Each rank contributes `rows x cols` values, gathers the global batch, then scatters a
//! synthetic gradient back and checks the rescaled slice it receives.
//!
//! ```bash
//! cargo run -p seqgather-demos --bin gather_ring -- --world-size 4 --rows 2 --cols 3
//! ```

use anyhow::{Context, Result, anyhow, ensure};
use clap::Parser;
use seqgather::distributed::{CollectiveBackend, CpuBackend, ParallelMode};
use seqgather::layers::{GatherLayer, Layer};
use seqgather::tensor::Blob;
use std::sync::Arc;
use std::thread;
use tracing::info;

#[derive(Parser, Debug, Clone, Copy)]
#[command(name = "gather_ring")]
#[command(about = "All-gather and scatter a batch across in-process workers")]
struct Args {
    /// Number of workers in the ring
    #[arg(short, long, default_value_t = 4)]
    world_size: usize,

    /// Leading dimension of each worker's blob
    #[arg(short, long, default_value_t = 2)]
    rows: usize,

    /// Trailing dimension of each worker's blob
    #[arg(short, long, default_value_t = 3)]
    cols: usize,
}

fn run_rank(backend: CpuBackend, args: Args) -> Result<()> {
    let backend = Arc::new(backend);
    let rank = backend.rank();
    let n = args.rows * args.cols;
    let mut layer = GatherLayer::new(ParallelMode::Distributed(Arc::clone(&backend)));

    let local: Vec<f32> = (0..n).map(|i| (rank * n + i) as f32).collect();
    let mut bottom = vec![Blob::from_vec(local, &[args.rows, args.cols])?];
    let mut top = vec![Blob::default()];
    layer.setup(&bottom, &mut top)?;
    layer.forward(&bottom, &mut top)?;

    let gathered = top[0].data().clone();
    ensure!(
        gathered.iter().enumerate().all(|(i, &v)| v == i as f32),
        "rank {rank}: gathered values out of order"
    );
    info!("rank {rank}: gathered shape {:?}", top[0].shape());

    let grad: Vec<f32> = (0..gathered.len()).map(|i| i as f32 * 0.5).collect();
    top[0].set_diff(&grad)?;
    layer.backward(&top, &[true], &mut bottom)?;

    let world = args.world_size as f32;
    let expected: Vec<f32> = grad[rank * n..(rank + 1) * n].iter().map(|g| g * world).collect();
    ensure!(
        *bottom[0].diff() == expected,
        "rank {rank}: rescaled gradient mismatch"
    );
    info!("rank {rank}: received gradient slice scaled by {world}");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    ensure!(args.world_size > 0, "world size must be positive");

    let handles = CpuBackend::ring(args.world_size)
        .into_iter()
        .map(|backend| {
            thread::Builder::new()
                .name(format!("rank-{}", backend.rank()))
                .spawn(move || run_rank(backend, args))
                .context("spawning worker")
        })
        .collect::<Result<Vec<_>>>()?;

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("worker panicked"))??;
    }
    info!("all {} ranks agree", args.world_size);
    Ok(())
}
