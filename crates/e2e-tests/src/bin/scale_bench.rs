//! Stage-1 scaling benchmark.
//!
//! Builds indexes of growing size from projected random vectors and times
//! projection plus the candidate range query at a fixed pool size.
//!
//! ```text
//! cargo run --release -p e2e-tests --bin scale_bench -- --max 1000000
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use e2e_tests::gaussian_vector;
use landmark_projection::Projector;
use landmark_spatial::{RTreeIndex, SpatialIndex};
use landmark_types::{AtomId, IndexParams, ProjectionSettings};

#[derive(Parser, Debug)]
#[command(name = "scale_bench", about = "Landmark stage-1 scaling benchmark")]
struct Args {
    /// Largest collection size; sizes grow by 10x from 1,000
    #[arg(long, default_value_t = 1_000_000)]
    max: usize,
    /// Raw vector dimensionality
    #[arg(long, default_value_t = 128)]
    dimension: usize,
    /// Candidate pool size K
    #[arg(long, default_value_t = 100)]
    pool: usize,
    #[arg(long, default_value_t = 500)]
    queries: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Write results as JSON
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct SizeResult {
    atoms: usize,
    build_ms: u64,
    height: usize,
    stage1_p50_us: f64,
    stage1_p95_us: f64,
    mean_nodes_visited: f64,
    mean_candidates: f64,
}

#[derive(Debug, Serialize)]
struct Report {
    dimension: usize,
    pool: usize,
    queries: usize,
    seed: u64,
    results: Vec<SizeResult>,
}

fn percentile_us(sorted: &[Duration], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1].as_secs_f64() * 1e6
}

fn run_size(args: &Args, projector: &Projector, atoms: usize, rng: &mut StdRng) -> SizeResult {
    let params = IndexParams::default();
    let build_start = Instant::now();
    let entries: Vec<_> = (0..atoms)
        .map(|i| {
            let v = gaussian_vector(rng, args.dimension);
            let coord = projector.project(&v).expect("projection failed");
            (AtomId::compute(&v, &format!("bench/{}", i)), coord)
        })
        .collect();
    let index = RTreeIndex::new(params).expect("invalid index params");
    index.rebuild(entries, params).expect("rebuild failed");
    let build_ms = build_start.elapsed().as_millis() as u64;

    let mut latencies = Vec::with_capacity(args.queries);
    let mut nodes = 0usize;
    let mut candidates = 0usize;
    for _ in 0..args.queries {
        let query = gaussian_vector(rng, args.dimension);
        let start = Instant::now();
        let coord = projector.project(&query).expect("projection failed");
        let found = index.range_query(&coord, 4.0, args.pool);
        latencies.push(start.elapsed());
        nodes += found.nodes_visited;
        candidates += found.len();
    }
    latencies.sort();

    SizeResult {
        atoms,
        build_ms,
        height: index.stats().height,
        stage1_p50_us: percentile_us(&latencies, 50.0),
        stage1_p95_us: percentile_us(&latencies, 95.0),
        mean_nodes_visited: nodes as f64 / args.queries.max(1) as f64,
        mean_candidates: candidates as f64 / args.queries.max(1) as f64,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let projection = ProjectionSettings {
        dimension: args.dimension,
        ..ProjectionSettings::default()
    };
    let projector = Projector::from_settings(&projection)?;
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut sizes = Vec::new();
    let mut n = 1_000;
    while n <= args.max {
        sizes.push(n);
        n *= 10;
    }

    println!(
        "{:>10} {:>10} {:>7} {:>12} {:>12} {:>12}",
        "atoms", "build_ms", "height", "p50_us", "p95_us", "nodes"
    );
    let mut results = Vec::with_capacity(sizes.len());
    for atoms in sizes {
        let r = run_size(&args, &projector, atoms, &mut rng);
        println!(
            "{:>10} {:>10} {:>7} {:>12.1} {:>12.1} {:>12.1}",
            r.atoms, r.build_ms, r.height, r.stage1_p50_us, r.stage1_p95_us, r.mean_nodes_visited
        );
        results.push(r);
    }

    if let (Some(first), Some(last)) = (results.first(), results.last()) {
        let size_growth = last.atoms as f64 / first.atoms as f64;
        let latency_growth = last.stage1_p50_us / first.stage1_p50_us.max(f64::EPSILON);
        println!(
            "\n{:.0}x atoms -> {:.2}x stage-1 p50 ({:.2}x nodes visited)",
            size_growth,
            latency_growth,
            last.mean_nodes_visited / first.mean_nodes_visited.max(f64::EPSILON)
        );
    }

    if let Some(path) = &args.out {
        let report = Report {
            dimension: args.dimension,
            pool: args.pool,
            queries: args.queries,
            seed: args.seed,
            results,
        };
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}
