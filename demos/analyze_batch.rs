//! Example: Diagnose multiple images in parallel
//!
//! Usage:
//!   cargo run --release --example analyze_batch -- [--config engine.toml] [--jobs N] [--json] <img1> <img2> ...
//!
//! Notes:
//! - One engine is shared by all workers; models are loaded once.
//! - Parallelism is across images. Heatmaps are skipped to keep the batch fast.
//! - Default workers: (available CPU threads - 1), keeping one core free for the system.

use ocular_triage::{DiagnosticEngine, EngineConfig, PredictOptions};
use rayon::prelude::*;
use std::env;
use std::time::Instant;

fn default_jobs() -> usize {
    let n = std::thread::available_parallelism().map(|v| v.get()).unwrap_or(1);
    std::cmp::max(1, n.saturating_sub(1))
}

fn percentile(mut xs: Vec<f32>, p: f32) -> Option<f32> {
    if xs.is_empty() {
        return None;
    }
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((xs.len() - 1) as f32 * p.clamp(0.0, 1.0)).round() as usize;
    Some(xs[idx.min(xs.len() - 1)])
}

struct ItemOut {
    path: String,
    result: Result<ocular_triage::PredictionResult, String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let mut json = false;
    let mut jobs: Option<usize> = None;
    let mut config_path: Option<String> = None;
    let mut paths: Vec<String> = Vec::new();

    while let Some(a) = args.first().cloned() {
        args.remove(0);
        match a.as_str() {
            "--json" => json = true,
            "--jobs" => {
                let v = args
                    .first()
                    .ok_or("--jobs requires a value")?
                    .parse::<usize>()?;
                args.remove(0);
                jobs = Some(std::cmp::max(1, v));
            }
            "--config" => {
                config_path = Some(args.first().ok_or("--config requires a path")?.clone());
                args.remove(0);
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: analyze_batch [--config FILE] [--jobs N] [--json] <img1> <img2> ...\n\
                     \n\
                     --config FILE  Engine configuration (TOML)\n\
                     --jobs N       Parallel workers (default: CPU-1)\n\
                     --json         Emit one JSON object per line (JSONL)\n"
                );
                return Ok(());
            }
            _ => paths.push(a),
        }
    }

    if paths.is_empty() {
        eprintln!("ERROR: Provide at least one image path. Use --help for usage.");
        std::process::exit(2);
    }

    let config = match &config_path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let engine = DiagnosticEngine::try_new(config)?;

    let jobs = jobs.unwrap_or_else(default_jobs);
    eprintln!("Batch: {} images, jobs={}", paths.len(), jobs);

    let t0 = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;
    let options = PredictOptions {
        attribution: false,
        keep_per_model: false,
        ..Default::default()
    };

    let outs: Vec<ItemOut> = pool.install(|| {
        paths
            .par_iter()
            .map(|path| ItemOut {
                path: path.clone(),
                result: engine
                    .predict_file(path, &options)
                    .map(|d| d.prediction)
                    .map_err(|e| e.to_string()),
            })
            .collect()
    });

    for (idx, o) in outs.iter().enumerate() {
        match (&o.result, json) {
            (Ok(p), true) => println!(
                "{{\"file\":{},\"prediction\":{}}}",
                serde_json::to_string(&o.path)?,
                serde_json::to_string(p)?
            ),
            (Err(e), true) => println!(
                "{{\"file\":{},\"error\":{}}}",
                serde_json::to_string(&o.path)?,
                serde_json::to_string(e)?
            ),
            (Ok(p), false) => println!(
                "[{}/{}] {}: {} (conf={:.3}) uncertainty={} flags={:?} time={:.2}ms",
                idx + 1,
                outs.len(),
                o.path,
                p.predicted_class,
                p.confidence,
                p.uncertainty
                    .map(|u| format!("{:.5}", u))
                    .unwrap_or_else(|| "n/a".to_string()),
                p.flags,
                p.metadata.processing_time_ms
            ),
            (Err(e), false) => println!("[{}/{}] {}: ERROR: {}", idx + 1, outs.len(), o.path, e),
        }
    }

    let ok_times: Vec<f32> = outs
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .map(|p| p.metadata.processing_time_ms)
        .collect();
    let wall_ms = t0.elapsed().as_secs_f64() * 1000.0;

    eprintln!(
        "Done: ok={}/{} wall={:.0}ms",
        ok_times.len(),
        outs.len(),
        wall_ms
    );
    if !ok_times.is_empty() {
        let mean = ok_times.iter().sum::<f32>() / ok_times.len() as f32;
        let p50 = percentile(ok_times.clone(), 0.50).unwrap_or(mean);
        let p90 = percentile(ok_times.clone(), 0.90).unwrap_or(mean);
        eprintln!(
            "processing_time_ms: mean={:.2} p50={:.2} p90={:.2}",
            mean, p50, p90
        );
    }

    Ok(())
}
