//! Example: Diagnose a single image
//!
//! Usage:
//!   cargo run --release --example analyze_image -- [--config engine.toml] [--heatmaps DIR] [--json] <image>
//!
//! Without `--config` the default roster is used (weights under `model/`).

use ocular_triage::{ArtifactStore, DiagnosticEngine, EngineConfig, PredictOptions};
use std::env;
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let mut json = false;
    let mut config_path: Option<String> = None;
    let mut heatmap_root: Option<String> = None;
    let mut image_path: Option<String> = None;

    while let Some(a) = args.first().cloned() {
        args.remove(0);
        match a.as_str() {
            "--json" => json = true,
            "--config" => {
                config_path = Some(args.first().ok_or("--config requires a path")?.clone());
                args.remove(0);
            }
            "--heatmaps" => {
                heatmap_root = Some(args.first().ok_or("--heatmaps requires a directory")?.clone());
                args.remove(0);
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: analyze_image [--config FILE] [--heatmaps DIR] [--json] <image>\n\
                     \n\
                     --config FILE   Engine configuration (TOML)\n\
                     --heatmaps DIR  Write the Grad-CAM comparison under DIR/heatmaps/\n\
                     --json          Emit the prediction as JSON\n"
                );
                return Ok(());
            }
            _ => image_path = Some(a),
        }
    }

    let Some(image_path) = image_path else {
        eprintln!("ERROR: Provide an image path. Use --help for usage.");
        std::process::exit(2);
    };

    let config = match &config_path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let engine = DiagnosticEngine::try_new(config)?;
    let health = engine.health();
    eprintln!(
        "Engine ready on {}: auxiliary models {}/{}",
        health.device, health.auxiliary_loaded, health.auxiliary_configured
    );

    let options = PredictOptions {
        attribution: heatmap_root.is_some(),
        ..Default::default()
    };
    let diagnosis = engine.predict_file(&image_path, &options)?;
    let prediction = &diagnosis.prediction;

    let mut heatmap_file = None;
    if let (Some(root), Some(artifact)) = (&heatmap_root, &diagnosis.attribution) {
        let stem = Path::new(&image_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let relative = ArtifactStore::new(root).persist(artifact, stem)?;
        heatmap_file = Some(relative);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(prediction)?);
        return Ok(());
    }

    println!("Diagnosis:");
    println!(
        "  Class: {} (confidence: {:.2}, {})",
        prediction.predicted_class,
        prediction.confidence,
        prediction.confidence_level.as_str()
    );
    match prediction.uncertainty {
        Some(u) => println!("  Uncertainty: {:.5} ({:?})", u, prediction.uncertainty_method),
        None => println!("  Uncertainty: unavailable"),
    }
    println!("  Explanation: {}", prediction.explanation());
    println!("  Recommendation: {}", prediction.recommendation());
    if !prediction.flags.is_empty() {
        println!("  Review flags: {:?}", prediction.flags);
    }
    if let Some(path) = heatmap_file {
        println!("  Heatmap: {}", path.display());
    }
    println!("  Processing time: {:.2} ms", prediction.metadata.processing_time_ms);

    Ok(())
}
