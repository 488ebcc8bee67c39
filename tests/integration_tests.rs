//! Integration tests for the diagnostic engine

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use image::{ImageFormat, Rgb, RgbImage};
use ocular_triage::analysis::result::UncertaintyMethod;
use ocular_triage::attribution::{self, caption::CAPTION_HEIGHT};
use ocular_triage::config::{AttributionConfig, McDropoutConfig};
use ocular_triage::ml::layers::DropoutMode;
use ocular_triage::ml::network::Network;
use ocular_triage::preprocessing::{preprocess, PreprocessedImage};
use ocular_triage::{
    Architecture, ArtifactStore, ClassLabel, ConfidenceLevel, DiagnosticEngine, EngineConfig,
    EngineError, LoadStatus, ModelRegistry, ModelRole, ModelSpec, PredictOptions, ReviewFlag,
};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const RESOLUTION: u32 = 64;
const HEAD_DROPOUT: f32 = 0.5;

/// Write ResNet-18 weights whose head strongly favors `favored`
fn write_weights(dir: &Path, name: &str, favored: ClassLabel) -> PathBuf {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    Network::new(Architecture::ResNet18, HEAD_DROPOUT, vb).unwrap();

    {
        let data = varmap.data().lock().unwrap();
        let mut bias = vec![0f32; ClassLabel::COUNT];
        bias[favored.index()] = 10.0;
        data["fc.1.bias"]
            .set(&Tensor::new(bias.as_slice(), &device).unwrap())
            .unwrap();
        let weight = &data["fc.1.weight"];
        weight.set(&weight.as_tensor().affine(1e-3, 0.0).unwrap()).unwrap();
    }

    let path = dir.join(name);
    varmap.save(&path).unwrap();
    path
}

fn spec(name: &str, role: ModelRole, weights: PathBuf, fusion_weight: f32) -> ModelSpec {
    ModelSpec {
        name: name.to_string(),
        architecture: Architecture::ResNet18,
        role,
        weights,
        fusion_weight,
        head_dropout: HEAD_DROPOUT,
    }
}

fn config(models: Vec<ModelSpec>) -> EngineConfig {
    EngineConfig {
        input_resolution: RESOLUTION,
        models,
        mc_dropout: McDropoutConfig {
            samples: 6,
            seed: Some(17),
        },
        ..Default::default()
    }
}

fn eye_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - width as f32 / 2.0;
        let dy = y as f32 - height as f32 / 2.0;
        let r = (dx * dx + dy * dy).sqrt() / width.max(height) as f32;
        let v = (255.0 * (1.0 - r).clamp(0.0, 1.0)) as u8;
        Rgb([v, v / 2, v / 3])
    })
}

fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

#[test]
fn test_primary_only_prediction_with_mc_dropout() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let primary = write_weights(dir.path(), "primary.safetensors", ClassLabel::Normal);
    let engine =
        DiagnosticEngine::try_new(config(vec![spec("primary", ModelRole::Primary, primary, 1.0)]))
            .unwrap();

    let diagnosis = engine.predict(&png_bytes(&eye_image(512, 512))).unwrap();
    let prediction = &diagnosis.prediction;

    assert_eq!(prediction.predicted_class, ClassLabel::Normal);
    assert!(prediction.confidence > 0.5);
    assert_eq!(prediction.confidence_level, ConfidenceLevel::High);
    assert_eq!(prediction.confidence, prediction.distribution.argmax().1);
    assert!((prediction.distribution.total() - 1.0).abs() < 1e-4);
    assert!(prediction
        .distribution
        .as_slice()
        .iter()
        .all(|p| (0.0..=1.0).contains(p)));

    assert_eq!(prediction.uncertainty_method, Some(UncertaintyMethod::McDropout));
    assert!(prediction.uncertainty.unwrap() >= 0.0);
    assert_eq!(prediction.metadata.mc_samples, 6);
    assert!(prediction.smoothed_distribution.is_some());

    let artifact = diagnosis.attribution.expect("heatmap should be generated");
    assert_eq!(artifact.target, ClassLabel::Normal);
    assert_eq!(artifact.heatmap_layer.dimensions(), (512, 512));
    assert!(!artifact.rendered_comparison.is_empty());
}

#[test]
fn test_alexnet_primary_produces_heatmap() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let network = Network::new(Architecture::AlexNet, HEAD_DROPOUT, vb).unwrap();
    {
        let data = varmap.data().lock().unwrap();
        let mut bias = vec![0f32; ClassLabel::COUNT];
        bias[ClassLabel::Normal.index()] = 10.0;
        data["classifier.6.bias"]
            .set(&Tensor::new(bias.as_slice(), &device).unwrap())
            .unwrap();
        let weight = &data["classifier.6.weight"];
        weight.set(&weight.as_tensor().affine(1e-3, 0.0).unwrap()).unwrap();
    }
    let registry =
        ModelRegistry::from_networks(vec![("alexnet".to_string(), 1.0, network)], &device).unwrap();

    let config = EngineConfig {
        input_resolution: 227,
        models: vec![ModelSpec {
            name: "alexnet".to_string(),
            architecture: Architecture::AlexNet,
            role: ModelRole::Primary,
            weights: PathBuf::from("alexnet.safetensors"),
            fusion_weight: 1.0,
            head_dropout: HEAD_DROPOUT,
        }],
        mc_dropout: McDropoutConfig {
            samples: 3,
            seed: Some(17),
        },
        ..Default::default()
    };
    let engine = DiagnosticEngine::from_registry(config, registry).unwrap();

    let diagnosis = engine.predict(&png_bytes(&eye_image(512, 512))).unwrap();
    let prediction = &diagnosis.prediction;
    assert_eq!(prediction.predicted_class, ClassLabel::Normal);
    assert!(prediction.confidence > 0.5);
    assert_eq!(prediction.uncertainty_method, Some(UncertaintyMethod::McDropout));
    assert!(!prediction.has_flag(ReviewFlag::AttributionUnavailable));

    let artifact = diagnosis.attribution.expect("AlexNet heatmap should be generated");
    assert_eq!(artifact.heatmap_layer.dimensions(), (512, 512));
    assert_eq!(artifact.network_view.dimensions(), (227, 227));
}

#[test]
fn test_missing_auxiliary_renormalizes_weights() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_weights(dir.path(), "primary.safetensors", ClassLabel::Normal);
    let engine = DiagnosticEngine::try_new(config(vec![
        spec("primary", ModelRole::Primary, primary, 0.7),
        spec(
            "auxiliary",
            ModelRole::Auxiliary,
            dir.path().join("absent.safetensors"),
            0.3,
        ),
    ]))
    .unwrap();

    let health = engine.health();
    assert!(health.ready);
    assert_eq!(health.auxiliary_loaded, 0);
    assert_eq!(health.auxiliary_configured, 1);
    assert_eq!(health.roster[1].load_status, LoadStatus::Missing);

    let options = PredictOptions {
        attribution: false,
        ..Default::default()
    };
    let prediction = engine
        .predict_with(&png_bytes(&eye_image(300, 200)), &options)
        .unwrap()
        .prediction;

    let per_model = prediction.per_model_distributions.as_ref().unwrap();
    assert_eq!(per_model.len(), 1);
    for (fused, primary) in prediction
        .distribution
        .as_slice()
        .iter()
        .zip(per_model[0].distribution.as_slice())
    {
        assert!((fused - primary).abs() < 1e-5);
    }
    assert!(prediction.has_flag(ReviewFlag::DegradedEnsemble));
    assert_eq!(prediction.metadata.models_unavailable, 1);
}

#[test]
fn test_two_model_ensemble_uses_cross_model_variance() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_weights(dir.path(), "primary.safetensors", ClassLabel::Normal);
    let auxiliary = write_weights(dir.path(), "auxiliary.safetensors", ClassLabel::Cataract);
    let engine = DiagnosticEngine::try_new(config(vec![
        spec("primary", ModelRole::Primary, primary, 0.7),
        spec("auxiliary", ModelRole::Auxiliary, auxiliary, 0.3),
    ]))
    .unwrap();

    let options = PredictOptions {
        attribution: false,
        ..Default::default()
    };
    let prediction = engine
        .predict_with(&png_bytes(&eye_image(128, 128)), &options)
        .unwrap()
        .prediction;

    let per_model = prediction.per_model_distributions.as_ref().unwrap();
    assert_eq!(per_model.len(), 2);
    assert_eq!(per_model[0].model, "primary");
    for (i, fused) in prediction.distribution.as_slice().iter().enumerate() {
        let expected = 0.7 * per_model[0].distribution.as_slice()[i]
            + 0.3 * per_model[1].distribution.as_slice()[i];
        assert!((fused - expected).abs() < 1e-5);
    }

    assert_eq!(prediction.predicted_class, ClassLabel::Normal);
    assert_eq!(
        prediction.uncertainty_method,
        Some(UncertaintyMethod::CrossModelVariance)
    );
    // The members disagree strongly
    assert!(prediction.uncertainty.unwrap() > 0.05);
    assert!(prediction.has_flag(ReviewFlag::HighUncertainty));
    assert!(!prediction.has_flag(ReviewFlag::DegradedEnsemble));
    assert_eq!(prediction.metadata.mc_samples, 0);
}

#[test]
fn test_malformed_auxiliary_is_recorded_as_failed() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_weights(dir.path(), "primary.safetensors", ClassLabel::Normal);
    let broken = dir.path().join("broken.safetensors");
    std::fs::write(&broken, b"\x00\x01 truncated").unwrap();

    let engine = DiagnosticEngine::try_new(config(vec![
        spec("primary", ModelRole::Primary, primary, 0.7),
        spec("auxiliary", ModelRole::Auxiliary, broken, 0.3),
    ]))
    .unwrap();

    let health = engine.health();
    assert!(health.ready);
    assert!(matches!(health.roster[1].load_status, LoadStatus::Failed(_)));
}

#[test]
fn test_corrupted_bytes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_weights(dir.path(), "primary.safetensors", ClassLabel::Normal);
    let engine =
        DiagnosticEngine::try_new(config(vec![spec("primary", ModelRole::Primary, primary, 1.0)]))
            .unwrap();

    let mut bytes = png_bytes(&eye_image(64, 64));
    bytes.truncate(bytes.len() / 3);
    let err = engine.predict(&bytes).unwrap_err();
    assert!(matches!(err, EngineError::InvalidImage(_)));

    // Nothing reached the artifact store
    let store_root = dir.path().join("artifacts");
    let _store = ArtifactStore::new(&store_root);
    assert!(!store_root.exists());
}

#[test]
fn test_missing_primary_keeps_engine_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let engine = DiagnosticEngine::new(config(vec![spec(
        "primary",
        ModelRole::Primary,
        dir.path().join("absent.safetensors"),
        1.0,
    )]));

    assert!(!engine.is_ready());
    assert!(matches!(
        engine.predict(&png_bytes(&eye_image(64, 64))),
        Err(EngineError::FatalInitialization(_))
    ));

    let err = DiagnosticEngine::try_new(config(vec![spec(
        "primary",
        ModelRole::Primary,
        dir.path().join("absent.safetensors"),
        1.0,
    )]))
    .unwrap_err();
    assert!(matches!(err, EngineError::FatalInitialization(_)));
}

#[test]
fn test_mc_dropout_seed_determinism() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_weights(dir.path(), "primary.safetensors", ClassLabel::Normal);
    let bytes = png_bytes(&eye_image(96, 96));
    let options = PredictOptions {
        attribution: false,
        ..Default::default()
    };

    let run = |seed: u64| {
        let mut config = config(vec![spec("primary", ModelRole::Primary, primary.clone(), 1.0)]);
        config.mc_dropout.seed = Some(seed);
        let engine = DiagnosticEngine::try_new(config).unwrap();
        engine
            .predict_with(&bytes, &options)
            .unwrap()
            .prediction
            .uncertainty
            .unwrap()
    };

    let a = run(99);
    let b = run(99);
    let c = run(100);
    assert_eq!(a, b);
    // Variances of probabilities are bounded regardless of the masks
    for u in [a, c] {
        assert!((0.0..=0.5).contains(&u));
    }
}

#[test]
fn test_heatmap_matches_non_square_original() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_weights(dir.path(), "primary.safetensors", ClassLabel::Normal);
    let engine =
        DiagnosticEngine::try_new(config(vec![spec("primary", ModelRole::Primary, primary, 1.0)]))
            .unwrap();

    for (w, h) in [(200, 120), (75, 150)] {
        let diagnosis = engine.predict(&png_bytes(&eye_image(w, h))).unwrap();
        let artifact = diagnosis.attribution.unwrap();
        assert_eq!(artifact.heatmap_layer.dimensions(), (w, h));
        assert_eq!(artifact.overlay.dimensions(), (w, h));

        let store = ArtifactStore::new(dir.path().join("artifacts"));
        let relative = store.persist(&artifact, &format!("{}x{}", w, h)).unwrap();
        let written = image::open(store.root().join(relative)).unwrap();
        assert_eq!(written.width(), 3 * w + 20);
        assert_eq!(written.height(), h + CAPTION_HEIGHT);
    }
}

#[test]
fn test_no_residual_hook_state() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_weights(dir.path(), "primary.safetensors", ClassLabel::Normal);
    let engine =
        DiagnosticEngine::try_new(config(vec![spec("primary", ModelRole::Primary, primary, 1.0)]))
            .unwrap();
    let network = Arc::clone(engine.registry().unwrap().primary().unwrap());

    let image = eye_image(64, 64);
    let device = engine.registry().unwrap().device().clone();
    let input = preprocess(&image, RESOLUTION, &engine.config().normalization, &device).unwrap();
    let forward = || {
        network
            .predict_proba(&input.normalized, &mut DropoutMode::Inference)
            .unwrap()
    };
    let before = forward();

    // Success path
    engine.predict(&png_bytes(&image)).unwrap();
    assert!(!network.hooks_installed());
    assert_eq!(forward(), before);

    // Failure path: a single-channel input breaks the forward pass under the guard
    let bad_input = PreprocessedImage {
        normalized: Tensor::zeros((1, 1, 64, 64), DType::F32, &Device::Cpu).unwrap(),
        raw: Tensor::zeros((1, 3, 64, 64), DType::F32, &Device::Cpu).unwrap(),
        resolution: RESOLUTION,
    };
    let result = attribution::explain(
        &network,
        &bad_input,
        ClassLabel::Normal,
        &image,
        &AttributionConfig::default(),
    );
    assert!(result.is_err());
    assert!(!network.hooks_installed());
    assert_eq!(forward(), before);

    // Later predictions are unaffected
    let diagnosis = engine.predict(&png_bytes(&image)).unwrap();
    assert!(diagnosis.attribution.is_some());
}

#[test]
fn test_concurrent_predictions_share_one_engine() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_weights(dir.path(), "primary.safetensors", ClassLabel::Normal);
    let engine = Arc::new(
        DiagnosticEngine::try_new(config(vec![spec("primary", ModelRole::Primary, primary, 1.0)]))
            .unwrap(),
    );
    let bytes = Arc::new(png_bytes(&eye_image(80, 80)));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let bytes = Arc::clone(&bytes);
            std::thread::spawn(move || {
                let options = PredictOptions {
                    attribution: i % 2 == 0,
                    ..Default::default()
                };
                engine.predict_with(&bytes, &options).unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let first = &results[0].prediction;
    for diagnosis in &results {
        assert_eq!(diagnosis.prediction.predicted_class, first.predicted_class);
        for (a, b) in diagnosis
            .prediction
            .distribution
            .as_slice()
            .iter()
            .zip(first.distribution.as_slice())
        {
            assert!((a - b).abs() < 1e-6);
        }
    }
    assert!(results[0].attribution.is_some());
    assert!(results[2].attribution.is_some());
    assert!(!engine.registry().unwrap().primary().unwrap().hooks_installed());
}

#[test]
fn test_prediction_serializes_for_audit() {
    let dir = tempfile::tempdir().unwrap();
    let primary = write_weights(dir.path(), "primary.safetensors", ClassLabel::Normal);
    let engine =
        DiagnosticEngine::try_new(config(vec![spec("primary", ModelRole::Primary, primary, 1.0)]))
            .unwrap();

    let options = PredictOptions {
        attribution: false,
        ..Default::default()
    };
    let prediction = engine
        .predict_with(&png_bytes(&eye_image(64, 64)), &options)
        .unwrap()
        .prediction;

    let json = serde_json::to_value(&prediction).unwrap();
    assert_eq!(json["predicted_class"], "normal");
    assert_eq!(json["uncertainty_method"], "mc_dropout");
    let keys: Vec<&String> = json["distribution"].as_object().unwrap().keys().collect();
    assert_eq!(keys.len(), ClassLabel::COUNT);
    assert_eq!(json["per_model_distributions"][0]["model"], "primary");
}
