mod support;

use std::path::Path;

use batclass::PipelineConfig;
use batclass::dataset::read_csv;
use batclass::error::PipelineError;
use batclass::onnx::proto::ModelProto;
use batclass::onnx::{ExportError, ExportOptions, GraphScorer, forest_to_onnx};
use batclass::pipeline::{self, PipelineReport};
use prost::Message;
use support::bat_table::BatTable;
use tempfile::tempdir;

fn config(input: &Path, output: &Path) -> PipelineConfig {
    PipelineConfig {
        input_path: input.to_path_buf(),
        output_path: output.to_path_buf(),
        ..PipelineConfig::default()
    }
}

fn run(config: &PipelineConfig) -> (PipelineReport, Vec<String>) {
    let mut out = Vec::new();
    let report = pipeline::run(config, &mut out).expect("pipeline run");
    let text = String::from_utf8(out).expect("utf8 progress");
    (report, text.lines().map(str::to_string).collect())
}

fn decode(path: &Path) -> ModelProto {
    let bytes = std::fs::read(path).expect("read model");
    ModelProto::decode(bytes.as_slice()).expect("decode model")
}

fn tensor_dims(model: &ModelProto, output: bool, name: &str) -> Vec<Option<i64>> {
    let graph = model.graph.as_ref().expect("graph");
    let values = if output { &graph.output } else { &graph.input };
    let info = values
        .iter()
        .find(|info| info.name == name)
        .unwrap_or_else(|| panic!("no value named {name}"));
    info.r#type
        .as_ref()
        .and_then(|ty| ty.as_tensor())
        .and_then(|tensor| tensor.shape.as_ref())
        .map(|shape| shape.dims())
        .unwrap_or_else(|| panic!("{name} is not a shaped tensor"))
}

#[test]
fn sixteen_features_produce_expected_progress_and_graph() {
    let dir = tempdir().unwrap();
    let input = BatTable::default().write(dir.path(), "calls.csv");
    let output = dir.path().join("bat_model.onnx");
    let (report, lines) = run(&config(&input, &output));

    assert_eq!(lines.len(), 7);
    assert_eq!(lines[0], format!("Reading {}...", input.display()));
    assert_eq!(lines[1], "Detected 16 feature columns.");
    assert!(lines[2].starts_with("Features: [\"Start Freq\", \"End Freq\""));
    assert_eq!(lines[3], "Training random forest...");
    assert!(lines[4].starts_with("Training complete. Accuracy: "));
    assert!(lines[4].ends_with('%'));
    assert_eq!(lines[5], "Converting to ONNX...");
    assert_eq!(lines[6], format!("Saved {}", output.display()));

    assert_eq!(report.rows, 90);
    assert_eq!(report.test_rows, 18);
    assert_eq!(report.train_rows, 72);
    assert_eq!(report.classes, vec!["Myotis", "Nyctalus", "Pipistrellus"]);
    assert!(report.accuracy > 0.9, "accuracy {}", report.accuracy);

    let model = decode(&output);
    assert_eq!(model.ir_version, 8);
    assert_eq!(tensor_dims(&model, false, "float_input"), vec![None, Some(16)]);
    assert_eq!(tensor_dims(&model, true, "label"), vec![None]);
    assert_eq!(tensor_dims(&model, true, "probabilities"), vec![None, Some(3)]);
}

#[test]
fn repeated_runs_are_byte_identical() {
    let dir = tempdir().unwrap();
    let input = BatTable {
        gap_every: 13,
        ..BatTable::default()
    }
    .write(dir.path(), "calls.csv");
    let first_out = dir.path().join("first.onnx");
    let second_out = dir.path().join("second.onnx");

    let (first, first_lines) = run(&config(&input, &first_out));
    let (second, second_lines) = run(&config(&input, &second_out));

    assert_eq!(first_lines[4], second_lines[4]);
    assert_eq!(first.sha256, second.sha256);
    assert_eq!(
        std::fs::read(&first_out).unwrap(),
        std::fs::read(&second_out).unwrap()
    );
}

#[test]
fn input_width_follows_column_count() {
    let dir = tempdir().unwrap();
    for features in [15usize, 17] {
        let input = BatTable {
            features,
            ..BatTable::default()
        }
        .write(dir.path(), &format!("calls_{features}.csv"));
        let output = dir.path().join(format!("model_{features}.onnx"));
        let (report, lines) = run(&config(&input, &output));

        assert_eq!(lines[1], format!("Detected {features} feature columns."));
        assert_eq!(report.feature_names.len(), features);
        let model = decode(&output);
        assert_eq!(
            tensor_dims(&model, false, "float_input"),
            vec![None, Some(features as i64)]
        );
    }
}

#[test]
fn gaps_become_sentinel_and_no_row_is_dropped() {
    let dir = tempdir().unwrap();
    let table = BatTable {
        rows: 40,
        gap_every: 7,
        ..BatTable::default()
    };
    let input = table.write(dir.path(), "gappy.csv");
    let mut loaded = read_csv(&input).unwrap();
    let gaps = loaded.missing_count();
    assert!(gaps > 0);

    let config = config(&input, &dir.path().join("unused.onnx"));
    let (features, filled) = pipeline::prepare(&mut loaded, &config).unwrap();
    assert_eq!(filled, gaps);
    assert_eq!(loaded.missing_count(), 0);
    assert_eq!(features.n_rows(), 40);
    let sentinels = features.x.iter().filter(|&&value| value == -1.0).count();
    assert_eq!(sentinels, gaps);

    let (report, _) = run(&PipelineConfig {
        output_path: dir.path().join("gappy.onnx"),
        ..config
    });
    assert_eq!(report.rows, 40);
    assert_eq!(report.filled_cells, gaps);
    assert_eq!(report.train_rows + report.test_rows, 40);
}

#[test]
fn exported_graph_reproduces_forest_predictions() {
    let dir = tempdir().unwrap();
    let input = BatTable {
        gap_every: 17,
        species: vec!["3", "5", "9"],
        ..BatTable::default()
    }
    .write(dir.path(), "numeric_species.csv");
    let config = config(&input, &dir.path().join("model.onnx"));

    let mut table = read_csv(&input).unwrap();
    let (features, _) = pipeline::prepare(&mut table, &config).unwrap();
    let trained = pipeline::train(&features, &config).unwrap();
    let model = forest_to_onnx(&trained.forest, &features.feature_names, &config.export).unwrap();
    let scorer = GraphScorer::from_model(&model).unwrap();

    let scores = scorer.score(features.x.view()).unwrap();
    let expected = trained.forest.predict_labels(features.x.view());
    let proba = trained.forest.predict_proba(features.x.view());
    for (row, (got, want)) in scores.labels.iter().zip(&expected).enumerate() {
        let mut sorted: Vec<f32> = proba.row(row).to_vec();
        sorted.sort_by(|a, b| b.total_cmp(a));
        if sorted[0] - sorted[1] > 1e-4 {
            assert_eq!(got, want, "row {row}");
        }
        for (g, w) in scores.probabilities.row(row).iter().zip(proba.row(row)) {
            assert!((g - w).abs() < 1e-4, "row {row}: {g} vs {w}");
        }
    }
}

#[test]
fn zipmap_option_turns_probabilities_into_maps() {
    let dir = tempdir().unwrap();
    let input = BatTable::default().write(dir.path(), "calls.csv");
    let output = dir.path().join("zipmap.onnx");
    let mut config = config(&input, &output);
    config.export = ExportOptions {
        zipmap: true,
        ..ExportOptions::default()
    };
    run(&config);

    let model = decode(&output);
    let outputs: Vec<&str> = model
        .graph
        .as_ref()
        .unwrap()
        .output
        .iter()
        .map(|info| info.name.as_str())
        .collect();
    assert_eq!(outputs, vec!["output_label", "output_probability"]);

    let scorer = GraphScorer::load(&output).unwrap();
    assert!(!scorer.has_flat_outputs());
    assert_eq!(scorer.n_features(), 16);
}

#[test]
fn absent_input_fails_before_writing() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("never.onnx");
    let config = config(&dir.path().join("missing.csv"), &output);
    let mut out = Vec::new();
    let err = pipeline::run(&config, &mut out).unwrap_err();
    assert!(matches!(err, PipelineError::Table(_)));
    assert!(!output.exists());
}

#[test]
fn single_species_table_is_not_exported() {
    let dir = tempdir().unwrap();
    let input = BatTable {
        rows: 30,
        species: vec!["7"],
        ..BatTable::default()
    }
    .write(dir.path(), "one_species.csv");
    let output = dir.path().join("bat_model.onnx");
    let config = config(&input, &output);

    let mut out = Vec::new();
    let err = pipeline::run(&config, &mut out).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Export(ExportError::SingleClass(ref class)) if class == "7"
    ));
    assert!(!output.exists());
    let progress = String::from_utf8(out).unwrap();
    assert!(progress.contains("Training complete. Accuracy: 100.00%"));
    assert!(!progress.contains("Saved"));
}

#[test]
fn table_without_label_column_fails() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("unlabeled.csv");
    std::fs::write(&input, "a,b\n1,2\n3,4\n").unwrap();
    let config = config(&input, &dir.path().join("model.onnx"));
    let mut out = Vec::new();
    let err = pipeline::run(&config, &mut out).unwrap_err();
    assert!(matches!(err, PipelineError::Split(_)));
}
