//! The train-and-export batch run.
//!
//! Steps execute once, in order: read, impute, split, fit, evaluate, export.
//! Any error aborts the run; nothing is retried.

use std::io::Write;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::dataset::{FeatureSet, Partition, Table, fill_missing, read_csv, train_test_split};
use crate::error::PipelineError;
use crate::ml::forest::{RandomForest, TrainDataset, fit_forest};
use crate::ml::metrics::{Evaluation, evaluate, precision_recall_by_class};
use crate::onnx::{forest_to_onnx, write_model};

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub feature_names: Vec<String>,
    pub classes: Vec<String>,
    pub rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Cells replaced by the missing-value sentinel.
    pub filled_cells: usize,
    /// Holdout accuracy in `[0, 1]`.
    pub accuracy: f64,
    pub output_path: PathBuf,
    pub sha256: String,
}

/// A fitted forest with its holdout evaluation.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub forest: RandomForest,
    pub partition: Partition,
    pub evaluation: Evaluation,
}

/// Separate features from the label after imputing every gap in `table`.
pub fn prepare(table: &mut Table, config: &PipelineConfig) -> Result<(FeatureSet, usize), PipelineError> {
    let filled = fill_missing(table, config.missing_sentinel);
    tracing::info!(
        rows = table.n_rows(),
        columns = table.n_columns(),
        filled = filled.filled,
        "Loaded table"
    );
    let features = FeatureSet::from_table(table, &config.label_column)?;
    Ok((features, filled.filled))
}

/// Partition, fit on the training rows and score the held-out rows.
pub fn train(features: &FeatureSet, config: &PipelineConfig) -> Result<TrainedModel, PipelineError> {
    let partition = train_test_split(features.n_rows(), config.test_fraction, config.seed)?;
    let (train_x, train_labels) = features.select(&partition.train);
    let dataset = TrainDataset::from_labels(train_x, &train_labels)?;
    let options = config.forest_options();
    tracing::info!(
        train_rows = partition.train.len(),
        test_rows = partition.test.len(),
        classes = dataset.classes.len(),
        trees = options.n_trees,
        "Fitting random forest"
    );
    let forest = fit_forest(&dataset, &options)?;

    let (test_x, test_labels) = features.select(&partition.test);
    let evaluation = evaluate(&forest, test_x.view(), &test_labels);
    if evaluation.unseen_labels > 0 {
        tracing::warn!(
            rows = evaluation.unseen_labels,
            "Test rows carry labels absent from the training rows"
        );
    }
    for (class, stats) in forest
        .classes
        .iter()
        .zip(precision_recall_by_class(&evaluation.confusion))
    {
        tracing::debug!(
            class = %class,
            precision = stats.precision,
            recall = stats.recall,
            support = stats.support,
            "Holdout class stats"
        );
    }

    Ok(TrainedModel {
        forest,
        partition,
        evaluation,
    })
}

/// Run the full pipeline, writing progress lines to `out`.
pub fn run<W: Write>(config: &PipelineConfig, out: &mut W) -> Result<PipelineReport, PipelineError> {
    config.validate()?;

    writeln!(out, "Reading {}...", config.input_path.display())?;
    let mut table = read_csv(&config.input_path)?;
    let (features, filled_cells) = prepare(&mut table, config)?;
    writeln!(out, "Detected {} feature columns.", features.n_features())?;
    writeln!(out, "Features: {:?}", features.feature_names)?;

    writeln!(out, "Training random forest...")?;
    let trained = train(&features, config)?;
    writeln!(
        out,
        "Training complete. Accuracy: {:.2}%",
        trained.evaluation.accuracy * 100.0
    )?;

    writeln!(out, "Converting to ONNX...")?;
    let model = forest_to_onnx(&trained.forest, &features.feature_names, &config.export)?;
    let written = write_model(&model, &config.output_path)?;
    writeln!(out, "Saved {}", config.output_path.display())?;

    Ok(PipelineReport {
        feature_names: features.feature_names,
        classes: trained.forest.classes,
        rows: table.n_rows(),
        train_rows: trained.partition.train.len(),
        test_rows: trained.partition.test.len(),
        filled_cells,
        accuracy: trained.evaluation.accuracy,
        output_path: written.path,
        sha256: written.sha256,
    })
}
