//! Applies an exported model to a CSV feature table.

use std::path::PathBuf;

use batclass::config::{DEFAULT_LABEL_COLUMN, MISSING_SENTINEL};
use batclass::dataset::{FeatureSet, fill_missing, read_csv};
use batclass::logging;
use batclass::ml::metrics::accuracy;
use batclass::onnx::GraphScorer;
use serde::Serialize;

fn main() {
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    if let Err(err) = run() {
        tracing::error!("{err}");
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    model_path: PathBuf,
    data_path: PathBuf,
    label_column: String,
    json: bool,
}

#[derive(Debug, Serialize)]
struct RowScore<'a> {
    row: usize,
    label: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    truth: Option<&'a str>,
    probabilities: Vec<f32>,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let scorer = GraphScorer::load(&options.model_path).map_err(|err| err.to_string())?;
    let mut table = read_csv(&options.data_path).map_err(|err| err.to_string())?;
    let report = fill_missing(&mut table, MISSING_SENTINEL);
    if report.filled > 0 {
        tracing::info!(filled = report.filled, "Replaced missing cells");
    }

    let features = match scorer.feature_names() {
        Some(names) => FeatureSet::with_columns(&table, names, &options.label_column),
        None if table.column_index(&options.label_column).is_some() => {
            FeatureSet::from_table(&table, &options.label_column)
        }
        None => FeatureSet::with_columns(&table, table.columns(), &options.label_column),
    }
    .map_err(|err| err.to_string())?;

    let scores = scorer.score(features.x.view()).map_err(|err| err.to_string())?;
    let truth = features.has_labels().then_some(features.labels.as_slice());

    if options.json {
        for (row, (label, probs)) in scores
            .labels
            .iter()
            .zip(scores.probabilities.rows())
            .enumerate()
        {
            let record = RowScore {
                row,
                label,
                truth: truth.and_then(|labels| labels.get(row)).map(String::as_str),
                probabilities: probs.to_vec(),
            };
            let line = serde_json::to_string(&record).map_err(|err| err.to_string())?;
            println!("{line}");
        }
    } else {
        let n_classes = scorer.labels().len();
        let header: Vec<String> = (0..n_classes)
            .map(|idx| format!("p_{}", scorer.labels().text(idx).unwrap_or_default()))
            .collect();
        println!("row,label,{}", header.join(","));
        for (row, (label, probs)) in scores
            .labels
            .iter()
            .zip(scores.probabilities.rows())
            .enumerate()
        {
            let probs: Vec<String> = probs.iter().map(|p| format!("{p:.4}")).collect();
            println!("{row},{label},{}", probs.join(","));
        }
    }

    if let Some(truth) = truth {
        let acc = accuracy(truth, scores.labels.as_slice());
        eprintln!("accuracy: {:.2}%", acc * 100.0);
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut model_path: Option<PathBuf> = None;
    let mut data_path: Option<PathBuf> = None;
    let mut label_column = DEFAULT_LABEL_COLUMN.to_string();
    let mut json = false;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--model" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--model requires a value".to_string())?;
                model_path = Some(PathBuf::from(value));
            }
            "--data" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--data requires a value".to_string())?;
                data_path = Some(PathBuf::from(value));
            }
            "--label-column" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--label-column requires a value".to_string())?;
                label_column = value.clone();
            }
            "--json" => json = true,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    let model_path = model_path.ok_or_else(|| format!("Missing --model\n\n{}", help_text()))?;
    let data_path = data_path.ok_or_else(|| format!("Missing --data\n\n{}", help_text()))?;
    Ok(CliOptions {
        model_path,
        data_path,
        label_column,
        json,
    })
}

fn help_text() -> String {
    [
        "batclass-score",
        "",
        "Scores every row of a CSV with an exported tree-ensemble model.",
        "",
        "Usage:",
        "  batclass-score --model bat_model.onnx --data calls.csv [--label-column Species] [--json]",
        "",
        "Missing cells are replaced with -1 before scoring. When the label column is",
        "present, accuracy is printed to stderr.",
    ]
    .join("\n")
}
