//! Trains the bat species classifier and exports it as ONNX.

use std::path::PathBuf;

use batclass::{PipelineConfig, logging, pipeline};

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

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let mut config = match &options.config {
        Some(path) => PipelineConfig::load(path).map_err(|err| err.to_string())?,
        None => PipelineConfig::default(),
    };
    if let Some(data) = options.data {
        config.input_path = data;
    }
    if let Some(out) = options.out {
        config.output_path = out;
    }

    let mut stdout = std::io::stdout().lock();
    let report = pipeline::run(&config, &mut stdout).map_err(|err| err.to_string())?;
    tracing::info!(
        rows = report.rows,
        train_rows = report.train_rows,
        test_rows = report.test_rows,
        classes = report.classes.len(),
        accuracy = report.accuracy,
        sha256 = %report.sha256,
        "Run complete"
    );
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
struct CliOptions {
    config: Option<PathBuf>,
    data: Option<PathBuf>,
    out: Option<PathBuf>,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                options.config = Some(PathBuf::from(value));
            }
            "--data" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--data requires a value".to_string())?;
                options.data = Some(PathBuf::from(value));
            }
            "--out" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--out requires a value".to_string())?;
                options.out = Some(PathBuf::from(value));
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(options)
}

fn help_text() -> String {
    [
        "batclass",
        "",
        "Trains a random forest on a bat call feature table and exports it as ONNX.",
        "",
        "Usage:",
        "  batclass [--config batclass.toml] [--data Testing_AI_Data.csv] [--out bat_model.onnx]",
        "",
        "Options:",
        "  --config <file>  TOML overrides for the pipeline settings.",
        "  --data <csv>     Input table (default: Testing_AI_Data.csv).",
        "  --out <file>     Output model path (default: bat_model.onnx).",
    ]
    .join("\n")
}
