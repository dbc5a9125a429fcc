use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const FEATURE_NAMES: [&str; 16] = [
    "Start Freq",
    "End Freq",
    "Stop Freq",
    "Min Freq",
    "Max Freq",
    "Heel Freq",
    "Knee Freq",
    "Peak Freq",
    "Char Freq",
    "Bandwidth",
    "Duration",
    "Slope",
    "Knee Slope",
    "Heel Slope",
    "Curvature",
    "Quality",
];

/// Shape of a synthetic call-feature table.
pub struct BatTable {
    pub rows: usize,
    pub features: usize,
    pub species: Vec<&'static str>,
    /// Every n-th feature cell is left blank; `0` disables gaps.
    pub gap_every: usize,
    pub seed: u64,
}

impl Default for BatTable {
    fn default() -> Self {
        Self {
            rows: 90,
            features: FEATURE_NAMES.len(),
            species: vec!["Myotis", "Nyctalus", "Pipistrellus"],
            gap_every: 0,
            seed: 11,
        }
    }
}

impl BatTable {
    /// CSV text with the feature columns followed by `Species`.
    pub fn csv(&self) -> String {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut out = String::new();
        let header: Vec<&str> = FEATURE_NAMES.iter().copied().cycle().take(self.features).collect();
        let header: Vec<String> = header
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                if idx < FEATURE_NAMES.len() {
                    name.to_string()
                } else {
                    format!("{name} {idx}")
                }
            })
            .collect();
        let _ = writeln!(out, "{},Species", header.join(","));
        let mut cell = 0usize;
        for row in 0..self.rows {
            let class = row % self.species.len();
            let mut values = Vec::with_capacity(self.features);
            for col in 0..self.features {
                cell += 1;
                if self.gap_every > 0 && cell % self.gap_every == 0 {
                    values.push(String::new());
                    continue;
                }
                let centre = 20.0 + class as f64 * 15.0 + col as f64;
                let value = centre + rng.random_range(-4.0..4.0);
                values.push(format!("{value:.2}"));
            }
            let _ = writeln!(out, "{},{}", values.join(","), self.species[class]);
        }
        out
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.csv()).expect("write csv");
        path
    }
}
