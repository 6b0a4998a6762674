use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use glob::glob;
use image::ImageReader;
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use refmatch::config::AppConfig;
use refmatch::detected_points::{FeatureError, FeatureExtractor, FeatureSet};
use refmatch::pipeline::{MatcherConfig, analyze};
use refmatch::sift::SiftExtractor;
use serde_json::{Value, json};

#[derive(Parser)]
#[command(version, about, author)]
struct RefMatchCli {
    /// reference image path
    reference: PathBuf,

    /// glob of query images, e.g. "frames/*.png"
    queries: String,

    /// optional json config, missing fields use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn img_filter(rp: glob::GlobResult) -> Option<PathBuf> {
    let p = rp.ok()?;
    let ext = p.extension()?.to_string_lossy().to_ascii_lowercase();
    ["png", "jpg", "jpeg"].contains(&ext.as_str()).then_some(p)
}

fn extract(extractor: &SiftExtractor, path: &Path) -> Result<FeatureSet, Box<dyn std::error::Error + Send + Sync>> {
    let img = ImageReader::open(path)?.decode()?;
    Ok(extractor.detect_and_compute(&img)?)
}

fn analyze_path(extractor: &SiftExtractor, reference: &FeatureSet, config: &MatcherConfig, path: &Path) -> Value {
    let result = match extract(extractor, path) {
        Ok(query) => analyze(reference, &query, config)
            .to_json()
            .unwrap_or_else(|e| json!({ "error": e.to_string() })),
        Err(e) => match e.downcast_ref::<FeatureError>() {
            Some(FeatureError::Empty | FeatureError::Image(_)) => {
                json!({ "match": false, "reason": "No features in camera image" })
            }
            _ => json!({ "error": e.to_string() }),
        },
    };
    json!({ "path": path.display().to_string(), "result": result })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = RefMatchCli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let extractor = SiftExtractor::new(config.sift);

    let now = Instant::now();
    let reference = extract(&extractor, &cli.reference).map_err(|e| e.to_string())?;
    log::info!(
        "reference {}: {} features in {:.3} sec",
        cli.reference.display(),
        reference.len(),
        now.elapsed().as_secs_f64()
    );

    let mut paths: Vec<PathBuf> = glob(&cli.queries)?.filter_map(img_filter).collect();
    paths.sort();
    if paths.is_empty() {
        log::warn!("no images match {}", cli.queries);
        return Ok(());
    }

    let now = Instant::now();
    let lines: Vec<Value> = paths
        .par_iter()
        .progress_count(paths.len() as u64)
        .map(|path| analyze_path(&extractor, &reference, &config.matcher, path))
        .collect();
    let matched = lines.iter().filter(|l| l["result"]["match"] == json!(true)).count();
    log::info!(
        "{} of {} queries matched, avg {:.3} sec",
        matched,
        lines.len(),
        now.elapsed().as_secs_f64() / lines.len() as f64
    );
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}
